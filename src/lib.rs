//! # EVSE Load Balancer - fuse-aware current limiting for EV chargers
//!
//! Keeps the combined draw of a household and its EV chargers under the main
//! fuse. A per-phase risk controller tolerates short overcurrent like a
//! breaker would, cuts fast when the risk builds up and hands headroom back
//! only after a quiet, stable period. A proportional allocator turns those
//! per-phase decisions into setpoints for every connected charger.
//!
//! ## Architecture
//!
//! - `phase`: phase identifiers and fixed per-phase containers
//! - `config`: YAML configuration and validation
//! - `logging`: structured logging and tracing
//! - `charger` / `meter`: adapter traits plus in-memory implementations
//! - `balancer`: availability algorithms (risk controller, hysteresis)
//! - `allocator`: proportional distribution of cuts and headroom
//! - `coordinator`: the control cycle tying meter, balancer, allocator and chargers together
//! - `sim`: scenario replay for tuning and regression checks

pub mod allocator;
pub mod balancer;
pub mod charger;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod meter;
pub mod phase;
pub mod sim;

pub use allocator::{AllocationResult, ChargerAllocationState, PowerAllocator};
pub use balancer::{Balancer, HysteresisBalancer, LoadBalancingController, build_balancer};
pub use charger::{Charger, SimulatedCharger};
pub use config::Config;
pub use coordinator::{Coordinator, LoadBalancingState};
pub use error::{BalancerError, Result};
pub use meter::{Meter, SimulatedMeter};
pub use phase::{Phase, PhaseValues};
