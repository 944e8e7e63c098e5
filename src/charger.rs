//! Charger adapter contract
//!
//! The allocator reads chargers through this trait every cycle; only the
//! coordinator writes to them. `SimulatedCharger` keeps its state in memory and
//! backs the scenario simulator and the test-suite.

use crate::error::{BalancerError, Result};
use crate::phase::{Phase, PhaseValues};
use std::sync::{Mutex, MutexGuard};

/// Charger adapter trait
#[async_trait::async_trait]
pub trait Charger: Send + Sync {
    /// Stable identifier used as the allocator key
    fn id(&self) -> &str;

    /// Current limit per phase in amperes, `None` when the charger cannot report it
    fn get_current_limit(&self) -> Option<PhaseValues<i32>>;

    /// Configured maximum current per phase in amperes
    fn get_max_current_limit(&self) -> Option<PhaseValues<i32>>;

    /// A car is plugged in and authorised. It may still not accept charge.
    fn car_connected(&self) -> bool;

    /// The car is connected and charging or ready to accept charge
    fn can_charge(&self) -> bool;

    /// Whether a single limit applies to all phases
    fn has_synced_phase_limits(&self) -> bool {
        true
    }

    /// Apply a new limit
    async fn set_current_limit(&self, limit: PhaseValues<i32>) -> Result<()>;
}

#[derive(Debug, Clone)]
struct SimulatedChargerState {
    current_limit: PhaseValues<i32>,
    max_limit: PhaseValues<i32>,
    car_connected: bool,
    can_charge: bool,
    limit_readable: bool,
    fail_writes: bool,
    writes: u32,
}

/// In-memory charger
#[derive(Debug)]
pub struct SimulatedCharger {
    id: String,
    synced_phases: bool,
    state: Mutex<SimulatedChargerState>,
}

impl SimulatedCharger {
    /// Three-phase charger with the given limit on every phase
    pub fn new(id: &str, initial_current: i32, max_current: i32) -> Self {
        Self::with_phases(id, initial_current, max_current, Phase::ALL)
    }

    pub fn with_phases<I>(id: &str, initial_current: i32, max_current: i32, phases: I) -> Self
    where
        I: IntoIterator<Item = Phase> + Clone,
    {
        Self {
            id: id.to_string(),
            synced_phases: true,
            state: Mutex::new(SimulatedChargerState {
                current_limit: PhaseValues::uniform(phases.clone(), initial_current),
                max_limit: PhaseValues::uniform(phases, max_current),
                car_connected: false,
                can_charge: false,
                limit_readable: true,
                fail_writes: false,
                writes: 0,
            }),
        }
    }

    /// Toggle per-phase settable limits
    pub fn with_synced_phases(mut self, synced: bool) -> Self {
        self.synced_phases = synced;
        self
    }

    fn lock(&self) -> MutexGuard<'_, SimulatedChargerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_car_connected(&self, connected: bool) {
        self.lock().car_connected = connected;
    }

    /// Plug in and start accepting charge (or stop)
    pub fn set_can_charge(&self, can_charge: bool) {
        let mut state = self.lock();
        state.can_charge = can_charge;
        if can_charge {
            state.car_connected = true;
        }
    }

    /// Change the limit behind the balancer's back, like a user in an app would
    pub fn set_current_limits(&self, limits: PhaseValues<i32>) {
        self.lock().current_limit = limits;
    }

    /// Make `get_current_limit` report nothing
    pub fn set_limit_readable(&self, readable: bool) {
        self.lock().limit_readable = readable;
    }

    /// Make `set_current_limit` fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Number of successful writes
    pub fn write_count(&self) -> u32 {
        self.lock().writes
    }

    /// Current actually drawn per phase: the limit while charging, zero otherwise
    pub fn drawn_current(&self) -> PhaseValues<i32> {
        let state = self.lock();
        if state.can_charge {
            state.current_limit
        } else {
            state.current_limit.map(|_| 0)
        }
    }
}

#[async_trait::async_trait]
impl Charger for SimulatedCharger {
    fn id(&self) -> &str {
        &self.id
    }

    fn get_current_limit(&self) -> Option<PhaseValues<i32>> {
        let state = self.lock();
        state.limit_readable.then_some(state.current_limit)
    }

    fn get_max_current_limit(&self) -> Option<PhaseValues<i32>> {
        Some(self.lock().max_limit)
    }

    fn car_connected(&self) -> bool {
        self.lock().car_connected
    }

    fn can_charge(&self) -> bool {
        self.lock().can_charge
    }

    fn has_synced_phase_limits(&self) -> bool {
        self.synced_phases
    }

    async fn set_current_limit(&self, limit: PhaseValues<i32>) -> Result<()> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(BalancerError::charger(format!(
                "Charger {} rejected limit {}",
                self.id, limit
            )));
        }

        let max_limit = state.max_limit;
        let clamp = |phase: Phase, value: i32| {
            let max = max_limit.value(phase).unwrap_or(value);
            value.clamp(0, max.max(0))
        };

        if self.synced_phases {
            let Some(min_value) = limit.min_value() else {
                return Ok(());
            };
            let phases: Vec<Phase> = state.current_limit.phases().collect();
            state.current_limit = PhaseValues::from_fn(phases, |p| clamp(p, min_value));
        } else {
            for (phase, value) in limit.iter() {
                if state.current_limit.contains(phase) {
                    state.current_limit.set(phase, clamp(phase, *value));
                }
            }
        }
        state.writes += 1;
        Ok(())
    }
}
