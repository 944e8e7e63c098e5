//! Availability algorithms
//!
//! A balancer turns the raw headroom per phase (fuse ceiling minus measured
//! load) into the signal the allocator acts on: a negative value asks for a
//! cut of that many amperes, a positive value offers that much to grow into.
//! Balancers know nothing about chargers.

use crate::config::{BalancerConfig, BalancerKind};
use crate::error::Result;
use crate::phase::{Phase, PhaseValues};

mod controller;
mod hysteresis;
mod risk;

pub use controller::LoadBalancingController;
pub use hysteresis::HysteresisBalancer;
pub use risk::{PhaseAction, PhaseRiskMonitor, trip_risk_rate};

/// Availability algorithm
pub trait Balancer: Send {
    /// Feed the latest headroom per phase and get the settled signal back.
    ///
    /// Phases missing from `available_currents`, or not known to the
    /// balancer, are skipped and absent from the result.
    fn compute_availability(
        &mut self,
        available_currents: &PhaseValues<i32>,
        now: f64,
    ) -> PhaseValues<i32>;

    /// Number of cut and restore events issued so far
    fn adjustment_count(&self) -> u64;

    /// Phases that issued a cut or restore during the last `compute_availability`
    fn adjusted_phases(&self) -> &[Phase];

    fn name(&self) -> &'static str;
}

/// Build the configured balancer for the given per-phase ceilings
pub fn build_balancer(
    config: &BalancerConfig,
    max_limits: PhaseValues<i32>,
) -> Result<Box<dyn Balancer>> {
    match config.kind {
        BalancerKind::Optimised => Ok(Box::new(LoadBalancingController::new(
            config, max_limits,
        )?)),
        BalancerKind::Hysteresis => Ok(Box::new(HysteresisBalancer::new(config, max_limits)?)),
    }
}

/// Median of the samples rounded down, `None` when empty
pub(crate) fn floored_median<'a, I>(samples: I) -> Option<i32>
where
    I: IntoIterator<Item = &'a i32>,
{
    let mut sorted: Vec<i32> = samples.into_iter().copied().collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        let sum = i64::from(sorted[mid - 1]) + i64::from(sorted[mid]);
        Some(sum.div_euclid(2) as i32)
    }
}
