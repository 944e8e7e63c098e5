//! Meter adapter contract and fuse-headroom helpers

use crate::phase::{Phase, PhaseValues};
use std::sync::{Mutex, MutexGuard};

/// Nominal phase voltage used to convert between power and current
pub const NOMINAL_VOLTAGE: f64 = 230.0;

/// Meter adapter trait
pub trait Meter: Send + Sync {
    /// Active current drawn on a phase in amperes, `None` when unknown
    fn active_phase_current(&self, phase: Phase) -> Option<f64>;

    /// Active power on a phase in kW, `None` when unknown
    fn active_phase_power(&self, phase: Phase) -> Option<f64>;
}

/// Headroom left under a ceiling given the measured current.
///
/// Rounded down so fractional load never counts as headroom, and never above
/// the ceiling itself (a negative reading from export does not add capacity).
pub fn available_current(ceiling: f64, active_current: f64) -> i32 {
    let headroom = (ceiling - active_current).floor();
    headroom.min(ceiling.floor()) as i32
}

/// Meter fed by the simulator and tests
#[derive(Debug, Default)]
pub struct SimulatedMeter {
    currents: Mutex<PhaseValues<f64>>,
}

impl SimulatedMeter {
    pub fn new(currents: PhaseValues<f64>) -> Self {
        Self {
            currents: Mutex::new(currents),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PhaseValues<f64>> {
        self.currents.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_current(&self, phase: Phase, amps: f64) {
        self.lock().set(phase, amps);
    }

    pub fn set_currents(&self, currents: PhaseValues<f64>) {
        *self.lock() = currents;
    }

    /// Drop the reading of a phase, as if the meter stopped reporting it
    pub fn clear_phase(&self, phase: Phase) {
        self.lock().remove(phase);
    }
}

impl Meter for SimulatedMeter {
    fn active_phase_current(&self, phase: Phase) -> Option<f64> {
        self.lock().value(phase)
    }

    fn active_phase_power(&self, phase: Phase) -> Option<f64> {
        self.lock()
            .value(phase)
            .map(|amps| amps * NOMINAL_VOLTAGE / 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headroom_is_floored_and_capped() {
        assert_eq!(available_current(25.0, 10.4), 14);
        assert_eq!(available_current(25.0, 30.0), -5);
        assert_eq!(available_current(25.0, 25.5), -1);
        assert_eq!(available_current(25.0, -4.0), 25);
    }

    #[test]
    fn simulated_meter_reports_power_from_current() {
        let meter = SimulatedMeter::new(PhaseValues::from([(Phase::L1, 10.0)]));
        assert_eq!(meter.active_phase_current(Phase::L1), Some(10.0));
        let power = meter.active_phase_power(Phase::L1).unwrap();
        assert!((power - 2.3).abs() < 1e-9);

        meter.clear_phase(Phase::L1);
        assert_eq!(meter.active_phase_current(Phase::L1), None);
        assert_eq!(meter.active_phase_power(Phase::L2), None);
    }
}
