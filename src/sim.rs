//! Scenario replay
//!
//! Runs the full control cycle against a simulated meter and chargers. The
//! household load follows a piecewise-constant profile and every charging car
//! draws exactly its current limit, so the meter sees household plus chargers.

use crate::charger::{Charger, SimulatedCharger};
use crate::config::{BalancerConfig, Config, CoordinatorConfig, FuseConfig};
use crate::coordinator::Coordinator;
use crate::error::{BalancerError, Result};
use crate::logging::get_logger;
use crate::meter::{NOMINAL_VOLTAGE, SimulatedMeter};
use crate::phase::{Phase, PhaseValues};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Scenario file layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub fuse: FuseConfig,

    /// Replaces the balancer section of the configuration when present
    #[serde(default)]
    pub balancer: Option<BalancerConfig>,

    /// Replaces the coordinator section of the configuration when present
    #[serde(default)]
    pub coordinator: Option<CoordinatorConfig>,

    pub duration_s: u64,

    #[serde(default = "default_step_s")]
    pub step_s: u64,

    pub chargers: Vec<ScenarioCharger>,

    /// Household load segments; each holds until the next one starts
    #[serde(default)]
    pub load_profile: Vec<LoadSegment>,
}

fn default_step_s() -> u64 {
    1
}

fn default_synced() -> bool {
    true
}

/// A charger and the window in which a car is plugged in
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioCharger {
    pub id: String,

    /// Limit configured on the charger before the balancer touches it
    pub requested_current: i32,

    pub max_current: i32,

    #[serde(default = "default_synced")]
    pub synced: bool,

    /// Second the car is plugged in (from the start when absent)
    #[serde(default)]
    pub plug_in_s: Option<u64>,

    /// Second the car leaves (stays until the end when absent)
    #[serde(default)]
    pub unplug_s: Option<u64>,
}

impl ScenarioCharger {
    fn plugged_in_at(&self, t: u64) -> bool {
        self.plug_in_s.is_none_or(|start| t >= start) && self.unplug_s.is_none_or(|end| t < end)
    }
}

/// Household current per phase from `from_s` onwards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadSegment {
    pub from_s: u64,
    #[serde(default)]
    pub l1: f64,
    #[serde(default)]
    pub l2: f64,
    #[serde(default)]
    pub l3: f64,
}

impl LoadSegment {
    fn current(&self, phase: Phase) -> f64 {
        match phase {
            Phase::L1 => self.l1,
            Phase::L2 => self.l2,
            Phase::L3 => self.l3,
        }
    }
}

/// One charger write observed during a run
#[derive(Debug, Clone, Serialize)]
pub struct ChargerWrite {
    pub t_s: u64,
    pub charger_id: String,
    pub limits: PhaseValues<i32>,
}

/// Outcome of a scenario run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub scenario: Option<String>,
    pub balancer: String,
    pub steps: u64,
    pub adjustments: u64,
    pub charger_writes: usize,
    pub writes: Vec<ChargerWrite>,
    /// Simulated seconds with any phase above the fuse ceiling
    pub overcurrent_seconds: u64,
    /// Energy delivered to the cars
    pub energy_kwh: f64,
    pub final_limits: BTreeMap<String, PhaseValues<i32>>,
}

impl Scenario {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let scenario: Scenario = serde_yaml::from_str(&contents)?;
        scenario.validate()?;
        Ok(scenario)
    }

    pub fn validate(&self) -> Result<()> {
        if self.step_s == 0 {
            return Err(BalancerError::validation("step_s", "Must be greater than 0"));
        }
        if self.duration_s == 0 {
            return Err(BalancerError::validation(
                "duration_s",
                "Must be greater than 0",
            ));
        }
        for charger in &self.chargers {
            if charger.requested_current < 0 || charger.max_current < charger.requested_current {
                return Err(BalancerError::validation(
                    format!("chargers.{}", charger.id),
                    "Requested current must be between 0 and max_current",
                ));
            }
        }
        self.fuse.validate()
    }

    /// Household load in effect at second `t`
    pub fn household_load(&self, t: u64) -> Option<&LoadSegment> {
        self.load_profile
            .iter()
            .filter(|segment| segment.from_s <= t)
            .max_by_key(|segment| segment.from_s)
    }

    /// Configuration for this run: the base with the scenario's sections applied
    pub fn config(&self, base: &Config) -> Config {
        let mut config = base.clone();
        config.fuse = self.fuse.clone();
        if let Some(balancer) = &self.balancer {
            config.balancer = balancer.clone();
        }
        if let Some(coordinator) = &self.coordinator {
            config.coordinator = coordinator.clone();
        }
        config
    }
}

/// Replay a scenario through the control cycle
pub async fn run_scenario(scenario: &Scenario, base: &Config) -> Result<SimulationReport> {
    scenario.validate()?;
    let logger = get_logger("sim");
    let config = scenario.config(base);
    let phases = config.fuse.phases();
    let ceiling = config.fuse.ceiling();

    let meter = Arc::new(SimulatedMeter::default());
    let chargers: Vec<(&ScenarioCharger, Arc<SimulatedCharger>)> = scenario
        .chargers
        .iter()
        .map(|spec| {
            let charger = SimulatedCharger::with_phases(
                &spec.id,
                spec.requested_current,
                spec.max_current,
                phases.iter().copied(),
            )
            .with_synced_phases(spec.synced);
            (spec, Arc::new(charger))
        })
        .collect();

    let mut coordinator = Coordinator::new(config, meter.clone())?;
    for (_, charger) in &chargers {
        coordinator.add_charger(charger.clone())?;
    }
    logger.info(&format!(
        "Running scenario {} for {} s with {} charger(s)",
        scenario.name.as_deref().unwrap_or("unnamed"),
        scenario.duration_s,
        chargers.len()
    ));

    let mut report = SimulationReport {
        scenario: scenario.name.clone(),
        balancer: coordinator.balancer().name().to_string(),
        steps: 0,
        adjustments: 0,
        charger_writes: 0,
        writes: Vec::new(),
        overcurrent_seconds: 0,
        energy_kwh: 0.0,
        final_limits: BTreeMap::new(),
    };

    let mut t = 0;
    while t < scenario.duration_s {
        for (spec, charger) in &chargers {
            charger.set_can_charge(spec.plugged_in_at(t));
        }

        let household = scenario.household_load(t);
        let mut measured = PhaseValues::new();
        for phase in &phases {
            let base_load = household.map_or(0.0, |segment| segment.current(*phase));
            let draw: i32 = chargers
                .iter()
                .filter_map(|(_, charger)| charger.drawn_current().value(*phase))
                .sum();
            measured.set(*phase, base_load + f64::from(draw));
        }
        if measured.iter().any(|(_, amps)| *amps > ceiling) {
            report.overcurrent_seconds += scenario.step_s;
        }
        meter.set_currents(measured);

        let delivered_amps: i32 = chargers
            .iter()
            .map(|(_, charger)| charger.drawn_current().iter().map(|(_, a)| *a).sum::<i32>())
            .sum();
        report.energy_kwh +=
            f64::from(delivered_amps) * NOMINAL_VOLTAGE * scenario.step_s as f64 / 3_600_000.0;

        let outcome = coordinator.run_cycle(t as f64).await?;
        if outcome.adjusted {
            report.adjustments += 1;
        }
        for (id, limits) in outcome.commands {
            report.writes.push(ChargerWrite {
                t_s: t,
                charger_id: id,
                limits,
            });
        }

        report.steps += 1;
        t += scenario.step_s;
    }

    report.charger_writes = report.writes.len();
    for (_, charger) in &chargers {
        if let Some(limits) = charger.get_current_limit() {
            report.final_limits.insert(charger.id().to_string(), limits);
        }
    }
    logger.info(&format!(
        "Scenario finished: {} write(s), {} s above the fuse, {:.2} kWh delivered",
        report.charger_writes, report.overcurrent_seconds, report.energy_kwh
    ));
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
name: short
fuse:
  fuse_size: 25
  phase_count: 3
duration_s: 10
chargers:
  - id: garage
    requested_current: 16
    max_current: 16
    plug_in_s: 5
load_profile:
  - from_s: 0
    l1: 4
  - from_s: 6
    l1: 12
    l2: 3
"#;

    #[test]
    fn parses_with_defaults() {
        let scenario: Scenario = serde_yaml::from_str(YAML).unwrap();
        assert_eq!(scenario.step_s, 1);
        assert!(scenario.chargers[0].synced);
        assert!(scenario.validate().is_ok());
    }

    #[test]
    fn profile_segments_hold_until_replaced() {
        let scenario: Scenario = serde_yaml::from_str(YAML).unwrap();
        assert_eq!(scenario.household_load(5).unwrap().l1, 4.0);
        assert_eq!(scenario.household_load(6).unwrap().l2, 3.0);
        assert_eq!(scenario.household_load(600).unwrap().l1, 12.0);
    }

    #[test]
    fn plug_window_is_half_open() {
        let charger = ScenarioCharger {
            id: "a".to_string(),
            requested_current: 16,
            max_current: 16,
            synced: true,
            plug_in_s: Some(10),
            unplug_s: Some(20),
        };
        assert!(!charger.plugged_in_at(9));
        assert!(charger.plugged_in_at(10));
        assert!(!charger.plugged_in_at(20));
    }

    #[test]
    fn zero_step_is_rejected() {
        let mut scenario: Scenario = serde_yaml::from_str(YAML).unwrap();
        scenario.step_s = 0;
        assert!(scenario.validate().is_err());
    }
}
