use evse_load_balancer::config::Config;
use evse_load_balancer::phase::{Phase, PhaseValues};
use evse_load_balancer::sim::{Scenario, run_scenario};

const COOKING_PEAK: &str = r#"
name: cooking_peak
fuse:
  fuse_size: 25
  phase_count: 3
balancer:
  kind: optimised
  hold_off_period_s: 60
  trip_risk_threshold: 60
  risk_decay_per_second: 1.0
  recovery_risk_threshold: 24
  recovery_std: 2.5
  history_capacity: 60
coordinator:
  cycle_interval_ms: 1000
  min_charger_update_delay_s: 30
duration_s: 600
chargers:
  - id: garage
    requested_current: 16
    max_current: 16
load_profile:
  - from_s: 0
    l1: 14
  - from_s: 300
    l1: 2
"#;

#[tokio::test]
async fn peak_is_cut_and_headroom_returned_later() {
    let scenario: Scenario = serde_yaml::from_str(COOKING_PEAK).unwrap();
    let report = run_scenario(&scenario, &Config::default()).await.unwrap();

    assert_eq!(report.steps, 600);
    assert_eq!(report.balancer, "optimised");

    // 30 A on L1 accrues 2 risk per second: the cut lands after 30 s
    let first = &report.writes[0];
    assert_eq!(first.t_s, 30);
    assert_eq!(first.charger_id, "garage");
    assert_eq!(first.limits.value(Phase::L1), Some(11));
    assert_eq!(report.overcurrent_seconds, 31);

    // Once the cooker is off the car gets its full current back
    assert_eq!(report.charger_writes, 2);
    assert!(report.writes[1].t_s > 300);
    assert_eq!(
        report.final_limits["garage"],
        PhaseValues::uniform(Phase::ALL, 16)
    );
    assert!(report.energy_kwh > 0.0);
}

#[tokio::test]
async fn hysteresis_cuts_as_soon_as_the_car_plugs_in() {
    let yaml = r#"
fuse:
  fuse_size: 25
balancer:
  kind: hysteresis
  hold_off_period_s: 300
duration_s: 120
chargers:
  - id: garage
    requested_current: 16
    max_current: 16
    plug_in_s: 10
load_profile:
  - from_s: 0
    l1: 14
"#;
    let scenario: Scenario = serde_yaml::from_str(yaml).unwrap();
    let report = run_scenario(&scenario, &Config::default()).await.unwrap();

    assert_eq!(report.balancer, "hysteresis");
    assert_eq!(report.charger_writes, 1);
    assert_eq!(report.writes[0].t_s, 10);
    assert_eq!(report.overcurrent_seconds, 1);
    assert_eq!(
        report.final_limits["garage"],
        PhaseValues::uniform(Phase::ALL, 11)
    );
}

#[tokio::test]
async fn invalid_scenario_is_rejected() {
    let yaml = "duration_s: 0\nchargers: []\n";
    let scenario: Scenario = serde_yaml::from_str(yaml).unwrap();
    assert!(run_scenario(&scenario, &Config::default()).await.is_err());
}

#[tokio::test]
async fn bundled_demo_runs() {
    let scenario = Scenario::from_file("demos/evening_peak.yaml").unwrap();
    let report = run_scenario(&scenario, &Config::default()).await.unwrap();

    assert_eq!(report.steps, 3600);
    assert_eq!(report.final_limits.len(), 2);
    assert!(report.charger_writes > 0);
    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"final_limits\""));
}
