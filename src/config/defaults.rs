use super::*;

impl Default for FuseConfig {
    fn default() -> Self {
        Self {
            fuse_size: 25.0,
            phase_count: 3,
            max_fuse_load_amps: 0.0,
        }
    }
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            kind: BalancerKind::Optimised,
            hold_off_period_s: 15.0 * 60.0,
            trip_risk_threshold: 60.0,
            risk_decay_per_second: 1.0,
            recovery_risk_threshold: 60.0 * 0.4,
            recovery_std: 2.5,
            history_capacity: 900,
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            cycle_interval_ms: 1000,
            min_charger_update_delay_s: 30.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/tmp/evse_load_balancer.log".to_string(),
            file_output: false,
            console_output: true,
            json_format: false,
            backup_count: 5,
        }
    }
}
