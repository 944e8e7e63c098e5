//! Configuration management for the load balancer
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files. Every section falls back to its defaults so a
//! partial file only needs to name what differs.

use crate::error::{BalancerError, Result};
use crate::phase::Phase;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod defaults;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Main fuse and installation layout
    pub fuse: FuseConfig,

    /// Availability algorithm selection and thresholds
    pub balancer: BalancerConfig,

    /// Control cycle timing
    pub coordinator: CoordinatorConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Main fuse and installation layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuseConfig {
    /// Rated current of the main fuse per phase in amperes
    pub fuse_size: f64,

    /// Number of phases wired to the installation (1..=3)
    pub phase_count: u8,

    /// Optional lower ceiling for the whole installation in amperes.
    /// Zero disables it and the fuse size is used.
    pub max_fuse_load_amps: f64,
}

/// Which availability algorithm drives the allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalancerKind {
    /// Risk-accumulating controller with stability-gated recovery
    Optimised,

    /// Immediate cuts, median-smoothed recovery after a hysteresis period
    Hysteresis,
}

/// Balancer thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Algorithm variant
    pub kind: BalancerKind,

    /// Quiet period after an adjustment before recovery is considered (seconds)
    pub hold_off_period_s: f64,

    /// Accumulated risk at which a cut is issued
    pub trip_risk_threshold: f64,

    /// Risk removed per second of headroom
    pub risk_decay_per_second: f64,

    /// Maximum summed risk delta over the recovery history for a stable recovery
    pub recovery_risk_threshold: f64,

    /// Maximum population standard deviation of buffered headroom samples
    pub recovery_std: f64,

    /// Number of headroom samples kept per phase
    pub history_capacity: usize,
}

/// Control cycle timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Interval between control cycles in milliseconds
    pub cycle_interval_ms: u64,

    /// Minimum time between two charger writes in seconds. Gives the physical
    /// charger time to settle on a new limit before it is changed again.
    pub min_charger_update_delay_s: f64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console-specific level
    pub console_level: Option<String>,

    /// Optional file-specific level
    pub file_level: Option<String>,

    /// Path to log file (its directory receives the rolling files)
    pub file: String,

    /// Whether to write rolling log files
    pub file_output: bool,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,

    /// Number of rotated files to keep
    pub backup_count: u32,
}

impl FuseConfig {
    /// Effective per-phase ceiling in amperes
    pub fn ceiling(&self) -> f64 {
        if self.max_fuse_load_amps > 0.0 {
            self.fuse_size.min(self.max_fuse_load_amps)
        } else {
            self.fuse_size
        }
    }

    /// Phases wired to the installation
    pub fn phases(&self) -> Vec<Phase> {
        Phase::first(self.phase_count as usize).collect()
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the default locations, falling back to defaults
    pub fn load() -> Result<Self> {
        let default_paths = [
            "evse_load_balancer.yaml",
            "/data/evse_load_balancer.yaml",
            "/etc/evse-load-balancer/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Ok(Config::default())
    }

    /// Load from an explicit path when given, otherwise search the default locations
    pub fn load_from(path: Option<PathBuf>) -> Result<Self> {
        let config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::load()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.fuse.validate()?;
        self.balancer.validate()?;
        self.coordinator.validate()?;

        if crate::logging::parse_log_level(&self.logging.level).is_err() {
            return Err(BalancerError::validation(
                "logging.level",
                format!("Unknown log level: {}", self.logging.level),
            ));
        }

        Ok(())
    }
}

impl FuseConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.fuse_size.is_finite() || self.fuse_size <= 0.0 {
            return Err(BalancerError::validation(
                "fuse.fuse_size",
                "Must be positive",
            ));
        }

        if self.phase_count == 0 || self.phase_count > 3 {
            return Err(BalancerError::validation(
                "fuse.phase_count",
                "Must be between 1 and 3",
            ));
        }

        if !self.max_fuse_load_amps.is_finite() || self.max_fuse_load_amps < 0.0 {
            return Err(BalancerError::validation(
                "fuse.max_fuse_load_amps",
                "Must be zero or positive",
            ));
        }

        Ok(())
    }
}

impl BalancerConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("balancer.trip_risk_threshold", self.trip_risk_threshold),
            ("balancer.recovery_std", self.recovery_std),
        ];
        for (field, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(BalancerError::validation(field, "Must be positive"));
            }
        }

        let non_negative = [
            ("balancer.hold_off_period_s", self.hold_off_period_s),
            ("balancer.risk_decay_per_second", self.risk_decay_per_second),
            ("balancer.recovery_risk_threshold", self.recovery_risk_threshold),
        ];
        for (field, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(BalancerError::validation(field, "Must be zero or positive"));
            }
        }

        if self.history_capacity == 0 {
            return Err(BalancerError::validation(
                "balancer.history_capacity",
                "Must be greater than 0",
            ));
        }

        Ok(())
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cycle_interval_ms == 0 {
            return Err(BalancerError::validation(
                "coordinator.cycle_interval_ms",
                "Must be greater than 0",
            ));
        }

        if !self.min_charger_update_delay_s.is_finite() || self.min_charger_update_delay_s < 0.0 {
            return Err(BalancerError::validation(
                "coordinator.min_charger_update_delay_s",
                "Must be zero or positive",
            ));
        }

        Ok(())
    }
}
