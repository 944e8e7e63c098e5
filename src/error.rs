//! Error types and handling for the load balancer
//!
//! The control core itself never fails at runtime: missing data is skipped and
//! registration problems are reported as booleans. Errors in this module cover
//! the edges around it: configuration, charger I/O and file handling.

use thiserror::Error;

/// Result type alias for load balancer operations
pub type Result<T> = std::result::Result<T, BalancerError>;

/// Main error type for the load balancer
#[derive(Debug, Error)]
pub enum BalancerError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors (thresholds out of range, bad phase counts, ...)
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Charger adapter errors (registration refused, write failed)
    #[error("Charger error: {message}")]
    Charger { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },
}

impl BalancerError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        BalancerError::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<F: Into<String>, S: Into<String>>(field: F, message: S) -> Self {
        BalancerError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new charger error
    pub fn charger<S: Into<String>>(message: S) -> Self {
        BalancerError::Charger {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        BalancerError::Io {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for BalancerError {
    fn from(err: std::io::Error) -> Self {
        BalancerError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for BalancerError {
    fn from(err: serde_yaml::Error) -> Self {
        BalancerError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for BalancerError {
    fn from(err: serde_json::Error) -> Self {
        BalancerError::Serialization {
            message: err.to_string(),
        }
    }
}
