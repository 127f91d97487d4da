//! Logging and metrics settings.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::validation;

#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// Fallback filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    #[validate(custom(function = validation::validate_log_level))]
    pub log_level: String,

    /// Publish bus counters to the Prometheus registry.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_true() -> bool {
    true
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics: default_true(),
        }
    }
}
