//! Simulator settings.

use std::path::{Path, PathBuf};

use figment::providers::{Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::ConfigError;

#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct SimulatorConfig {
    /// Virtual milliseconds between scheduler ticks.
    #[serde(default = "default_tick_period")]
    #[validate(range(min = 1, max = 1000))]
    pub tick_period_ms: u64,

    /// Seed for generated scenarios.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_tick_period() -> u64 {
    6
}

fn default_seed() -> u64 {
    42
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: default_tick_period(),
            seed: default_seed(),
        }
    }
}

impl SimulatorConfig {
    /// Loads a standalone simulator section from `path`.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Yaml::file(path))
            .extract()?;
        config.validate()?;
        Ok(config)
    }
}
