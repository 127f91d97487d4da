//! # fiberbus configuration
//!
//! Layered settings for the bus, its telemetry and the simulator.
//!
//! Sources, later ones overriding earlier ones:
//! 1. Built-in defaults
//! 2. `config/fiberbus.yaml`
//! 3. `config/<FIBERBUS_ENV>.yaml` (`FIBERBUS_ENV` defaults to `development`)
//! 4. `FIBERBUS_*` environment variables, `__` separating nested keys
//!    (`FIBERBUS_BUS__EVENT_QUEUE_DEPTH=32`)

#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use validator::Validate;

mod bus;
mod error;
mod simulator;
mod telemetry;
mod validation;

pub use bus::BusConfig;
pub use error::ConfigError;
pub use simulator::SimulatorConfig;
pub use telemetry::TelemetryConfig;

const BASE_FILE: &str = "config/fiberbus.yaml";
const ENV_PREFIX: &str = "FIBERBUS_";

#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone, PartialEq)]
pub struct FiberbusConfig {
    #[validate(nested)]
    #[serde(default)]
    pub bus: BusConfig,

    #[validate(nested)]
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    #[validate(nested)]
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

impl FiberbusConfig {
    /// Loads the layered configuration described in the crate docs.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(FiberbusConfig::default()));

        if Path::new(BASE_FILE).exists() {
            figment = figment.merge(Yaml::file(BASE_FILE));
        } else {
            debug!("{BASE_FILE} not found, using defaults");
        }

        let env = std::env::var("FIBERBUS_ENV").unwrap_or_else(|_| "development".into());
        let env_file = format!("config/{env}.yaml");
        if Path::new(&env_file).exists() {
            figment = figment.merge(Yaml::file(env_file));
        }

        Self::finish(figment)
    }

    /// Loads `path` over the defaults, then environment overrides.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        let figment =
            Figment::from(Serialized::defaults(FiberbusConfig::default())).merge(Yaml::file(path));
        Self::finish(figment)
    }

    fn finish(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fiberbus_core::ConcurrencyMode;
    use figment::Jail;

    #[test]
    fn defaults_validate() {
        FiberbusConfig::default()
            .validate()
            .expect("default config should validate");
    }

    #[test]
    fn layers_files_then_environment() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/fiberbus.yaml",
                r#"
bus:
  event_queue_depth: 32
  concurrency_mode: concurrent_events
telemetry:
  log_level: debug
"#,
            )?;
            jail.create_file(
                "config/staging.yaml",
                r#"
bus:
  listener_queue_depth: 4
"#,
            )?;
            jail.set_env("FIBERBUS_ENV", "staging");
            jail.set_env("FIBERBUS_SIMULATOR__SEED", "7");

            let config = FiberbusConfig::load().expect("config should load");
            assert_eq!(config.bus.event_queue_depth, 32);
            assert_eq!(config.bus.listener_queue_depth, 4);
            assert_eq!(config.bus.concurrency_mode, ConcurrencyMode::ConcurrentEvents);
            assert_eq!(config.telemetry.log_level, "debug");
            assert_eq!(config.simulator.seed, 7);
            assert_eq!(config.simulator.tick_period_ms, 6);
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_nested_fields() {
        Jail::expect_with(|jail| {
            jail.set_env("FIBERBUS_BUS__EVENT_QUEUE_DEPTH", "128");
            let config = FiberbusConfig::load().expect("config should load");
            assert_eq!(config.bus.event_queue_depth, 128);
            Ok(())
        });
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("bad.yaml", "bus:\n  event_queue_depth: 0\n")?;
            let err = FiberbusConfig::load_from_path("bad.yaml").unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)), "{err}");
            Ok(())
        });
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("noisy.yaml", "telemetry:\n  log_level: loud\n")?;
            let err = FiberbusConfig::load_from_path("noisy.yaml").unwrap_err();
            assert!(err.to_string().contains("log_level"), "{err}");
            Ok(())
        });
    }

    #[test]
    fn missing_file_is_reported() {
        let err = FiberbusConfig::load_from_path("does/not/exist.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }
}
