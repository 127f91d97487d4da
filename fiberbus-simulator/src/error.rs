use fiberbus_config::ConfigError;
use fiberbus_core::BusError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scenario parsing error: {0}")]
    Scenario(#[from] serde_yaml::Error),

    #[error("Scenario file not found: {0}")]
    ScenarioNotFound(std::path::PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unknown listener: {0}")]
    UnknownListener(String),

    #[error("Duplicate listener name: {0}")]
    DuplicateListener(String),

    #[error("Invalid listener flag: {0}")]
    InvalidFlag(String),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}
