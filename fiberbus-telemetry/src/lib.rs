//! # fiberbus telemetry
//!
//! Log subscriber setup and Prometheus export of bus counters.

pub mod logging;
pub mod metrics;

pub use logging::BusLogger;
pub use metrics::MetricsRecorder;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Metrics registry error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("Metrics output is not UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),

    #[error("Log filter error: {0}")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("A global log subscriber is already installed")]
    AlreadyInitialized,
}
