//! ## fiberbus-telemetry::logging
//! **`tracing` subscriber setup**
//!
//! `RUST_LOG` wins when set; otherwise the configured level applies.

use fiberbus_core::stats::StatsSnapshot;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use crate::TelemetryError;

#[derive(Clone, Copy, Debug)]
pub struct BusLogger;

impl BusLogger {
    /// Installs the global formatter. Fails if one is already installed.
    pub fn init(default_level: &str) -> Result<(), TelemetryError> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(default_level)?,
        };

        fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .with_target(false)
            .try_init()
            .map_err(|_| TelemetryError::AlreadyInitialized)
    }

    /// One structured line summarising bus activity.
    pub fn log_stats(stats: &StatsSnapshot) {
        info!(
            sent = stats.events_sent,
            queued = stats.events_queued,
            queue_overflows = stats.queue_overflows,
            deliveries = stats.deliveries,
            busy_drops = stats.busy_drops,
            listener_overflows = stats.listener_overflows,
            collected = stats.listeners_collected,
            "Bus statistics"
        );
    }
}
