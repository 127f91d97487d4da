//! ## fiberbus-telemetry::metrics
//! **Prometheus export of bus counters**
//!
//! The bus keeps its own atomic counters; [`MetricsRecorder::record`] copies
//! a snapshot into gauges so the registry can be scraped or printed.

use fiberbus_core::stats::StatsSnapshot;
use fiberbus_core::Bus;
use prometheus::{Encoder, IntGauge, Registry, TextEncoder};

use crate::TelemetryError;

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    events_sent: IntGauge,
    events_queued: IntGauge,
    queue_overflows: IntGauge,
    deliveries: IntGauge,
    busy_drops: IntGauge,
    listener_overflows: IntGauge,
    listeners_collected: IntGauge,
    listeners: IntGauge,
    queue_length: IntGauge,
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, TelemetryError> {
    let gauge = IntGauge::new(name, help)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

impl MetricsRecorder {
    pub fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new();
        Ok(Self {
            events_sent: gauge(&registry, "fiberbus_events_sent_total", "Events passed to send")?,
            events_queued: gauge(
                &registry,
                "fiberbus_events_queued_total",
                "Events linked into the global queue",
            )?,
            queue_overflows: gauge(
                &registry,
                "fiberbus_queue_overflows_total",
                "Events dropped because the global queue was full",
            )?,
            deliveries: gauge(
                &registry,
                "fiberbus_deliveries_total",
                "Completed callback invocations",
            )?,
            busy_drops: gauge(
                &registry,
                "fiberbus_busy_drops_total",
                "Events discarded by busy drop-if-busy listeners",
            )?,
            listener_overflows: gauge(
                &registry,
                "fiberbus_listener_overflows_total",
                "Events dropped because a listener queue was full",
            )?,
            listeners_collected: gauge(
                &registry,
                "fiberbus_listeners_collected_total",
                "Tombstoned listeners unlinked by garbage collection",
            )?,
            listeners: gauge(&registry, "fiberbus_listeners", "Registered listeners")?,
            queue_length: gauge(&registry, "fiberbus_queue_length", "Events awaiting delivery")?,
            registry,
        })
    }

    pub fn record(&self, stats: &StatsSnapshot) {
        let set = |gauge: &IntGauge, value: u64| gauge.set(i64::try_from(value).unwrap_or(i64::MAX));
        set(&self.events_sent, stats.events_sent);
        set(&self.events_queued, stats.events_queued);
        set(&self.queue_overflows, stats.queue_overflows);
        set(&self.deliveries, stats.deliveries);
        set(&self.busy_drops, stats.busy_drops);
        set(&self.listener_overflows, stats.listener_overflows);
        set(&self.listeners_collected, stats.listeners_collected);
    }

    /// Counters plus the current registry and queue sizes.
    pub fn record_bus(&self, bus: &Bus) {
        self.record(&bus.stats());
        self.listeners.set(bus.listener_count() as i64);
        self.queue_length.set(bus.queued() as i64);
    }

    pub fn gather_metrics(&self) -> Result<String, TelemetryError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
