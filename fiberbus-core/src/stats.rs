//! ## fiberbus-core::stats
//! **Bus activity counters**
//!
//! Relaxed atomics, cheap enough to bump from interrupt context. Exported to
//! Prometheus by `fiberbus-telemetry`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct BusStats {
    events_sent: AtomicU64,
    events_queued: AtomicU64,
    queue_overflows: AtomicU64,
    deliveries: AtomicU64,
    busy_drops: AtomicU64,
    listener_overflows: AtomicU64,
    listeners_collected: AtomicU64,
}

/// Point-in-time copy of [`BusStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub events_sent: u64,
    pub events_queued: u64,
    pub queue_overflows: u64,
    pub deliveries: u64,
    pub busy_drops: u64,
    pub listener_overflows: u64,
    pub listeners_collected: u64,
}

impl BusStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_sent(&self) {
        self.events_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_queued(&self) {
        self.events_queued.fetch_add(1, Ordering::Relaxed);
    }

    /// An event was refused because the global queue was full.
    #[inline]
    pub fn record_queue_overflow(&self) {
        self.queue_overflows.fetch_add(1, Ordering::Relaxed);
    }

    /// One callback invocation completed.
    #[inline]
    pub fn record_delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    /// A `DROP_IF_BUSY` listener discarded an event.
    #[inline]
    pub fn record_busy_drop(&self) {
        self.busy_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// A `QUEUE_IF_BUSY` listener's private queue was full.
    #[inline]
    pub fn record_listener_overflow(&self) {
        self.listener_overflows.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_collected(&self, count: usize) {
        self.listeners_collected
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            events_sent: self.events_sent.load(Ordering::Relaxed),
            events_queued: self.events_queued.load(Ordering::Relaxed),
            queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            busy_drops: self.busy_drops.load(Ordering::Relaxed),
            listener_overflows: self.listener_overflows.load(Ordering::Relaxed),
            listeners_collected: self.listeners_collected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_increment_and_read() {
        let stats = BusStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());

        stats.record_sent();
        stats.record_queued();
        stats.record_delivery();
        stats.record_collected(3);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.events_sent, 1);
        assert_eq!(snapshot.events_queued, 1);
        assert_eq!(snapshot.deliveries, 1);
        assert_eq!(snapshot.listeners_collected, 3);
    }

    #[test]
    fn test_stats_multiple_increments() {
        let stats = BusStats::new();
        for _ in 0..100 {
            stats.record_queue_overflow();
            stats.record_busy_drop();
            stats.record_listener_overflow();
        }

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.queue_overflows, 100);
        assert_eq!(snapshot.busy_drops, 100);
        assert_eq!(snapshot.listener_overflows, 100);
    }
}
