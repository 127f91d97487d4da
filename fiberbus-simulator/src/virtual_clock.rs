//! # Virtual clock
//!
//! Simulated time in nanoseconds. Only the idle fiber moves it forward, so
//! every run of a scenario sees the same timestamps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, Default)]
pub struct VirtualClock {
    now: Arc<AtomicU64>,
}

impl VirtualClock {
    pub fn new(start_ns: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ns)),
        }
    }

    #[inline]
    pub fn now_ns(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }

    #[inline]
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(duration_ns(by), Ordering::AcqRel);
    }

    /// Moves the clock to `ns` unless it is already past it.
    #[inline]
    pub fn advance_to(&self, ns: u64) {
        self.now.fetch_max(ns, Ordering::AcqRel);
    }
}

/// Saturating conversion; a simulation never runs for 584 years.
pub(crate) fn duration_ns(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
