//! Ordered record of callback entries and exits during a run.

use std::fmt;

use blake3::Hasher;
use fiberbus_core::Event;
use parking_lot::Mutex;
use serde::Serialize;

use crate::fiber::FiberId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Enter,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEntry {
    pub at_ns: u64,
    /// Fiber the callback ran on.
    pub fiber: FiberId,
    pub listener: String,
    pub source: u16,
    pub value: u16,
    /// The event's own timestamp, in milliseconds.
    pub raised_ms: u64,
    pub phase: Phase,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>12} [{}] {:?} {} ({}, {}) @{}ms",
            self.at_ns,
            self.fiber,
            self.phase,
            self.listener,
            self.source,
            self.value,
            self.raised_ms
        )
    }
}

#[derive(Debug, Default)]
pub struct Trace {
    entries: Mutex<Vec<TraceEntry>>,
}

impl Trace {
    pub fn record(&self, at_ns: u64, fiber: FiberId, listener: &str, event: Event, phase: Phase) {
        self.entries.lock().push(TraceEntry {
            at_ns,
            fiber,
            listener: listener.to_owned(),
            source: event.source(),
            value: event.value(),
            raised_ms: event.timestamp(),
            phase,
        });
    }

    pub fn entries(&self) -> Vec<TraceEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Feeds every entry, in order, into `hasher`.
    pub fn digest(&self, hasher: &mut Hasher) {
        for entry in self.entries.lock().iter() {
            hasher.update(entry.to_string().as_bytes());
            hasher.update(b"\n");
        }
    }
}
