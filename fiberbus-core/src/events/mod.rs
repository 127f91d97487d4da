//! ## fiberbus-core::events
//! **Event values and the interrupt-safe event queue**
//!
//! An [`Event`] is a `(source, value)` pair. Both halves are plain `u16`
//! identifiers; `0` is reserved in each as a wildcard for listener filters.
//! Every event also carries the tick count at which it was created, read
//! from the [`TickSource`] installed on the creating thread.

pub mod queue;

use std::cell::RefCell;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use queue::{EventQueue, TailMark};

/// Wildcard source: a listener filtering on this receives events from every source.
pub const ANY_SOURCE: u16 = 0;

/// Wildcard value: a listener filtering on this receives every value of its source.
pub const ANY_VALUE: u16 = 0;

/// Source id of the notice the bus raises after a listener is registered.
/// The notice's value is the new listener's source filter.
pub const ID_MESSAGE_BUS_LISTENER: u16 = 1021;

/// Millisecond clock provided by the scheduler.
pub type TickSource = Arc<dyn Fn() -> u64 + Send + Sync>;

thread_local! {
    static TICKS: RefCell<Option<TickSource>> = const { RefCell::new(None) };
}

/// Installs `source` as the clock [`Event::new`] reads on the calling
/// thread, replacing any previous one. `None` uninstalls.
pub fn set_tick_source(source: Option<TickSource>) {
    let previous = TICKS.with(|ticks| ticks.replace(source));
    drop(previous);
}

/// Current tick count on this thread, `0` without a tick source.
pub fn ticks() -> u64 {
    let source = TICKS.with(|ticks| ticks.borrow().clone());
    source.map_or(0, |now| now())
}

/// Immutable signal distributed over the bus.
///
/// Equality and hashing look at `(source, value)` only.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct Event {
    source: u16,
    value: u16,
    #[serde(default)]
    timestamp: u64,
}

impl Event {
    /// Stamps the event with the current [`ticks`].
    #[inline]
    pub fn new(source: u16, value: u16) -> Self {
        Self::at(source, value, ticks())
    }

    /// An event with an explicit timestamp, for replays.
    #[inline]
    pub const fn at(source: u16, value: u16, timestamp: u64) -> Self {
        Self {
            source,
            value,
            timestamp,
        }
    }

    /// Id of the component that raised the event.
    #[inline]
    pub const fn source(&self) -> u16 {
        self.source
    }

    /// Component specific code describing what happened.
    #[inline]
    pub const fn value(&self) -> u16 {
        self.value
    }

    /// Tick count at creation, in milliseconds.
    #[inline]
    pub const fn timestamp(&self) -> u64 {
        self.timestamp
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.value == other.value
    }
}

impl Eq for Event {}

impl Hash for Event {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.source.hash(state);
        self.value.hash(state);
    }
}

/// How [`crate::Bus::raise`] delivers a freshly created event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LaunchMode {
    /// Build the event only; nothing is delivered.
    CreateOnly,
    /// Urgent listeners now, standard listeners on the next drain pass.
    #[default]
    CreateAndQueue,
    /// Every matching listener now, in the caller's context, bypassing the queue.
    CreateAndFire,
}
