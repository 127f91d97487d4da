use std::str::FromStr;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::BusError;

bitflags! {
    /// Behaviour and state bits of a listener.
    ///
    /// `BUSY` and `DELETING` are managed by the bus and refused by `listen`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ListenerFlags: u16 {
        /// Callback currently executing.
        const BUSY          = 0x0004;
        /// Deliver even while busy, overlapping the running invocation.
        const REENTRANT     = 0x0008;
        /// Hold events that arrive while busy in the listener's private queue.
        const QUEUE_IF_BUSY = 0x0010;
        /// Discard events that arrive while busy.
        const DROP_IF_BUSY  = 0x0020;
        /// Trusted, short callback: always runs inline, never on a new fiber.
        const NONBLOCKING   = 0x0040;
        const URGENT        = 0x0080;
        /// Tombstoned, awaiting garbage collection.
        const DELETING      = 0x8000;
    }
}

impl ListenerFlags {
    /// Serviced synchronously at send time, before the event is queued.
    pub const IMMEDIATE: Self = Self::NONBLOCKING.union(Self::URGENT);

    const STATE: Self = Self::BUSY.union(Self::DELETING);

    /// Whether any bit is reserved for state the bus manages itself.
    #[inline]
    pub const fn has_state_bits(self) -> bool {
        self.intersects(Self::STATE)
    }

    #[inline]
    pub const fn without_state_bits(self) -> Self {
        self.difference(Self::STATE)
    }

    /// Parses a flag name a caller may pass to `listen` (case-insensitive).
    /// State bits have no name here.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "reentrant" => Some(Self::REENTRANT),
            "queue_if_busy" => Some(Self::QUEUE_IF_BUSY),
            "drop_if_busy" => Some(Self::DROP_IF_BUSY),
            "nonblocking" => Some(Self::NONBLOCKING),
            "urgent" => Some(Self::URGENT),
            "immediate" => Some(Self::IMMEDIATE),
            _ => None,
        }
    }
}

/// `QUEUE_IF_BUSY`.
impl Default for ListenerFlags {
    fn default() -> Self {
        Self::QUEUE_IF_BUSY
    }
}

impl FromStr for ListenerFlags {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or(BusError::InvalidParameter)
    }
}
