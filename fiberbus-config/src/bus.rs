//! Event bus sizing and concurrency policy.

use fiberbus_core::{BusOptions, ConcurrencyMode};
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate, Clone, PartialEq)]
pub struct BusConfig {
    /// Slots in the global event queue.
    #[serde(default = "default_depth")]
    #[validate(range(min = 1, max = 65536))]
    pub event_queue_depth: usize,

    /// Events a busy listener may hold back.
    #[serde(default = "default_depth")]
    #[validate(range(min = 1, max = 1024))]
    pub listener_queue_depth: usize,

    #[serde(default)]
    pub concurrency_mode: ConcurrencyMode,
}

fn default_depth() -> usize {
    10
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            event_queue_depth: default_depth(),
            listener_queue_depth: default_depth(),
            concurrency_mode: ConcurrencyMode::default(),
        }
    }
}

impl BusConfig {
    pub fn to_options(&self) -> BusOptions {
        BusOptions {
            event_queue_depth: self.event_queue_depth,
            listener_queue_depth: self.listener_queue_depth,
            concurrency: self.concurrency_mode,
        }
    }
}
