//! # fiberbus-core
//!
//! Event-delivery core for a single-core device runtime: a publish/subscribe bus
//! shared between interrupt handlers (producers) and a cooperative fiber
//! scheduler (consumers).
//!
//! ### Key Submodules:
//! - `events`: the `Event` value type and the interrupt-safe event queue
//! - `alloc`: fixed-capacity node slab backing the event queue
//! - `listener`: listener filters, callback shapes, flags and busy state
//! - `registry`: the ordered listener chain with tombstone garbage collection
//! - `dispatch`: matching and activation under the two concurrency policies
//! - `bus`: the public `listen` / `ignore` / `send` / `drain` surface
//! - `scheduler`: the contract the bus expects from the fiber scheduler
//!
//! ```
//! use std::sync::Arc;
//! use fiberbus_core::prelude::*;
//!
//! fn on_click(_event: Event) {}
//!
//! let bus = Bus::new(BusOptions::default(), Arc::new(NoScheduler)).unwrap();
//! bus.listen(1, 2, on_click, ListenerFlags::default()).unwrap();
//! bus.send(Event::new(1, 2)).unwrap();
//! ```

pub mod alloc;
pub mod bus;
mod dispatch;
pub mod error;
pub mod events;
pub mod listener;
pub mod registry;
pub mod scheduler;
pub mod stats;

pub mod prelude {
    pub use crate::bus::*;
    pub use crate::error::*;
    pub use crate::events::*;
    pub use crate::listener::*;
    pub use crate::scheduler::*;
    pub use crate::stats::*;
}

pub use bus::{Bus, BusOptions, ConcurrencyMode};
pub use error::BusError;
pub use events::{Event, LaunchMode, TickSource, ANY_SOURCE, ANY_VALUE};
pub use listener::{Callback, Listener, ListenerFlags};
pub use scheduler::{FiberLock, IdleComponent, InlineScheduler, NoScheduler, Scheduler, Task};
