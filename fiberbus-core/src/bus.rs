//! ## fiberbus-core::bus
//! **Public surface of the event bus**
//!
//! ```text
//!  interrupt / fiber            thread context (idle pass)
//!  ─────────────────            ──────────────────────────
//!  send(e) ─► urgent pass       drain()
//!               │ incomplete       ├─ collect tombstones
//!               ▼                  └─ dequeue ─► standard pass
//!          EventQueue ─────────────────┘
//! ```
//!
//! `send` may be called from interrupt context: it only runs urgent
//! (`IMMEDIATE`) listeners, and the registry, listener state and queue it
//! touches are all guarded by critical sections. Everything else
//! (`listen*`, `ignore*`, `drain`) is thread context only.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dispatch::Dispatcher;
use crate::error::BusError;
use crate::events::{Event, EventQueue, LaunchMode, ID_MESSAGE_BUS_LISTENER};
use crate::listener::{Callback, CallbackId, Listener, ListenerFlags};
use crate::registry::{DeletionHook, ListenerKey, Registration, Registry};
use crate::scheduler::{IdleComponent, Scheduler};
use crate::stats::{BusStats, StatsSnapshot};

/// How overlapping deliveries are arranged. Fixed per bus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    /// Every blocking listener gets its own fiber; a busy listener queues or
    /// drops according to its flags.
    #[default]
    ConcurrentListeners,
    /// Each event is delivered on one fiber, listener after listener. A
    /// listener already handling an event is waited for, not queued.
    ConcurrentEvents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusOptions {
    /// Capacity of the global event queue.
    pub event_queue_depth: usize,
    /// Capacity of each listener's private queue.
    pub listener_queue_depth: usize,
    pub concurrency: ConcurrencyMode,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self {
            event_queue_depth: 10,
            listener_queue_depth: 10,
            concurrency: ConcurrencyMode::default(),
        }
    }
}

pub struct Bus {
    dispatcher: Dispatcher,
    queue: EventQueue,
    options: BusOptions,
}

impl Bus {
    pub fn new(options: BusOptions, scheduler: Arc<dyn Scheduler>) -> Result<Self, BusError> {
        if options.event_queue_depth == 0 || options.listener_queue_depth == 0 {
            return Err(BusError::InvalidParameter);
        }

        debug!(?options, "Creating event bus");
        Ok(Self {
            dispatcher: Dispatcher {
                registry: Arc::new(Registry::new()),
                scheduler,
                stats: Arc::new(BusStats::new()),
                mode: options.concurrency,
                listener_queue_depth: options.listener_queue_depth,
            },
            queue: EventQueue::with_capacity(options.event_queue_depth),
            options,
        })
    }

    /// Subscribes `handler` to events matching `source`/`value` (either may
    /// be a wildcard).
    pub fn listen(
        &self,
        source: u16,
        value: u16,
        handler: fn(Event),
        flags: ListenerFlags,
    ) -> Result<(), BusError> {
        self.register(source, value, Callback::function(handler), flags)
    }

    /// Subscribes `handler`, calling it with `context` on every delivery.
    pub fn listen_with<T: Send + Sync + 'static>(
        &self,
        source: u16,
        value: u16,
        handler: fn(Event, &T),
        context: Arc<T>,
        flags: ListenerFlags,
    ) -> Result<(), BusError> {
        self.register(source, value, Callback::with_context(handler, context), flags)
    }

    /// Subscribes `method` on `object`.
    pub fn listen_method<T: Send + Sync + 'static>(
        &self,
        source: u16,
        value: u16,
        object: &Arc<T>,
        method: fn(&T, Event),
        flags: ListenerFlags,
    ) -> Result<(), BusError> {
        self.register(source, value, Callback::method(object.clone(), method), flags)
    }

    fn register(
        &self,
        source: u16,
        value: u16,
        callback: Callback,
        flags: ListenerFlags,
    ) -> Result<(), BusError> {
        if flags.has_state_bits() {
            return Err(BusError::InvalidParameter);
        }

        let lock = self.dispatcher.scheduler.create_lock();
        let listener = Arc::new(Listener::new(source, value, callback, flags, lock));
        match self.dispatcher.registry.add(listener)? {
            Registration::Inserted => self.send(Event::new(ID_MESSAGE_BUS_LISTENER, source)),
            Registration::Revived => Ok(()),
        }
    }

    pub fn ignore(&self, source: u16, value: u16, handler: fn(Event)) -> Result<(), BusError> {
        self.unregister(source, value, CallbackId::function(handler))
    }

    /// Without a `context`, removes `handler` whatever context it was
    /// registered with.
    pub fn ignore_with<T>(
        &self,
        source: u16,
        value: u16,
        handler: fn(Event, &T),
        context: Option<&Arc<T>>,
    ) -> Result<(), BusError> {
        self.unregister(source, value, CallbackId::with_context(handler, context))
    }

    pub fn ignore_method<T>(
        &self,
        source: u16,
        value: u16,
        object: &Arc<T>,
        method: fn(&T, Event),
    ) -> Result<(), BusError> {
        self.unregister(source, value, CallbackId::method(object, method))
    }

    fn unregister(&self, source: u16, value: u16, callback: CallbackId) -> Result<(), BusError> {
        let key = ListenerKey {
            source,
            value,
            callback,
        };
        self.dispatcher.registry.remove(&key).map(|_| ())
    }

    /// Publishes `event`. Urgent listeners run before this returns; if any
    /// standard listener matches, the event is queued for [`Bus::drain`].
    ///
    /// A full queue drops the event (counted and logged); `send` still
    /// succeeds.
    pub fn send(&self, event: Event) -> Result<(), BusError> {
        self.dispatcher.stats.record_sent();

        let mark = self.queue.tail_mark();
        if self.dispatcher.process(event, true) {
            return Ok(());
        }

        match self.queue.enqueue_after(mark, event) {
            Ok(()) => self.dispatcher.stats.record_queued(),
            Err(_) => {
                self.dispatcher.stats.record_queue_overflow();
                warn!(
                    source = event.source(),
                    value = event.value(),
                    depth = self.queue.capacity(),
                    "Event queue full, event dropped"
                );
            }
        }
        Ok(())
    }

    /// `CreateAndFire` runs the standard pass on the spot and nothing else:
    /// urgent listeners are not visited, and the queue is bypassed.
    pub fn raise(&self, event: Event, mode: LaunchMode) -> Result<(), BusError> {
        match mode {
            LaunchMode::CreateOnly => Ok(()),
            LaunchMode::CreateAndQueue => self.send(event),
            LaunchMode::CreateAndFire => {
                self.dispatcher.stats.record_sent();
                self.dispatcher.process(event, false);
                Ok(())
            }
        }
    }

    /// One idle pass: collects idle tombstones, then delivers queued events
    /// to standard listeners until the queue is empty or another fiber
    /// becomes ready.
    pub fn drain(&self) {
        self.collect_garbage();

        let scheduler = &self.dispatcher.scheduler;
        while let Some(event) = self.queue.dequeue() {
            if self.options.concurrency == ConcurrencyMode::ConcurrentEvents
                && scheduler.is_running()
            {
                let dispatcher = self.dispatcher.clone();
                scheduler.invoke(Box::new(move || {
                    dispatcher.process(event, false);
                }));
            } else {
                self.dispatcher.process(event, false);
            }

            if !scheduler.runqueue_empty() {
                break;
            }
        }
    }

    /// Unlinks tombstoned listeners that are not running.
    pub fn collect_garbage(&self) -> usize {
        let collected = self.dispatcher.registry.collect_garbage();
        self.dispatcher.stats.record_collected(collected);
        collected
    }

    pub fn set_deletion_hook(&self, hook: DeletionHook) {
        self.dispatcher.registry.set_deletion_hook(hook);
    }

    pub fn clear_deletion_hook(&self) {
        self.dispatcher.registry.clear_deletion_hook();
    }

    /// Registered listeners, tombstones included.
    pub fn listener_count(&self) -> usize {
        self.dispatcher.registry.len()
    }

    /// The `n`th listener in registry order.
    pub fn find(&self, n: usize) -> Option<Arc<Listener>> {
        self.dispatcher.registry.find(n)
    }

    /// Events waiting in the global queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.dispatcher.stats.snapshot()
    }

    pub fn options(&self) -> BusOptions {
        self.options
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.dispatcher.scheduler
    }
}

impl IdleComponent for Bus {
    fn idle_tick(&self) {
        self.drain();
    }
}
