//! ## fiberbus-core::dispatch
//! **Delivery of one event to the listeners that match it**
//!
//! A pass visits the registry in filter order and activates every matching
//! listener whose urgency equals the pass's. Listeners of the other urgency,
//! and tombstones, make the pass incomplete, which tells `send` the event
//! still has to be queued for the standard pass.

use std::sync::Arc;

use tracing::{trace, warn};

use crate::bus::ConcurrencyMode;
use crate::events::Event;
use crate::listener::{Admission, Listener, ListenerFlags};
use crate::registry::Registry;
use crate::scheduler::Scheduler;
use crate::stats::BusStats;

/// Everything a delivery needs. Cheap to clone into a fiber task.
#[derive(Clone)]
pub(crate) struct Dispatcher {
    pub(crate) registry: Arc<Registry>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) stats: Arc<BusStats>,
    pub(crate) mode: ConcurrencyMode,
    pub(crate) listener_queue_depth: usize,
}

impl Dispatcher {
    /// Whether `listener` is serviced in the urgent pass.
    ///
    /// Declared `IMMEDIATE` listeners always are. Before the scheduler is
    /// running there is no thread context that would ever drain the queue,
    /// so every listener is treated as urgent and served at send time.
    pub(crate) fn is_urgent(&self, listener: &Listener) -> bool {
        !self.scheduler.is_running() || listener.is_immediate()
    }

    /// Runs one pass. Returns `true` if every matching listener was
    /// dispatched.
    pub(crate) fn process(&self, event: Event, urgent: bool) -> bool {
        let mut complete = true;

        for listener in self.registry.snapshot() {
            if !listener.matches(&event) {
                continue;
            }
            if self.is_urgent(&listener) != urgent || listener.is_deleting() {
                complete = false;
                continue;
            }

            trace!(
                source = event.source(),
                value = event.value(),
                listener_source = listener.source(),
                listener_value = listener.value(),
                urgent,
                "Dispatching"
            );

            let deferrable = self.mode == ConcurrencyMode::ConcurrentListeners
                && !listener.flags().contains(ListenerFlags::NONBLOCKING)
                && self.scheduler.is_running();
            if deferrable {
                let this = self.clone();
                self.scheduler
                    .invoke(Box::new(move || this.activate(&listener, event)));
            } else {
                self.activate(&listener, event);
            }
        }

        complete
    }

    /// Delivers `event` to one listener, honouring its busy policy, then
    /// works through anything it held back while running.
    pub(crate) fn activate(&self, listener: &Listener, event: Event) {
        let queue_when_busy = self.mode == ConcurrencyMode::ConcurrentListeners;
        match listener.admit(event, queue_when_busy, self.listener_queue_depth) {
            Admission::Run => {}
            Admission::Dropped => {
                self.stats.record_busy_drop();
                trace!(source = event.source(), value = event.value(), "Busy listener dropped event");
                return;
            }
            Admission::Queued => {
                trace!(
                    source = event.source(),
                    value = event.value(),
                    pending = listener.pending_len(),
                    "Busy listener queued event"
                );
                return;
            }
            Admission::Overflowed => {
                self.stats.record_listener_overflow();
                warn!(
                    source = event.source(),
                    value = event.value(),
                    depth = self.listener_queue_depth,
                    "Listener queue full, event dropped"
                );
                return;
            }
        }

        let serialized = self.mode == ConcurrencyMode::ConcurrentEvents;
        if serialized {
            listener.lock().wait();
        }

        let mut current = event;
        loop {
            listener.invoke(current);
            self.stats.record_delivery();

            match listener.next_or_leave() {
                Some(next) => {
                    current = next;
                    self.scheduler.schedule();
                }
                None => break,
            }
        }

        if serialized {
            listener.lock().notify();
        }
    }
}
