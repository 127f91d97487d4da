//! ## fiberbus-core::listener
//! **A registered subscription: filters, callback, flags and busy state**

pub mod callback;
pub mod flags;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU16, Ordering};

use critical_section::Mutex;

pub use callback::{BoundCallback, Callback, CallbackId, CallbackKind};
pub use flags::ListenerFlags;

use crate::events::{Event, ANY_SOURCE, ANY_VALUE};
use crate::scheduler::FiberLock;

#[derive(Debug, Default)]
struct ListenerState {
    /// Invocations currently inside the callback.
    active: u16,
    pending: VecDeque<Event>,
}

/// Outcome of offering an event to a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// The caller has entered the listener and must run the callback, then
    /// call [`Listener::next_or_leave`] until it returns `None`.
    Run,
    Dropped,
    Queued,
    Overflowed,
}

pub struct Listener {
    source: u16,
    value: u16,
    callback: Callback,
    flags: AtomicU16,
    /// Touched from interrupt context by urgent sends.
    state: Mutex<RefCell<ListenerState>>,
    lock: Box<dyn FiberLock>,
}

impl Listener {
    /// State bits in `flags` are ignored.
    pub fn new(
        source: u16,
        value: u16,
        callback: Callback,
        flags: ListenerFlags,
        lock: Box<dyn FiberLock>,
    ) -> Self {
        Self {
            source,
            value,
            callback,
            flags: AtomicU16::new(flags.without_state_bits().bits()),
            state: Mutex::new(RefCell::new(ListenerState::default())),
            lock,
        }
    }

    #[inline]
    pub fn source(&self) -> u16 {
        self.source
    }

    #[inline]
    pub fn value(&self) -> u16 {
        self.value
    }

    #[inline]
    pub fn callback(&self) -> &Callback {
        &self.callback
    }

    #[inline]
    pub fn flags(&self) -> ListenerFlags {
        ListenerFlags::from_bits_retain(self.flags.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_busy(&self) -> bool {
        self.flags().contains(ListenerFlags::BUSY)
    }

    #[inline]
    pub fn is_deleting(&self) -> bool {
        self.flags().contains(ListenerFlags::DELETING)
    }

    /// Declared `IMMEDIATE`.
    #[inline]
    pub fn is_immediate(&self) -> bool {
        self.flags().contains(ListenerFlags::IMMEDIATE)
    }

    pub fn pending_len(&self) -> usize {
        critical_section::with(|cs| self.state.borrow_ref(cs).pending.len())
    }

    /// Whether this listener's filters accept `event`.
    #[inline]
    pub fn matches(&self, event: &Event) -> bool {
        (self.source == ANY_SOURCE || self.source == event.source())
            && (self.value == ANY_VALUE || self.value == event.value())
    }

    /// Same filters and callback identity.
    pub(crate) fn same_registration(&self, other: &Listener) -> bool {
        self.source == other.source
            && self.value == other.value
            && self.callback.id() == other.callback.id()
    }

    /// Sets `DELETING`, returning whether it was previously clear.
    pub(crate) fn mark_deleting(&self) -> bool {
        let previous = self
            .flags
            .fetch_or(ListenerFlags::DELETING.bits(), Ordering::AcqRel);
        !ListenerFlags::from_bits_retain(previous).contains(ListenerFlags::DELETING)
    }

    /// Clears `DELETING`, returning whether it was set.
    pub(crate) fn resurrect(&self) -> bool {
        let previous = self
            .flags
            .fetch_and(!ListenerFlags::DELETING.bits(), Ordering::AcqRel);
        ListenerFlags::from_bits_retain(previous).contains(ListenerFlags::DELETING)
    }

    pub(crate) fn lock(&self) -> &dyn FiberLock {
        self.lock.as_ref()
    }

    pub(crate) fn invoke(&self, event: Event) {
        self.callback.invoke(event)
    }

    /// Offers `event`. A busy listener drops it (`DROP_IF_BUSY`), holds it
    /// when `queue_when_busy` and `QUEUE_IF_BUSY` are both set, or otherwise
    /// admits an overlapping invocation.
    pub(crate) fn admit(&self, event: Event, queue_when_busy: bool, depth: usize) -> Admission {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if state.active > 0 {
                let flags = self.flags();
                if flags.contains(ListenerFlags::DROP_IF_BUSY) {
                    return Admission::Dropped;
                }
                if queue_when_busy && flags.contains(ListenerFlags::QUEUE_IF_BUSY) {
                    if state.pending.len() >= depth {
                        return Admission::Overflowed;
                    }
                    state.pending.push_back(event);
                    return Admission::Queued;
                }
            }
            state.active += 1;
            self.flags
                .fetch_or(ListenerFlags::BUSY.bits(), Ordering::AcqRel);
            Admission::Run
        })
    }

    /// After an invocation: hands back the next held event, or leaves the
    /// listener. Both happen in one critical section, so an event admitted
    /// as `Queued` is always picked up by the invocation still inside.
    pub(crate) fn next_or_leave(&self) -> Option<Event> {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            if self.flags().contains(ListenerFlags::QUEUE_IF_BUSY) {
                if let Some(event) = state.pending.pop_front() {
                    return Some(event);
                }
            }
            state.active = state.active.saturating_sub(1);
            if state.active == 0 {
                self.flags
                    .fetch_and(!ListenerFlags::BUSY.bits(), Ordering::AcqRel);
            }
            None
        })
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("source", &self.source)
            .field("value", &self.value)
            .field("callback", &self.callback)
            .field("flags", &self.flags())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::NoopLock;

    fn nothing(_: Event) {}

    fn listener(source: u16, value: u16, flags: ListenerFlags) -> Listener {
        Listener::new(source, value, Callback::function(nothing), flags, Box::new(NoopLock))
    }

    #[test]
    fn wildcards_match_any_field() {
        let any = listener(ANY_SOURCE, ANY_VALUE, ListenerFlags::default());
        let by_source = listener(7, ANY_VALUE, ListenerFlags::default());
        let exact = listener(7, 3, ListenerFlags::default());

        assert!(any.matches(&Event::new(9, 9)));
        assert!(by_source.matches(&Event::new(7, 42)));
        assert!(!by_source.matches(&Event::new(8, 42)));
        assert!(exact.matches(&Event::new(7, 3)));
        assert!(!exact.matches(&Event::new(7, 4)));
    }

    #[test]
    fn busy_tracks_nested_invocations() {
        let l = listener(1, 1, ListenerFlags::REENTRANT);
        assert_eq!(l.admit(Event::new(1, 1), true, 4), Admission::Run);
        assert_eq!(l.admit(Event::new(1, 1), true, 4), Admission::Run);
        assert!(l.is_busy());

        assert_eq!(l.next_or_leave(), None);
        assert!(l.is_busy(), "inner exit must not clear BUSY");
        assert_eq!(l.next_or_leave(), None);
        assert!(!l.is_busy());
    }

    #[test]
    fn busy_listener_queues_then_overflows() {
        let l = listener(1, 1, ListenerFlags::QUEUE_IF_BUSY);
        assert_eq!(l.admit(Event::new(1, 1), true, 2), Admission::Run);
        assert_eq!(l.admit(Event::new(1, 2), true, 2), Admission::Queued);
        assert_eq!(l.admit(Event::new(1, 3), true, 2), Admission::Queued);
        assert_eq!(l.admit(Event::new(1, 4), true, 2), Admission::Overflowed);
        assert_eq!(l.pending_len(), 2);

        assert_eq!(l.next_or_leave(), Some(Event::new(1, 2)));
        assert_eq!(l.next_or_leave(), Some(Event::new(1, 3)));
        assert_eq!(l.next_or_leave(), None);
        assert!(!l.is_busy());
    }

    #[test]
    fn queue_if_busy_without_queueing_overlaps() {
        let l = listener(1, 1, ListenerFlags::QUEUE_IF_BUSY);
        assert_eq!(l.admit(Event::new(1, 1), false, 2), Admission::Run);
        assert_eq!(l.admit(Event::new(1, 2), false, 2), Admission::Run);
        assert_eq!(l.pending_len(), 0);
    }

    #[test]
    fn busy_listener_drops() {
        let l = listener(1, 1, ListenerFlags::DROP_IF_BUSY);
        assert_eq!(l.admit(Event::new(1, 1), true, 2), Admission::Run);
        assert_eq!(l.admit(Event::new(1, 2), true, 2), Admission::Dropped);
    }

    #[test]
    fn deleting_toggles() {
        let l = listener(1, 1, ListenerFlags::default());
        assert!(l.mark_deleting());
        assert!(!l.mark_deleting());
        assert!(l.is_deleting());
        assert!(l.resurrect());
        assert!(!l.is_deleting());
        assert!(!l.resurrect());
    }

    #[test]
    fn state_bits_are_not_accepted_at_construction() {
        let l = listener(1, 1, ListenerFlags::BUSY | ListenerFlags::DELETING);
        assert!(!l.is_busy());
        assert!(!l.is_deleting());
    }
}
