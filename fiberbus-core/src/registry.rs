//! ## fiberbus-core::registry
//! **Ordered set of listeners**
//!
//! Entries are kept sorted by `(source, value)`, ties in insertion order.
//! Removal only tombstones an entry (`DELETING`); [`Registry::collect_garbage`]
//! unlinks tombstones that are no longer busy.
//!
//! Urgent sends walk the chain from interrupt context, so it is only touched
//! inside `critical_section::with`, never under a blocking lock. No callback,
//! hook or listener drop runs inside the critical section: dispatch walks a
//! [`Registry::snapshot`].

use std::cell::RefCell;
use std::sync::Arc;

use critical_section::Mutex;
use tracing::debug;

use crate::error::BusError;
use crate::listener::{CallbackId, Listener};

/// Called once for each listener tombstoned by [`Registry::remove`].
pub type DeletionHook = Box<dyn Fn(&Listener) + Send + Sync>;

type SharedHook = Arc<dyn Fn(&Listener) + Send + Sync>;

/// Removal request: filters plus callback identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerKey {
    pub source: u16,
    pub value: u16,
    pub callback: CallbackId,
}

impl ListenerKey {
    fn selects(&self, listener: &Listener) -> bool {
        listener.callback().id().matches_removal(&self.callback)
            && (listener.source() == self.source || self.source == crate::events::ANY_SOURCE)
            && (listener.value() == self.value || self.value == crate::events::ANY_VALUE)
    }
}

/// How [`Registry::add`] placed a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Inserted,
    /// An identical tombstoned entry was brought back instead.
    Revived,
}

pub struct Registry {
    listeners: Mutex<RefCell<Vec<Arc<Listener>>>>,
    deletion_hook: Mutex<RefCell<Option<SharedHook>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(RefCell::new(Vec::new())),
            deletion_hook: Mutex::new(RefCell::new(None)),
        }
    }

    /// Inserts `listener` in filter order.
    ///
    /// A live duplicate is refused with `NotSupported`. A tombstoned
    /// duplicate is revived instead of inserting a second copy.
    pub fn add(&self, listener: Arc<Listener>) -> Result<Registration, BusError> {
        let (source, value) = (listener.source(), listener.value());
        let placed = critical_section::with(|cs| {
            let mut listeners = self.listeners.borrow_ref_mut(cs);

            if let Some(existing) = listeners.iter().find(|l| l.same_registration(&listener)) {
                return if existing.resurrect() {
                    Ok(None)
                } else {
                    Err(BusError::NotSupported)
                };
            }

            let position = listeners.partition_point(|l| (l.source(), l.value()) <= (source, value));
            listeners.insert(position, listener.clone());
            Ok(Some(position))
        });

        // The refused duplicate is dropped here, outside the critical section.
        drop(listener);
        match placed? {
            Some(position) => {
                debug!(source, value, position, "Listener registered");
                Ok(Registration::Inserted)
            }
            None => {
                debug!(source, value, "Listener revived");
                Ok(Registration::Revived)
            }
        }
    }

    /// Tombstones every live entry selected by `key`, returning how many.
    pub fn remove(&self, key: &ListenerKey) -> Result<usize, BusError> {
        let marked: Vec<Arc<Listener>> = critical_section::with(|cs| {
            self.listeners
                .borrow_ref(cs)
                .iter()
                .filter(|l| !l.is_deleting() && key.selects(l))
                .filter(|l| l.mark_deleting())
                .cloned()
                .collect()
        });

        if marked.is_empty() {
            return Err(BusError::InvalidParameter);
        }

        debug!(
            source = key.source,
            value = key.value,
            count = marked.len(),
            "Listeners marked for deletion"
        );
        let hook = critical_section::with(|cs| self.deletion_hook.borrow_ref(cs).clone());
        if let Some(hook) = hook {
            for listener in &marked {
                hook(listener);
            }
        }
        Ok(marked.len())
    }

    /// Unlinks every tombstone that is not busy. Returns the number removed.
    pub fn collect_garbage(&self) -> usize {
        let (collected, remaining) = critical_section::with(|cs| {
            let mut listeners = self.listeners.borrow_ref_mut(cs);
            let (collected, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut *listeners)
                .into_iter()
                .partition(|l| l.is_deleting() && !l.is_busy());
            *listeners = kept;
            (collected, listeners.len())
        });

        if !collected.is_empty() {
            debug!(collected = collected.len(), remaining, "Collected listeners");
        }
        collected.len()
    }

    /// The `n`th entry in registry order, tombstones included.
    pub fn find(&self, n: usize) -> Option<Arc<Listener>> {
        critical_section::with(|cs| self.listeners.borrow_ref(cs).get(n).cloned())
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.listeners.borrow_ref(cs).len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<Arc<Listener>> {
        critical_section::with(|cs| self.listeners.borrow_ref(cs).clone())
    }

    pub fn set_deletion_hook(&self, hook: DeletionHook) {
        let previous = critical_section::with(|cs| {
            self.deletion_hook.borrow_ref_mut(cs).replace(Arc::from(hook))
        });
        drop(previous);
    }

    pub fn clear_deletion_hook(&self) {
        let previous = critical_section::with(|cs| self.deletion_hook.borrow_ref_mut(cs).take());
        drop(previous);
    }
}
