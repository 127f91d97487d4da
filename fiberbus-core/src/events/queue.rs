//! Interrupt-safe FIFO of events awaiting thread-context delivery.
//!
//! Producers may run in interrupt context, so every pointer update happens
//! inside `critical_section::with`. Nodes live in a [`NodeSlab`] sized at
//! construction; when it is exhausted the event is refused rather than
//! growing the queue.
//!
//! ## Ordering
//! `send` runs urgent listeners before queueing, and those listeners may
//! themselves raise events. [`EventQueue::tail_mark`] records the tail as it
//! was when `send` started, and [`EventQueue::enqueue_after`] links the event
//! directly behind that node, so the triggering event still precedes anything
//! it caused.

use std::cell::RefCell;

use critical_section::Mutex;

use super::Event;
use crate::alloc::NodeSlab;
use crate::error::BusError;

#[derive(Clone, Copy, Debug)]
struct Node {
    event: Event,
    next: Option<usize>,
    /// Enqueue sequence number; identifies a slot's occupant across reuse.
    seq: u64,
}

struct QueueState {
    slab: NodeSlab<Node>,
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
    next_seq: u64,
}

/// Position of the queue tail at a point in time. See the module docs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TailMark(Option<(usize, u64)>);

impl QueueState {
    /// Resolves a mark to a node that is still linked, if any.
    fn resolve(&self, mark: TailMark) -> Option<usize> {
        let (index, seq) = mark.0?;
        match self.slab.get(index) {
            Some(node) if node.seq == seq => Some(index),
            // The marked node was already consumed, so every event queued
            // before ours is gone: we belong at the head.
            _ => None,
        }
    }

    fn link_after(&mut self, prev: Option<usize>, event: Event) -> Result<(), BusError> {
        let next = match prev {
            Some(p) => self.slab.get(p).and_then(|n| n.next),
            None => self.head,
        };

        self.next_seq += 1;
        let node = Node {
            event,
            next,
            seq: self.next_seq,
        };
        let index = self.slab.allocate(node).ok_or(BusError::NoResources)?;

        match prev.and_then(|p| self.slab.get_mut(p)) {
            Some(prev_node) => prev_node.next = Some(index),
            None => self.head = Some(index),
        }
        if next.is_none() {
            self.tail = Some(index);
        }
        self.len += 1;
        Ok(())
    }

    fn pop_front(&mut self) -> Option<Event> {
        let index = self.head?;
        let node = self.slab.release(index)?;
        self.head = node.next;
        if self.head.is_none() {
            self.tail = None;
        }
        self.len -= 1;
        Some(node.event)
    }
}

/// Bounded FIFO shared between interrupt producers and the drain loop.
pub struct EventQueue {
    state: Mutex<RefCell<QueueState>>,
    capacity: usize,
}

impl EventQueue {
    /// Creates a queue holding at most `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(RefCell::new(QueueState {
                slab: NodeSlab::new(capacity),
                head: None,
                tail: None,
                len: 0,
                next_seq: 0,
            })),
            capacity,
        }
    }

    /// Links `event` at the tail.
    #[inline]
    pub fn enqueue(&self, event: Event) -> Result<(), BusError> {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let tail = state.tail;
            state.link_after(tail, event)
        })
    }

    /// Links `event` directly behind the node that was the tail when `mark`
    /// was taken (or at the head if that node has since been consumed).
    #[inline]
    pub fn enqueue_after(&self, mark: TailMark, event: Event) -> Result<(), BusError> {
        critical_section::with(|cs| {
            let mut state = self.state.borrow_ref_mut(cs);
            let prev = state.resolve(mark);
            state.link_after(prev, event)
        })
    }

    /// Unlinks the head event, returning its node to the slab.
    #[inline]
    pub fn dequeue(&self) -> Option<Event> {
        critical_section::with(|cs| self.state.borrow_ref_mut(cs).pop_front())
    }

    /// Snapshot of the current tail, for [`EventQueue::enqueue_after`].
    #[inline]
    pub fn tail_mark(&self) -> TailMark {
        critical_section::with(|cs| {
            let state = self.state.borrow_ref(cs);
            TailMark(
                state
                    .tail
                    .and_then(|index| state.slab.get(index).map(|node| (index, node.seq))),
            )
        })
    }

    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.state.borrow_ref(cs).len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
