//! ## fiberbus-simulator::fiber
//! **Deterministic cooperative scheduler over OS threads**
//!
//! Every fiber is backed by a thread, but only the fiber holding the baton
//! runs; the rest are parked on their own condition variable. A switch hands
//! the baton over and parks the caller, so execution is strictly sequential
//! and every run of a scenario interleaves identically.
//!
//! - Fiber 0 is the thread that called [`FiberScheduler::start`].
//! - Fiber 1 is the idle fiber. It fires due timer interrupts, wakes
//!   sleepers, ticks idle components (the bus drain), and advances the
//!   [`VirtualClock`] when nothing is runnable.
//! - [`Scheduler::invoke`] forks on block: the child runs at once and its
//!   parent resumes when the child first blocks or finishes.
//!
//! Sleepers wake on tick boundaries; interrupts fire at their exact time.
//! Every fiber thread stamps the events it creates with virtual milliseconds.

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use fiberbus_core::events::{self, TickSource};
use fiberbus_core::scheduler::{FiberLock, IdleComponent, Scheduler, Task};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, trace, warn};

use crate::error::SimulationError;
use crate::virtual_clock::{duration_ns, VirtualClock};

pub type FiberId = u64;

pub const MAIN_FIBER: FiberId = 0;
pub const IDLE_FIBER: FiberId = 1;

static NEXT_SCHEDULER: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// `(scheduler, fiber)` the current thread belongs to.
    static CURRENT: Cell<Option<(u64, FiberId)>> = const { Cell::new(None) };
}

/// Unwind payload that retires parked fibers at shutdown.
struct Cancelled;

#[derive(Debug, Default)]
struct LockState {
    owner: Option<FiberId>,
    depth: usize,
    waiters: VecDeque<FiberId>,
}

#[derive(Default)]
struct State {
    running: bool,
    shutdown: bool,
    current: FiberId,
    next_fiber: FiberId,
    batons: HashMap<FiberId, Arc<Condvar>>,
    run_queue: VecDeque<FiberId>,
    /// Keyed by `(wake time, sequence)`.
    sleepers: BTreeMap<(u64, u64), FiberId>,
    /// Keyed by `(fire time, sequence)`.
    interrupts: BTreeMap<(u64, u64), Task>,
    /// Forked children that have not blocked yet, mapped to their parent.
    fob_parent: HashMap<FiberId, FiberId>,
    locks: HashMap<u64, LockState>,
    next_lock: u64,
    seq: u64,
}

impl State {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Who runs when `me` stops: the fiber that forked it, else the head
    /// of the run queue, else idle.
    fn successor(&mut self, me: FiberId) -> FiberId {
        if let Some(parent) = self.fob_parent.remove(&me) {
            return parent;
        }
        self.run_queue.pop_front().unwrap_or(IDLE_FIBER)
    }
}

struct Shared {
    id: u64,
    state: Mutex<State>,
    clock: VirtualClock,
    tick_ns: u64,
    idle_components: Mutex<Vec<Weak<dyn IdleComponent>>>,
}

impl Shared {
    fn enter(&self, fiber: FiberId) {
        CURRENT.with(|current| current.set(Some((self.id, fiber))));
        let clock = self.clock.clone();
        let ticks: TickSource = Arc::new(move || clock.now_ns() / 1_000_000);
        events::set_tick_source(Some(ticks));
    }

    fn me(&self) -> Option<FiberId> {
        CURRENT
            .with(Cell::get)
            .and_then(|(scheduler, fiber)| (scheduler == self.id).then_some(fiber))
    }

    /// Hands the baton to `next` and parks until it comes back.
    fn switch<'a>(
        &'a self,
        mut state: MutexGuard<'a, State>,
        me: FiberId,
        next: FiberId,
    ) -> MutexGuard<'a, State> {
        if next != me {
            trace!(from = me, to = next, "Fiber switch");
            state.current = next;
            if let Some(baton) = state.batons.get(&next) {
                baton.notify_one();
            }
        }
        self.park(state, me)
    }

    fn park<'a>(&'a self, mut state: MutexGuard<'a, State>, me: FiberId) -> MutexGuard<'a, State> {
        let Some(baton) = state.batons.get(&me).cloned() else {
            return state;
        };
        while state.current != me && !state.shutdown {
            baton.wait(&mut state);
        }
        if state.current != me {
            drop(state);
            panic::resume_unwind(Box::new(Cancelled));
        }
        state
    }

    fn run_fiber(self: Arc<Self>, id: FiberId, slot: Arc<Mutex<Option<Task>>>) {
        self.enter(id);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            drop(self.park(self.state.lock(), id));
            if let Some(task) = slot.lock().take() {
                task();
            }
        }));
        match outcome {
            Ok(()) => {}
            Err(payload) if payload.is::<Cancelled>() => return,
            Err(_) => error!(fiber = id, "Fiber panicked"),
        }
        self.retire(id);
    }

    fn retire(&self, id: FiberId) {
        let mut state = self.state.lock();
        state.batons.remove(&id);
        let next = state.successor(id);
        trace!(fiber = id, next, "Fiber finished");
        state.current = next;
        if let Some(baton) = state.batons.get(&next) {
            baton.notify_one();
        }
    }

    fn idle_loop(self: Arc<Self>) {
        self.enter(IDLE_FIBER);
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.idle_passes())) {
            if !payload.is::<Cancelled>() {
                error!("Idle fiber panicked");
            }
        }
    }

    fn idle_passes(&self) {
        let mut state = self.park(self.state.lock(), IDLE_FIBER);
        loop {
            let due = self.take_due_interrupts(&mut state);
            if !due.is_empty() {
                drop(state);
                for interrupt in due {
                    interrupt();
                }
                state = self.state.lock();
            }

            self.wake_sleepers(&mut state);
            drop(state);
            self.tick_components();
            state = self.state.lock();

            if let Some(next) = state.run_queue.pop_front() {
                state = self.switch(state, IDLE_FIBER, next);
                continue;
            }

            match self.next_deadline(&state) {
                Some(deadline) => self.clock.advance_to(deadline),
                None => {
                    warn!("No runnable fibers and no timers, idle fiber waiting");
                    state = self.wait_for_work(state);
                }
            }
        }
    }

    fn wait_for_work<'a>(&'a self, mut state: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        if let Some(baton) = state.batons.get(&IDLE_FIBER).cloned() {
            baton.wait(&mut state);
        }
        if state.shutdown {
            drop(state);
            panic::resume_unwind(Box::new(Cancelled));
        }
        state
    }

    fn take_due_interrupts(&self, state: &mut State) -> Vec<Task> {
        let now = self.clock.now_ns();
        let later = state.interrupts.split_off(&(now.saturating_add(1), 0));
        std::mem::replace(&mut state.interrupts, later)
            .into_values()
            .collect()
    }

    fn wake_sleepers(&self, state: &mut State) {
        let now = self.clock.now_ns();
        let later = state.sleepers.split_off(&(now.saturating_add(1), 0));
        let due = std::mem::replace(&mut state.sleepers, later);
        state.run_queue.extend(due.into_values());
    }

    fn next_deadline(&self, state: &State) -> Option<u64> {
        let interrupt = state.interrupts.keys().next().map(|(at, _)| *at);
        let wake = state
            .sleepers
            .keys()
            .next()
            .map(|(at, _)| at.div_ceil(self.tick_ns).saturating_mul(self.tick_ns));
        match (interrupt, wake) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn tick_components(&self) {
        let components: Vec<Arc<dyn IdleComponent>> = {
            let mut list = self.idle_components.lock();
            list.retain(|component| component.strong_count() > 0);
            list.iter().filter_map(Weak::upgrade).collect()
        };
        for component in components {
            component.idle_tick();
        }
    }
}

/// Cheap to clone; clones drive the same fibers.
#[derive(Clone)]
pub struct FiberScheduler {
    shared: Arc<Shared>,
}

impl FiberScheduler {
    /// `tick_period` is the granularity at which sleeping fibers wake.
    pub fn new(clock: VirtualClock, tick_period: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: NEXT_SCHEDULER.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(State::default()),
                clock,
                tick_ns: duration_ns(tick_period).max(1),
                idle_components: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Adopts the calling thread as the main fiber and starts the idle fiber.
    pub fn start(&self) -> Result<(), SimulationError> {
        let mut state = self.shared.state.lock();
        if state.running {
            return Ok(());
        }

        self.shared.enter(MAIN_FIBER);
        state.current = MAIN_FIBER;
        state.next_fiber = IDLE_FIBER + 1;
        state.batons.insert(MAIN_FIBER, Arc::new(Condvar::new()));
        state.batons.insert(IDLE_FIBER, Arc::new(Condvar::new()));

        let shared = self.shared.clone();
        thread::Builder::new()
            .name("fiber-idle".into())
            .spawn(move || shared.idle_loop())?;

        state.running = true;
        debug!(scheduler = self.shared.id, "Fiber scheduler started");
        Ok(())
    }

    /// Stops scheduling and retires every parked fiber. Must be called from
    /// the fiber holding the baton; later calls run work inline.
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        state.running = false;
        let pending = std::mem::take(&mut state.interrupts);
        for baton in state.batons.values() {
            baton.notify_all();
        }
        drop(state);

        // Interrupt tasks may own the last handle to a bus, whose locks
        // need the scheduler state to drop.
        drop(pending);
        if self.shared.me().is_some() {
            events::set_tick_source(None);
        }
        debug!(scheduler = self.shared.id, "Fiber scheduler shut down");
    }

    /// Blocks the calling fiber for `duration` of virtual time. Outside a
    /// running scheduler, or on the idle fiber, the clock is simply moved on.
    pub fn sleep(&self, duration: Duration) {
        let me = self.shared.me();
        let mut state = self.shared.state.lock();
        match me {
            Some(me) if state.running && me != IDLE_FIBER => {
                let wake = self.shared.clock.now_ns().saturating_add(duration_ns(duration));
                let seq = state.next_seq();
                state.sleepers.insert((wake, seq), me);
                let next = state.successor(me);
                drop(self.shared.switch(state, me, next));
            }
            _ => {
                drop(state);
                self.shared.clock.advance(duration);
            }
        }
    }

    /// Lets the rest of the system run for `duration` of virtual time.
    pub fn run_for(&self, duration: Duration) {
        self.sleep(duration);
    }

    /// Queues `task` to run in interrupt context once `after` has elapsed.
    pub fn schedule_interrupt(&self, after: Duration, task: Task) {
        let mut state = self.shared.state.lock();
        let at = self.shared.clock.now_ns().saturating_add(duration_ns(after));
        let seq = state.next_seq();
        state.interrupts.insert((at, seq), task);
        if state.current == IDLE_FIBER {
            if let Some(baton) = state.batons.get(&IDLE_FIBER) {
                baton.notify_one();
            }
        }
    }

    /// Registers background work for the idle fiber. Dropped components are
    /// forgotten.
    pub fn add_idle_component(&self, component: Weak<dyn IdleComponent>) {
        self.shared.idle_components.lock().push(component);
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.shared.clock
    }

    pub fn now_ns(&self) -> u64 {
        self.shared.clock.now_ns()
    }

    /// Fiber the calling thread runs as, if it belongs to this scheduler.
    pub fn current_fiber(&self) -> Option<FiberId> {
        self.shared.me()
    }

    /// Live fibers, main and idle included.
    pub fn fiber_count(&self) -> usize {
        self.shared.state.lock().batons.len()
    }
}

impl Scheduler for FiberScheduler {
    fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    fn schedule(&self) {
        let Some(me) = self.shared.me() else {
            return;
        };
        let mut state = self.shared.state.lock();
        if !state.running {
            return;
        }

        let next = match state.fob_parent.remove(&me) {
            Some(parent) => Some(parent),
            None => state
                .run_queue
                .pop_front()
                .or((me != IDLE_FIBER).then_some(IDLE_FIBER)),
        };
        if let Some(next) = next {
            if me != IDLE_FIBER {
                state.run_queue.push_back(me);
            }
            drop(self.shared.switch(state, me, next));
        }
    }

    fn invoke(&self, task: Task) {
        let Some(me) = self.shared.me() else {
            return task();
        };
        let mut state = self.shared.state.lock();
        if !state.running {
            drop(state);
            return task();
        }

        let id = state.next_fiber;
        state.next_fiber += 1;
        state.batons.insert(id, Arc::new(Condvar::new()));

        let slot = Arc::new(Mutex::new(Some(task)));
        let shared = self.shared.clone();
        let child_slot = slot.clone();
        let spawned = thread::Builder::new()
            .name(format!("fiber-{id}"))
            .spawn(move || shared.run_fiber(id, child_slot));

        match spawned {
            Ok(_) => {
                state.fob_parent.insert(id, me);
                drop(self.shared.switch(state, me, id));
            }
            Err(err) => {
                state.batons.remove(&id);
                drop(state);
                error!(%err, "Could not spawn fiber, running task inline");
                let task = slot.lock().take();
                if let Some(task) = task {
                    task();
                }
            }
        }
    }

    fn runqueue_empty(&self) -> bool {
        self.shared.state.lock().run_queue.is_empty()
    }

    fn create_lock(&self) -> Box<dyn FiberLock> {
        let mut state = self.shared.state.lock();
        let id = state.next_lock;
        state.next_lock += 1;
        state.locks.insert(id, LockState::default());
        Box::new(SimLock {
            shared: self.shared.clone(),
            id,
        })
    }
}

/// Fiber lock with FIFO hand-off. The holding fiber may re-acquire it.
struct SimLock {
    shared: Arc<Shared>,
    id: u64,
}

impl FiberLock for SimLock {
    fn wait(&self) {
        let Some(me) = self.shared.me() else {
            return;
        };
        let mut state = self.shared.state.lock();
        if !state.running {
            return;
        }
        let Some(lock) = state.locks.get_mut(&self.id) else {
            return;
        };

        let owner = lock.owner;
        match owner {
            None => {
                lock.owner = Some(me);
                lock.depth = 1;
            }
            Some(owner) if owner == me => lock.depth += 1,
            Some(owner) if me == IDLE_FIBER => {
                warn!(lock = self.id, owner, "Idle fiber cannot block on a held lock");
            }
            Some(_) => {
                lock.waiters.push_back(me);
                let next = state.successor(me);
                drop(self.shared.switch(state, me, next));
            }
        }
    }

    fn notify(&self) {
        let Some(me) = self.shared.me() else {
            return;
        };
        let mut state = self.shared.state.lock();
        if !state.running {
            return;
        }
        let Some(lock) = state.locks.get_mut(&self.id) else {
            return;
        };
        if lock.owner != Some(me) {
            return;
        }
        if lock.depth > 1 {
            lock.depth -= 1;
            return;
        }

        match lock.waiters.pop_front() {
            Some(next) => {
                lock.owner = Some(next);
                lock.depth = 1;
                state.run_queue.push_back(next);
            }
            None => {
                lock.owner = None;
                lock.depth = 0;
            }
        }
    }
}

impl Drop for SimLock {
    fn drop(&mut self) {
        self.shared.state.lock().locks.remove(&self.id);
    }
}
