//! ## fiberbus-core::scheduler
//! **Contract between the bus and the cooperative fiber scheduler**
//!
//! The bus never implements scheduling itself. It asks the scheduler to yield,
//! to run a task on a fresh fiber, whether other fibers are ready, and for a
//! per-listener lock. The scheduler in turn calls [`IdleComponent::idle_tick`]
//! on the bus once per idle pass.
//!
//! Two trivial implementations live here:
//! - [`NoScheduler`]: no scheduler has started yet. Every listener is serviced
//!   at send time (see `dispatch::is_urgent`).
//! - [`InlineScheduler`]: a run-to-completion host. Tasks run on the calling
//!   stack and nothing is ever waiting in the run queue.
//!
//! The deterministic fiber scheduler lives in `fiberbus-simulator`.

/// Body handed to [`Scheduler::invoke`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Scheduler: Send + Sync {
    /// Whether the fiber scheduler has started. Before it has, there is no
    /// thread context to defer work to.
    fn is_running(&self) -> bool;

    /// Yields the calling fiber to the next ready fiber, if any.
    fn schedule(&self);

    /// Runs `task` on a new fiber. The task starts at once; the caller
    /// resumes when the task finishes or first blocks.
    fn invoke(&self, task: Task);

    /// Whether no fiber is waiting to run.
    fn runqueue_empty(&self) -> bool;

    /// Creates a fiber-aware mutual exclusion primitive.
    fn create_lock(&self) -> Box<dyn FiberLock>;
}

/// Blocking lock that suspends the calling fiber rather than the processor.
pub trait FiberLock: Send + Sync {
    /// Acquires the lock, blocking the calling fiber while it is held.
    fn wait(&self);

    /// Releases the lock, handing it to the longest waiting fiber if any.
    fn notify(&self);
}

/// Background work run by the scheduler on every idle pass.
pub trait IdleComponent: Send + Sync {
    fn idle_tick(&self);
}

/// Lock for single-threaded contexts where there is never a second fiber.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLock;

impl FiberLock for NoopLock {
    fn wait(&self) {}

    fn notify(&self) {}
}

/// Stand-in used before any scheduler is running.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoScheduler;

impl Scheduler for NoScheduler {
    fn is_running(&self) -> bool {
        false
    }

    fn schedule(&self) {}

    fn invoke(&self, task: Task) {
        task()
    }

    fn runqueue_empty(&self) -> bool {
        true
    }

    fn create_lock(&self) -> Box<dyn FiberLock> {
        Box::new(NoopLock)
    }
}

/// Running scheduler whose fibers always complete without blocking.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineScheduler;

impl Scheduler for InlineScheduler {
    fn is_running(&self) -> bool {
        true
    }

    fn schedule(&self) {}

    fn invoke(&self, task: Task) {
        task()
    }

    fn runqueue_empty(&self) -> bool {
        true
    }

    fn create_lock(&self) -> Box<dyn FiberLock> {
        Box::new(NoopLock)
    }
}
