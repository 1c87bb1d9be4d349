//! Deferred one-shot tasks and an injectable clock
//!
//! A scheduled task always runs once its delay is up, cancelled or not. It
//! receives its own `TaskHandle` and must `claim()` it before doing anything;
//! `cancel()` and `claim()` race on one atomic, so exactly one of them wins.
//! Callers that pair the claim with their own lock get a cancellation that
//! is effective if and only if it happened before the task took effect.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tracing::debug;

/// Monotonic time source, measured from an arbitrary origin.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.now.lock()
    }
}

const PENDING: u8 = 0;
const CANCELLED: u8 = 1;
const FIRED: u8 = 2;

/// Shared state of one scheduled task: pending, then cancelled or fired.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    state: Arc<AtomicU8>,
    /// Stops the backing timer early once cancelled.
    abort: Arc<OnceLock<AbortHandle>>,
}

impl TaskHandle {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(PENDING)),
            abort: Arc::new(OnceLock::new()),
        }
    }

    fn attach_abort(&self, abort: AbortHandle) {
        if self.abort.set(abort).is_ok() && self.is_cancelled() {
            if let Some(abort) = self.abort.get() {
                abort.abort();
            }
        }
    }

    fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns `false` if the task already fired or was already cancelled.
    pub fn cancel(&self) -> bool {
        let cancelled = self.transition(CANCELLED);
        if cancelled {
            if let Some(abort) = self.abort.get() {
                abort.abort();
            }
        }
        cancelled
    }

    /// Take the right to run. Returns `false` once cancelled or claimed.
    pub fn claim(&self) -> bool {
        self.transition(FIRED)
    }

    pub fn is_pending(&self) -> bool {
        self.state.load(Ordering::Acquire) == PENDING
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    /// Whether both handles refer to the same scheduled task.
    pub fn same_task(&self, other: &TaskHandle) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

impl Default for TaskHandle {
    fn default() -> Self {
        Self::new()
    }
}

pub type Task = Box<dyn FnOnce(&TaskHandle) + Send + 'static>;

pub trait Scheduler: Send + Sync {
    /// Run `task` after `delay`. Never runs it on the calling thread.
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle;
}

/// Scheduler backed by tokio timers.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    runtime: Handle,
}

impl TokioScheduler {
    pub fn new(runtime: Handle) -> Self {
        Self { runtime }
    }

    /// Scheduler on the runtime of the calling task.
    ///
    /// # Panics
    /// Outside of a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        let task_handle = handle.clone();

        let join = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            task(&task_handle);
        });
        handle.attach_abort(join.abort_handle());

        debug!("Scheduled task in {:?}", delay);
        handle
    }
}

struct Queued {
    due: Duration,
    seq: u64,
    handle: TaskHandle,
    task: Task,
}

/// Scheduler driven by a `ManualClock`, for deterministic tests.
pub struct ManualScheduler {
    clock: Arc<ManualClock>,
    queue: Mutex<Vec<Queued>>,
    seq: AtomicU64,
}

impl ManualScheduler {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            queue: Mutex::new(Vec::new()),
            seq: AtomicU64::new(0),
        }
    }

    /// Move the clock forward and run every task that came due, in due order.
    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
        let now = self.clock.now();
        while let Some(queued) = self.pop_next(|queued| queued.due <= now) {
            (queued.task)(&queued.handle);
        }
    }

    /// Run everything still queued, due or not, cancelled or not.
    pub fn fire_all(&self) {
        while let Some(queued) = self.pop_next(|_| true) {
            (queued.task)(&queued.handle);
        }
    }

    /// Queued tasks that have been neither cancelled nor run.
    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .iter()
            .filter(|queued| queued.handle.is_pending())
            .count()
    }

    // The queue lock is released before the task runs so tasks may schedule.
    fn pop_next(&self, ready: impl Fn(&Queued) -> bool) -> Option<Queued> {
        let mut queue = self.queue.lock();
        let index = queue
            .iter()
            .enumerate()
            .filter(|(_, queued)| ready(queued))
            .min_by_key(|(_, queued)| (queued.due, queued.seq))
            .map(|(index, _)| index)?;
        Some(queue.remove(index))
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: Task) -> TaskHandle {
        let handle = TaskHandle::new();
        self.queue.lock().push(Queued {
            due: self.clock.now() + delay,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            handle: handle.clone(),
            task,
        });
        handle
    }
}
