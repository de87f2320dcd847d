//! Cooperative executor.
//!
//! An [`Executor`] owns a run queue of [`Runnable`]s and invokes them one at a
//! time. It can be driven in two ways:
//!
//! * [`Executor::loop_forever`] donates the calling thread (or
//!   [`Executor::start_thread`] spawns one). When nothing is runnable the
//!   thread parks on an atomic wake sequence; it never spins.
//! * [`Executor::run_some`] runs a bounded amount of pending work and
//!   returns, for hosts that poll from an outer loop.
//!
//! Elevated runnables are served before normal ones; within a class the order
//! is FIFO.

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use transport::wait::{self, WaitWord};
use transport::{Notifiable, SyncNotifiable};

use crate::error::{FabricError, FabricResult};

/// Scheduling class of a runnable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowPriority {
    #[default]
    Normal,
    /// Runs ahead of every normal runnable.
    Elevated,
}

/// Unit of work the executor can invoke.
pub trait Runnable: Send + Sync {
    /// Runs one step. Must not block the calling thread.
    fn run(self: Arc<Self>);

    fn priority(&self) -> FlowPriority {
        FlowPriority::Normal
    }

    fn name(&self) -> &str {
        "runnable"
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub name: String,
    /// Most runnables a single [`Executor::run_some`] call invokes.
    pub run_budget: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: "executor".to_owned(),
            run_budget: 256,
        }
    }
}

/// Counters describing executor activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ExecutorStats {
    pub steps: u64,
    pub parks: u64,
    pub scheduled: u64,
}

#[derive(Default)]
struct RunQueue {
    elevated: VecDeque<Arc<dyn Runnable>>,
    normal: VecDeque<Arc<dyn Runnable>>,
}

impl RunQueue {
    fn pop(&mut self) -> Option<Arc<dyn Runnable>> {
        self.elevated
            .pop_front()
            .or_else(|| self.normal.pop_front())
    }

    fn len(&self) -> usize {
        self.elevated.len() + self.normal.len()
    }
}

struct Inner {
    name: String,
    run_budget: usize,
    queue: Mutex<RunQueue>,
    wake_seq: WaitWord,
    shutdown: AtomicBool,
    dedicated: AtomicBool,
    steps: AtomicU64,
    parks: AtomicU64,
    scheduled: AtomicU64,
}

thread_local! {
    static ACTIVE: Cell<usize> = const { Cell::new(0) };
}

/// Marks the current thread as driving an executor until dropped.
struct ActiveGuard {
    previous: usize,
}

impl ActiveGuard {
    fn enter(inner: &Arc<Inner>) -> Self {
        let key = Arc::as_ptr(inner) as usize;
        let previous = ACTIVE.with(|active| active.replace(key));
        Self { previous }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE.with(|active| active.set(self.previous));
    }
}

/// Handle to a cooperative executor. Cloning shares the same run queue.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<Inner>,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> FabricResult<Self> {
        if config.run_budget == 0 {
            return Err(FabricError::InvalidConfig("run_budget must be at least 1"));
        }
        Ok(Self::build(config.name, config.run_budget))
    }

    /// Executor with default settings and the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self::build(name.into(), ExecutorConfig::default().run_budget)
    }

    fn build(name: String, run_budget: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                run_budget,
                queue: Mutex::new(RunQueue::default()),
                wake_seq: WaitWord::new(0),
                shutdown: AtomicBool::new(false),
                dedicated: AtomicBool::new(false),
                steps: AtomicU64::new(0),
                parks: AtomicU64::new(0),
                scheduled: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Appends `task` to the run order and wakes a parked driver.
    ///
    /// Callable from any thread. After [`Executor::shutdown`] the task is
    /// discarded.
    pub fn schedule(&self, task: Arc<dyn Runnable>) {
        let rejected = {
            let mut queue = self.inner.queue.lock();
            // Checked under the lock so nothing lands after shutdown's drain.
            if self.is_shutdown() {
                Some(task)
            } else {
                match task.priority() {
                    FlowPriority::Elevated => queue.elevated.push_back(task),
                    FlowPriority::Normal => queue.normal.push_back(task),
                }
                None
            }
        };
        if let Some(task) = rejected {
            tracing::trace!(executor = %self.inner.name, task = task.name(), "schedule after shutdown ignored");
            return;
        }
        self.inner.scheduled.fetch_add(1, Ordering::Relaxed);
        wait::bump_and_wake_one(&self.inner.wake_seq);
    }

    /// Runs a one-shot closure on the executor.
    pub fn add<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule(Arc::new(Task {
            f: Mutex::new(Some(Box::new(f))),
        }));
    }

    /// Runs `f` on the executor and waits for its result.
    ///
    /// Runs inline when called from a thread that is currently driving this
    /// executor. Otherwise another thread must be driving it, or a later
    /// [`Executor::shutdown`] releases the caller with
    /// [`FabricError::ShutDown`].
    pub fn sync_run<F, R>(&self, f: F) -> FabricResult<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_current() {
            return Ok(f());
        }
        if self.is_shutdown() {
            return Err(FabricError::ShutDown(self.inner.name.clone()));
        }

        let done = Arc::new(SyncNotifiable::new());
        let slot = Arc::new(Mutex::new(None));
        {
            let done = Arc::clone(&done);
            let slot = Arc::clone(&slot);
            let signal = NotifyOnDrop(done);
            self.add(move || {
                let _signal = signal;
                *slot.lock() = Some(f());
            });
        }
        done.wait_for_notification();
        let result = slot.lock().take();
        result.ok_or_else(|| FabricError::ShutDown(self.inner.name.clone()))
    }

    /// Pops the next runnable and invokes it once. Returns `false` when idle.
    pub fn run_one(&self) -> bool {
        let task = self.inner.queue.lock().pop();
        match task {
            Some(task) => {
                let _active = ActiveGuard::enter(&self.inner);
                self.inner.steps.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(executor = %self.inner.name, task = task.name(), "run");
                task.run();
                true
            }
            None => false,
        }
    }

    /// Runs pending work until the queue is empty or the run budget is spent.
    ///
    /// Returns the number of runnables invoked; calling it with nothing
    /// runnable is a no-op that returns 0.
    pub fn run_some(&self) -> usize {
        let mut steps = 0;
        while steps < self.inner.run_budget && self.run_one() {
            steps += 1;
        }
        steps
    }

    /// Runs work on the calling thread until [`Executor::shutdown`].
    pub fn loop_forever(&self) {
        let _active = ActiveGuard::enter(&self.inner);
        tracing::debug!(executor = %self.inner.name, "executor loop started");
        while !self.is_shutdown() {
            let seq = self.inner.wake_seq.load(Ordering::Acquire);
            if self.run_one() {
                continue;
            }
            if self.is_shutdown() {
                break;
            }
            self.inner.parks.fetch_add(1, Ordering::Relaxed);
            wait::wait_u32(&self.inner.wake_seq, seq);
        }
        tracing::debug!(executor = %self.inner.name, "executor loop stopped");
    }

    /// Spawns a named thread running [`Executor::loop_forever`].
    pub fn start_thread(&self, name: impl Into<String>) -> FabricResult<JoinHandle<()>> {
        let name = name.into();
        let executor = self.clone();
        self.inner.dedicated.store(true, Ordering::Release);
        std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || executor.loop_forever())
            .map_err(|source| {
                self.inner.dedicated.store(false, Ordering::Release);
                FabricError::Spawn { name, source }
            })
    }

    /// True once [`Executor::start_thread`] handed the executor a thread.
    pub fn has_dedicated_thread(&self) -> bool {
        self.inner.dedicated.load(Ordering::Acquire)
    }

    /// Stops every loop and discards queued runnables.
    pub fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let discarded = std::mem::take(&mut *self.inner.queue.lock());
        tracing::debug!(
            executor = %self.inner.name,
            discarded = discarded.len(),
            "executor shut down"
        );
        self.inner.wake_seq.fetch_add(1, Ordering::Release);
        wait::wake_all(&self.inner.wake_seq);
        drop(discarded);
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Number of runnables waiting to run.
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().len()
    }

    /// True when the calling thread is currently driving this executor.
    pub fn is_current(&self) -> bool {
        let key = Arc::as_ptr(&self.inner) as usize;
        ACTIVE.with(|active| active.get() == key)
    }

    pub fn stats(&self) -> ExecutorStats {
        ExecutorStats {
            steps: self.inner.steps.load(Ordering::Relaxed),
            parks: self.inner.parks.load(Ordering::Relaxed),
            scheduled: self.inner.scheduled.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("name", &self.inner.name)
            .field("pending", &self.pending())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

type BoxedTask = Box<dyn FnOnce() + Send>;

struct Task {
    f: Mutex<Option<BoxedTask>>,
}

impl Runnable for Task {
    fn run(self: Arc<Self>) {
        let f = self.f.lock().take();
        if let Some(f) = f {
            f();
        }
    }

    fn name(&self) -> &str {
        "task"
    }
}

/// Wakes a `sync_run` caller whether its task ran or was discarded.
struct NotifyOnDrop(Arc<SyncNotifiable>);

impl Drop for NotifyOnDrop {
    fn drop(&mut self) {
        self.0.notify();
    }
}
