//! Flows: cooperative state machines bound to an executor.
//!
//! A flow is written as a [`StateFlow`]: `entry` fires for every buffer taken
//! from the flow's queue, and each step returns an [`Action`] naming what
//! happens next. Waiting is expressed by returning
//! [`Action::WaitAndCall`]; the flow is parked until someone calls
//! [`Flow::notify`] (or the [`Notifiable`] returned by
//! [`FlowContext::notifier`]) and then resumes at the recorded state.
//!
//! Run-state transitions and queue mutation share one short critical
//! section, so `send` and `notify` are safe from any thread. A notify that
//! lands while the flow is still running is latched and consumed by the next
//! `WaitAndCall`, so the wakeup is never lost. Resumed states must therefore
//! tolerate an early or spurious wakeup and re-check their condition.

use std::fmt;
use std::mem;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use transport::{Buffer, Notifiable, PortId, Priority, Queue, QueueDiscipline};

use crate::executor::{Executor, FlowPriority, Runnable};
use crate::port::Sink;
use crate::service::{Service, SubmitOutcome};

/// What a state asks the executor to do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action<S> {
    /// Advance to `S` immediately, without yielding.
    Call(S),
    /// Suspend until notified, then resume at `S`.
    WaitAndCall(S),
    /// Go to the back of the run order, then resume at `S`.
    Yield(S),
    /// Release the current buffer and continue with the next queued one, or
    /// go idle.
    ReleaseAndExit,
    /// Give up: release every held and queued buffer and reject further
    /// sends. Other flows keep running.
    Terminate,
}

/// Logic of a flow.
pub trait StateFlow: Send + 'static {
    /// Payload of the buffers this flow consumes.
    type Message: Send + Sync + 'static;
    /// Named states the flow can resume at.
    type State: Send + 'static;

    /// Fires when a new buffer has been taken from the queue.
    fn entry(&mut self, ctx: &mut FlowContext<'_, Self::Message>) -> Action<Self::State>;

    /// Re-enters a state recorded by an earlier [`Action`].
    fn resume(
        &mut self,
        state: Self::State,
        ctx: &mut FlowContext<'_, Self::Message>,
    ) -> Action<Self::State>;
}

/// Per-step view of the flow handed to its states.
pub struct FlowContext<'a, M> {
    current: &'a mut Option<Buffer<M>>,
    id: PortId,
    notifier: &'a Arc<dyn Notifiable>,
}

impl<'a, M> FlowContext<'a, M> {
    /// Buffer currently being processed, unless a state took it.
    pub fn message(&self) -> Option<&Buffer<M>> {
        self.current.as_ref()
    }

    pub fn message_mut(&mut self) -> Option<&mut Buffer<M>> {
        self.current.as_mut()
    }

    /// Takes ownership of the current buffer.
    pub fn take_message(&mut self) -> Option<Buffer<M>> {
        self.current.take()
    }

    /// Wakeup handle for this flow, suitable for pools and hardware pollers.
    pub fn notifier(&self) -> Arc<dyn Notifiable> {
        Arc::clone(self.notifier)
    }

    /// Identity of this flow as a port.
    pub fn id(&self) -> PortId {
        self.id
    }
}

/// Scheduling state of a flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    /// Queue empty, not scheduled.
    Idle,
    /// Waiting in the executor's run order.
    Scheduled,
    /// A state is executing right now.
    Running,
    /// Parked until notified.
    Suspended,
    /// Terminated; sends are rejected.
    Terminated,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowOptions {
    pub name: String,
    pub priority: FlowPriority,
    pub discipline: QueueDiscipline,
    /// Queue length at which further sends are rejected.
    pub queue_limit: Option<usize>,
    /// Port identity to use; a fresh one is allocated when absent.
    #[serde(skip)]
    pub id: Option<PortId>,
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self {
            name: "flow".to_owned(),
            priority: FlowPriority::Normal,
            discipline: QueueDiscipline::Fifo,
            queue_limit: None,
            id: None,
        }
    }
}

impl FlowOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

enum Next<S> {
    Entry,
    Resume(S),
}

struct Sched<M> {
    queue: Queue<Buffer<M>>,
    state: RunState,
    notified: bool,
}

struct Body<F: StateFlow> {
    logic: F,
    current: Option<Buffer<F::Message>>,
    next: Next<F::State>,
}

struct FlowCell<F: StateFlow> {
    id: PortId,
    name: String,
    priority: FlowPriority,
    queue_limit: Option<usize>,
    executor: Executor,
    me: Weak<FlowCell<F>>,
    notifier: Arc<dyn Notifiable>,
    // Lock order: `body` before `sched`.
    sched: Mutex<Sched<F::Message>>,
    body: Mutex<Body<F>>,
}

enum Admit<M> {
    Queued { schedule: bool },
    Rejected(Buffer<M>, SubmitOutcome),
}

impl<F: StateFlow> FlowCell<F> {
    fn submit(&self, buffer: Buffer<F::Message>, priority: Priority) -> SubmitOutcome {
        let admit = {
            let mut sched = self.sched.lock();
            if sched.state == RunState::Terminated {
                Admit::Rejected(buffer, SubmitOutcome::Closed)
            } else if self
                .queue_limit
                .is_some_and(|limit| sched.queue.len() >= limit)
            {
                Admit::Rejected(buffer, SubmitOutcome::Dropped)
            } else {
                sched.queue.push(priority, buffer);
                let schedule = sched.state == RunState::Idle;
                if schedule {
                    sched.state = RunState::Scheduled;
                }
                Admit::Queued { schedule }
            }
        };

        match admit {
            Admit::Queued { schedule } => {
                if schedule {
                    self.schedule_self();
                }
                SubmitOutcome::Accepted
            }
            Admit::Rejected(buffer, outcome) => {
                tracing::trace!(flow = %self.name, ?outcome, "send rejected");
                drop(buffer);
                outcome
            }
        }
    }

    /// Returns whether the flow was waiting for the wakeup.
    fn wake(&self) -> bool {
        let schedule = {
            let mut sched = self.sched.lock();
            match sched.state {
                RunState::Suspended => {
                    sched.state = RunState::Scheduled;
                    true
                }
                RunState::Running => {
                    sched.notified = true;
                    return true;
                }
                state => {
                    tracing::trace!(flow = %self.name, ?state, "notify ignored");
                    return false;
                }
            }
        };
        if schedule {
            self.schedule_self();
        }
        true
    }

    fn schedule_self(&self) {
        if let Some(me) = self.me.upgrade() {
            self.executor.schedule(me);
        }
    }

    /// Drives the flow until it suspends, yields, idles or terminates.
    fn step(&self) {
        {
            let mut sched = self.sched.lock();
            assert!(
                sched.state == RunState::Scheduled,
                "flow `{}` invoked while {:?}",
                self.name,
                sched.state
            );
            sched.state = RunState::Running;
        }

        let mut body = self.body.lock();
        let body = &mut *body;
        loop {
            let action = match mem::replace(&mut body.next, Next::Entry) {
                Next::Entry => {
                    debug_assert!(body.current.is_none());
                    let popped = {
                        let mut sched = self.sched.lock();
                        let popped = sched.queue.pop();
                        if popped.is_none() {
                            sched.state = RunState::Idle;
                            sched.notified = false;
                        }
                        popped
                    };
                    let Some(buffer) = popped else {
                        return;
                    };
                    body.current = Some(buffer);
                    let mut ctx = FlowContext {
                        current: &mut body.current,
                        id: self.id,
                        notifier: &self.notifier,
                    };
                    body.logic.entry(&mut ctx)
                }
                Next::Resume(state) => {
                    let mut ctx = FlowContext {
                        current: &mut body.current,
                        id: self.id,
                        notifier: &self.notifier,
                    };
                    body.logic.resume(state, &mut ctx)
                }
            };

            match action {
                Action::Call(state) => body.next = Next::Resume(state),
                Action::WaitAndCall(state) => {
                    body.next = Next::Resume(state);
                    let mut sched = self.sched.lock();
                    if sched.notified {
                        sched.notified = false;
                    } else {
                        sched.state = RunState::Suspended;
                        return;
                    }
                }
                Action::Yield(state) => {
                    body.next = Next::Resume(state);
                    self.sched.lock().state = RunState::Scheduled;
                    self.schedule_self();
                    return;
                }
                Action::ReleaseAndExit => {
                    body.current = None;
                    self.sched.lock().notified = false;
                }
                Action::Terminate => {
                    body.current = None;
                    let discarded: Vec<_> = {
                        let mut sched = self.sched.lock();
                        sched.state = RunState::Terminated;
                        sched.queue.drain().collect()
                    };
                    tracing::warn!(
                        flow = %self.name,
                        discarded = discarded.len(),
                        "flow terminated"
                    );
                    drop(discarded);
                    return;
                }
            }
        }
    }
}

impl<F: StateFlow> Runnable for FlowCell<F> {
    fn run(self: Arc<Self>) {
        self.step();
    }

    fn priority(&self) -> FlowPriority {
        self.priority
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<F: StateFlow> Sink<F::Message> for FlowCell<F> {
    fn id(&self) -> PortId {
        self.id
    }

    fn send(&self, buffer: Buffer<F::Message>, priority: Priority) -> SubmitOutcome {
        self.submit(buffer, priority)
    }
}

struct FlowNotifier<F: StateFlow> {
    cell: Weak<FlowCell<F>>,
}

impl<F: StateFlow> Notifiable for FlowNotifier<F> {
    fn notify(&self) {
        self.try_notify();
    }

    /// `false` once the flow is dropped, or when it was not waiting.
    fn try_notify(&self) -> bool {
        self.cell.upgrade().is_some_and(|cell| cell.wake())
    }
}

/// Owning handle to a running flow.
pub struct Flow<F: StateFlow> {
    cell: Arc<FlowCell<F>>,
}

impl<F: StateFlow> Flow<F> {
    pub fn new(service: &Service, logic: F, options: FlowOptions) -> Self {
        let FlowOptions {
            name,
            priority,
            discipline,
            queue_limit,
            id,
        } = options;
        let id = id.unwrap_or_else(PortId::next);
        let executor = service.executor().clone();
        let cell = Arc::new_cyclic(|me: &Weak<FlowCell<F>>| FlowCell {
            id,
            name,
            priority,
            queue_limit,
            executor,
            me: me.clone(),
            notifier: Arc::new(FlowNotifier { cell: me.clone() }),
            sched: Mutex::new(Sched {
                queue: Queue::new(discipline),
                state: RunState::Idle,
                notified: false,
            }),
            body: Mutex::new(Body {
                logic,
                current: None,
                next: Next::Entry,
            }),
        });
        tracing::debug!(flow = %cell.name, id = %id, service = service.name(), "flow created");
        Self { cell }
    }

    /// Enqueues a buffer at default priority.
    pub fn send(&self, buffer: Buffer<F::Message>) -> SubmitOutcome {
        self.cell.submit(buffer, Priority::default())
    }

    pub fn send_with_priority(
        &self,
        buffer: Buffer<F::Message>,
        priority: Priority,
    ) -> SubmitOutcome {
        self.cell.submit(buffer, priority)
    }

    /// Wakes the flow if it is suspended.
    pub fn notify(&self) {
        self.cell.wake();
    }

    pub fn id(&self) -> PortId {
        self.cell.id
    }

    pub fn name(&self) -> &str {
        &self.cell.name
    }

    pub fn run_state(&self) -> RunState {
        self.cell.sched.lock().state
    }

    pub fn queue_len(&self) -> usize {
        self.cell.sched.lock().queue.len()
    }

    /// This flow as a port others can send to.
    pub fn sink(&self) -> Arc<dyn Sink<F::Message>> {
        self.cell.clone()
    }

    /// Wakeup handle equivalent to [`Flow::notify`].
    pub fn notifier(&self) -> Arc<dyn Notifiable> {
        Arc::clone(&self.cell.notifier)
    }
}

impl<F: StateFlow> fmt::Debug for Flow<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.cell.name)
            .field("id", &self.cell.id)
            .field("state", &self.run_state())
            .finish()
    }
}


#[cfg(all(test, feature = "loom"))]
mod loom_tests {
    use super::RunState;
    use loom::sync::atomic::{AtomicUsize, Ordering};
    use loom::sync::{Arc, Mutex};
    use loom::thread;

    /// Copy of the run-state/latch handshake between `wake` and the
    /// `WaitAndCall` arm of `step`. These models check this copy, not
    /// `FlowCell`: the cell locks through `parking_lot`, which loom cannot
    /// schedule. Keep the two in step by hand.
    struct LoomLatch {
        sched: Mutex<(RunState, bool)>,
        scheduled: AtomicUsize,
    }

    impl LoomLatch {
        fn running() -> Self {
            Self {
                sched: Mutex::new((RunState::Running, false)),
                scheduled: AtomicUsize::new(0),
            }
        }

        fn wake(&self) {
            let mut sched = self.sched.lock().unwrap();
            match sched.0 {
                RunState::Suspended => {
                    sched.0 = RunState::Scheduled;
                    self.scheduled.fetch_add(1, Ordering::SeqCst);
                }
                RunState::Running => sched.1 = true,
                _ => {}
            }
        }

        /// Returns true when the flow continues without suspending.
        fn wait_and_call(&self) -> bool {
            let mut sched = self.sched.lock().unwrap();
            if sched.1 {
                sched.1 = false;
                true
            } else {
                sched.0 = RunState::Suspended;
                false
            }
        }
    }

    #[test]
    #[ignore]
    fn slow_loom_notify_racing_suspend_is_not_lost() {
        loom::model(|| {
            let latch = Arc::new(LoomLatch::running());
            let notifier = {
                let latch = latch.clone();
                thread::spawn(move || latch.wake())
            };

            let inline = latch.wait_and_call();
            notifier.join().unwrap();

            let scheduled = latch.scheduled.load(Ordering::SeqCst);
            assert_eq!(
                usize::from(inline) + scheduled,
                1,
                "exactly one resumption per notify"
            );
        });
    }

    #[test]
    #[ignore]
    fn slow_loom_double_notify_schedules_once() {
        loom::model(|| {
            let latch = Arc::new(LoomLatch::running());
            let a = {
                let latch = latch.clone();
                thread::spawn(move || latch.wake())
            };
            let b = {
                let latch = latch.clone();
                thread::spawn(move || latch.wake())
            };

            let inline = latch.wait_and_call();
            a.join().unwrap();
            b.join().unwrap();

            let scheduled = latch.scheduled.load(Ordering::SeqCst);
            assert!(scheduled <= 1, "a suspended flow is scheduled at most once");
            assert!(inline || scheduled == 1);
        });
    }
}
