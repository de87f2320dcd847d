//! Publish/fan-out routing.
//!
//! A [`Hub`] is the single point of ingress for one message type. Every
//! buffer sent to it is handed to each registered port except the port named
//! by the buffer's origin tag, so a message never comes back to the link it
//! arrived on. Delivery shares the one payload: each port gets its own
//! reference and releases it at its own pace.
//!
//! Ports are referenced, not owned. The hub keeps weak handles and forgets a
//! port once its owner drops it.
//!
//! Registration changes and fan-out are serialised by the port-set lock. A
//! port receives a message if and only if it was registered when that
//! message's fan-out began; once [`Hub::unregister_port`] returns, the port
//! receives nothing further. Ports must not register or unregister from
//! inside their own [`Sink::send`].

use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;
use transport::{Buffer, Notifiable, Pool, PortId, Priority, Recycle};
use transport_fabric::{
    Action, Flow, FlowContext, FlowOptions, Service, Sink, StateFlow, SubmitOutcome,
};

/// Delivery counters of a hub.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HubMetrics {
    /// Messages distributed.
    pub fanned_out: u64,
    /// References accepted by ports.
    pub delivered: u64,
    /// Deliveries suppressed because the port was the origin.
    pub skipped_origin: u64,
    /// Deliveries rejected by a port's queue policy.
    pub dropped: u64,
    /// Deliveries refused by a terminated port.
    pub closed: u64,
}

#[derive(Default)]
struct HubCounters {
    fanned_out: AtomicU64,
    delivered: AtomicU64,
    skipped_origin: AtomicU64,
    dropped: AtomicU64,
    closed: AtomicU64,
}

impl HubCounters {
    fn record(&self, outcome: SubmitOutcome) {
        match outcome {
            SubmitOutcome::Accepted => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            SubmitOutcome::Dropped => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            SubmitOutcome::Closed => {
                self.closed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn snapshot(&self) -> HubMetrics {
        HubMetrics {
            fanned_out: self.fanned_out.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            skipped_origin: self.skipped_origin.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            closed: self.closed.load(Ordering::Relaxed),
        }
    }
}

struct PortEntry<T> {
    id: PortId,
    sink: Weak<dyn Sink<T>>,
}

struct Ports<T> {
    name: String,
    entries: Mutex<SmallVec<[PortEntry<T>; 4]>>,
    counters: HubCounters,
}

impl<T: Send + Sync + 'static> Ports<T> {
    fn fan_out(&self, buffer: Buffer<T>) {
        let origin = buffer.origin();
        self.counters.fanned_out.fetch_add(1, Ordering::Relaxed);

        // Strong handles are dropped only after the lock is released.
        let mut reached: SmallVec<[Arc<dyn Sink<T>>; 8]> = SmallVec::new();
        {
            let mut entries = self.entries.lock();
            let mut stale = false;
            for entry in entries.iter() {
                if Some(entry.id) == origin {
                    self.counters.skipped_origin.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                let Some(sink) = entry.sink.upgrade() else {
                    stale = true;
                    continue;
                };
                let outcome = sink.send(buffer.clone(), Priority::default());
                self.counters.record(outcome);
                match outcome {
                    SubmitOutcome::Accepted => {
                        tracing::trace!(hub = %self.name, port = %entry.id, "delivered");
                    }
                    SubmitOutcome::Dropped => {
                        tracing::warn!(hub = %self.name, port = %entry.id, "port rejected message");
                    }
                    SubmitOutcome::Closed => {
                        tracing::debug!(hub = %self.name, port = %entry.id, "port closed");
                    }
                }
                reached.push(sink);
            }
            if stale {
                entries.retain(|entry| entry.sink.strong_count() > 0);
                tracing::debug!(hub = %self.name, ports = entries.len(), "pruned dropped ports");
            }
        }
        drop(reached);
        drop(buffer);
    }
}

/// The hub's own flow: fan out, release, next.
struct Distributor<T> {
    ports: Arc<Ports<T>>,
}

impl<T: Send + Sync + 'static> StateFlow for Distributor<T> {
    type Message = T;
    type State = Infallible;

    fn entry(&mut self, ctx: &mut FlowContext<'_, T>) -> Action<Infallible> {
        if let Some(buffer) = ctx.take_message() {
            self.ports.fan_out(buffer);
        }
        Action::ReleaseAndExit
    }

    fn resume(&mut self, state: Infallible, _ctx: &mut FlowContext<'_, T>) -> Action<Infallible> {
        match state {}
    }
}

struct HubInner<T: Recycle> {
    flow: Flow<Distributor<T>>,
    ports: Arc<Ports<T>>,
    pool: Pool<T>,
}

/// Fan-out router for messages of type `T`. Cloning shares the same hub.
pub struct Hub<T: Recycle> {
    inner: Arc<HubInner<T>>,
}

impl<T: Recycle> Clone for Hub<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Recycle> Hub<T> {
    /// Creates a hub running on `service`, allocating from `pool`.
    pub fn new(service: &Service, name: impl Into<String>, pool: Pool<T>) -> Self {
        Self::with_options(service, FlowOptions::named(name), pool)
    }

    /// Creates a hub whose distributor flow uses `options`.
    pub fn with_options(service: &Service, options: FlowOptions, pool: Pool<T>) -> Self {
        let ports = Arc::new(Ports {
            name: options.name.clone(),
            entries: Mutex::new(SmallVec::new()),
            counters: HubCounters::default(),
        });
        let flow = Flow::new(
            service,
            Distributor {
                ports: Arc::clone(&ports),
            },
            options,
        );
        Self {
            inner: Arc::new(HubInner { flow, ports, pool }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.ports.name
    }

    /// Identity of the hub's distributor flow.
    pub fn id(&self) -> PortId {
        self.inner.flow.id()
    }

    /// Adds a port to the fan-out set. Returns `false` if a port with the
    /// same id is already registered.
    pub fn register_port(&self, port: &Arc<dyn Sink<T>>) -> bool {
        let id = port.id();
        let mut entries = self.inner.ports.entries.lock();
        if entries.iter().any(|entry| entry.id == id) {
            return false;
        }
        entries.push(PortEntry {
            id,
            sink: Arc::downgrade(port),
        });
        tracing::debug!(hub = %self.name(), port = %id, ports = entries.len(), "port registered");
        true
    }

    /// Removes a port. Returns whether it was registered.
    pub fn unregister_port(&self, id: PortId) -> bool {
        let mut entries = self.inner.ports.entries.lock();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        let removed = entries.len() != before;
        if removed {
            tracing::debug!(hub = %self.name(), port = %id, ports = entries.len(), "port unregistered");
        }
        removed
    }

    /// Number of registered ports, including any not yet pruned.
    pub fn port_count(&self) -> usize {
        self.inner.ports.entries.lock().len()
    }

    /// Enqueues a buffer for distribution. Its origin tag decides which
    /// port is skipped.
    pub fn send(&self, buffer: Buffer<T>) -> SubmitOutcome {
        self.inner.flow.send(buffer)
    }

    /// Tags a uniquely held buffer with `origin` and enqueues it.
    pub fn send_from(&self, origin: PortId, mut buffer: Buffer<T>) -> SubmitOutcome {
        buffer.set_origin(Some(origin));
        self.inner.flow.send(buffer)
    }

    /// The hub's ingress as a port others can send to.
    pub fn sink(&self) -> Arc<dyn Sink<T>> {
        self.inner.flow.sink()
    }

    pub fn pool(&self) -> &Pool<T> {
        &self.inner.pool
    }

    pub fn try_alloc(&self) -> Option<Buffer<T>> {
        self.inner.pool.try_alloc()
    }

    /// See [`Pool::alloc_or_wait`].
    pub fn alloc_or_wait(&self, waiter: &Arc<dyn Notifiable>) -> Option<Buffer<T>> {
        self.inner.pool.alloc_or_wait(waiter)
    }

    pub fn metrics(&self) -> HubMetrics {
        self.inner.ports.counters.snapshot()
    }

    /// Buffers waiting for distribution.
    pub fn backlog(&self) -> usize {
        self.inner.flow.queue_len()
    }
}

impl<T: Recycle> fmt::Debug for Hub<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub")
            .field("name", &self.name())
            .field("id", &self.id())
            .field("ports", &self.port_count())
            .finish()
    }
}
