#![deny(missing_docs)]
//! Native driver for a CAN protocol stack.
//!
//! [`NativeStack`] owns the service every flow runs on, the binary CAN hub
//! higher layers attach to, and the hardware bridges polled from the host's
//! main loop. Executor work runs either inline from [`NativeStack::loop_once`]
//! or on a dedicated thread started with
//! [`NativeStack::start_executor_thread`].

use std::collections::BTreeMap;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use bridges::{
    BridgeMonitor, BridgeOptions, BridgeStats, ByteStreamPort, CanBridge, FrameBridge, FramePort,
    SerialBridge, SerialOptions, DEFAULT_STALL_POLLS,
};
use hub::Hub;
use serde::{Deserialize, Serialize};
use transport::{Pool, PoolConfig};
use transport_codecs::CanFrame;
use transport_fabric::{Executor, ExecutorConfig, LoopRuntime, MemberId, Service};
use tracing_subscriber::{fmt, EnvFilter};

/// Sizing and behaviour of a [`NativeStack`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Executor shared by every flow of the stack.
    pub executor: ExecutorConfig,
    /// Cells in the CAN hub's pool; `None` grows on demand.
    pub can_pool_capacity: Option<usize>,
    /// Cells in each GridConnect port's private text pool.
    pub text_pool_capacity: Option<usize>,
    /// Emit every GridConnect character twice on serial links.
    pub double_bytes: bool,
    /// Polls a port may refuse every write before it drops its outbound
    /// traffic instead of holding shared cells; `None` never gives up.
    pub stall_polls: Option<u32>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig {
                name: "can-stack".to_owned(),
                ..ExecutorConfig::default()
            },
            can_pool_capacity: Some(32),
            text_pool_capacity: Some(8),
            double_bytes: false,
            stall_polls: Some(DEFAULT_STALL_POLLS),
        }
    }
}

type Watchdog = Box<dyn FnMut() + Send>;

/// A CAN hub, its executor and the bridges feeding it.
pub struct NativeStack {
    config: StackConfig,
    members: LoopRuntime,
    monitors: BTreeMap<MemberId, BridgeMonitor>,
    can_hub: Hub<CanFrame>,
    service: Service,
    watchdog: Option<Watchdog>,
    executor_thread: Option<JoinHandle<()>>,
}

impl NativeStack {
    /// Builds the executor, service and CAN hub described by `config`.
    pub fn new(config: StackConfig) -> Result<Self> {
        let executor = Executor::new(config.executor.clone()).context("invalid executor config")?;
        let service = Service::new(config.executor.name.clone(), executor);
        let pool = Pool::new(PoolConfig {
            name: "can".to_owned(),
            capacity: config.can_pool_capacity,
        })
        .context("invalid CAN pool capacity")?;
        let can_hub = Hub::new(&service, "can", pool);
        tracing::info!(
            executor = %config.executor.name,
            can_pool = ?config.can_pool_capacity,
            "native stack created"
        );
        Ok(Self {
            config,
            members: LoopRuntime::new(),
            monitors: BTreeMap::new(),
            can_hub,
            service,
            watchdog: None,
            executor_thread: None,
        })
    }

    /// The service flows of this stack are constructed on.
    pub fn service(&self) -> &Service {
        &self.service
    }

    /// The executor running every flow of this stack.
    pub fn executor(&self) -> &Executor {
        self.service.executor()
    }

    /// Binary CAN hub; higher protocol layers register ports here.
    pub fn can_hub(&self) -> &Hub<CanFrame> {
        &self.can_hub
    }

    /// The configuration the stack was built from.
    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    /// Number of ports currently polled.
    pub fn port_count(&self) -> usize {
        self.members.len()
    }

    /// Attaches a byte-stream port speaking GridConnect text.
    pub fn add_gridconnect_port<P>(&mut self, name: impl Into<String>, port: P) -> Result<MemberId>
    where
        P: ByteStreamPort + 'static,
    {
        let name = name.into();
        let bridge = SerialBridge::new(
            &self.service,
            &self.can_hub,
            port,
            SerialOptions {
                name: name.clone(),
                text_pool_capacity: self.config.text_pool_capacity,
                double_bytes: self.config.double_bytes,
                stall_polls: self.config.stall_polls,
            },
        )
        .with_context(|| format!("attaching gridconnect port `{name}`"))?;
        let monitor = bridge.monitor();
        let id = self.members.register(bridge);
        self.monitors.insert(id, monitor);
        Ok(id)
    }

    /// Attaches a CAN controller directly to the CAN hub.
    pub fn add_can_port<P>(&mut self, name: impl Into<String>, port: P) -> MemberId
    where
        P: FramePort<CanFrame> + 'static,
    {
        let options = BridgeOptions {
            name: name.into(),
            stall_polls: self.config.stall_polls,
        };
        let bridge: CanBridge<P> = FrameBridge::with_options(&self.service, &self.can_hub, port, options);
        let monitor = bridge.monitor();
        let id = self.members.register(bridge);
        self.monitors.insert(id, monitor);
        id
    }

    /// Traffic counters of an attached port; `None` if `id` is unknown.
    pub fn port_stats(&self, id: MemberId) -> Option<BridgeStats> {
        self.monitors.get(&id).map(BridgeMonitor::stats)
    }

    /// Detaches a port. Its bridge disables the hardware and unlinks from
    /// the hubs; returns `false` if `id` was unknown.
    pub fn remove_port(&mut self, id: MemberId) -> bool {
        let stats = self.monitors.remove(&id).map(|monitor| monitor.stats());
        match self.members.remove(id) {
            Some(member) => {
                tracing::info!(port = %member.name(), ?stats, "port removed");
                true
            }
            None => false,
        }
    }

    /// Installs a liveness callback invoked before each port is polled.
    pub fn set_watchdog(&mut self, feed: impl FnMut() + Send + 'static) {
        self.watchdog = Some(Box::new(feed));
    }

    /// One iteration of the host loop: polls every port, then runs pending
    /// executor work unless a dedicated executor thread owns it. Returns the
    /// amount of work done.
    pub fn loop_once(&mut self) -> usize {
        let watchdog = &mut self.watchdog;
        let mut work = self.members.run_tick_with(|_| {
            if let Some(feed) = watchdog.as_mut() {
                feed();
            }
        });
        if !self.executor().has_dedicated_thread() {
            work += self.executor().run_some();
        }
        work
    }

    /// Hands the executor a thread of its own.
    pub fn start_executor_thread(&mut self) -> Result<()> {
        if self.executor_thread.is_some() {
            return Ok(());
        }
        let name = format!("{}-exec", self.config.executor.name);
        let handle = self
            .executor()
            .start_thread(name)
            .context("starting executor thread")?;
        self.executor_thread = Some(handle);
        Ok(())
    }

    /// Donates the calling thread to the executor until
    /// [`Executor::shutdown`] is called from elsewhere.
    pub fn loop_executor(&self) {
        self.executor().loop_forever();
    }

    /// Detaches every port, stops the executor and joins its thread.
    pub fn shutdown(&mut self) {
        let ids: Vec<MemberId> = self.members.ids().collect();
        for id in ids {
            self.remove_port(id);
        }
        self.executor().shutdown();
        if let Some(handle) = self.executor_thread.take() {
            if handle.join().is_err() {
                tracing::error!("executor thread panicked");
            }
        }
    }
}

impl Drop for NativeStack {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Installs a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // Ignore error if already set (e.g., during tests).
    let _ = fmt().with_env_filter(env_filter).try_init();
}
