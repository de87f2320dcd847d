use std::sync::Arc;

use hub::Hub;
use transport::{PortId, Recycle};
use transport_codecs::CanFrame;
use transport_fabric::{LoopMember, Service};

use crate::port::FramePort;
use crate::stats::{BridgeCounters, BridgeMonitor, BridgeStats};
use crate::write::{BridgeOptions, Outbound, Progress};

/// Connects a frame-oriented controller to a hub carrying one frame per
/// buffer. A buffer is released only once the controller accepted its
/// frame.
pub struct FrameBridge<P, F>
where
    P: FramePort<F>,
    F: Recycle,
{
    port: P,
    out: Outbound<F>,
    counters: Arc<BridgeCounters>,
}

/// Bridge between a CAN controller and a binary CAN hub.
pub type CanBridge<P> = FrameBridge<P, CanFrame>;

impl<P, F> FrameBridge<P, F>
where
    P: FramePort<F>,
    F: Recycle,
{
    pub fn new(service: &Service, hub: &Hub<F>, port: P, name: impl Into<String>) -> Self {
        Self::with_options(service, hub, port, BridgeOptions::named(name))
    }

    pub fn with_options(service: &Service, hub: &Hub<F>, mut port: P, options: BridgeOptions) -> Self {
        let counters = Arc::new(BridgeCounters::default());
        port.enable();
        let out = Outbound::new(service, hub, &options, Arc::clone(&counters));
        tracing::debug!(bridge = %options.name, hub = %hub.name(), port = %out.id(), "frame bridge up");
        Self {
            port,
            out,
            counters,
        }
    }

    pub fn id(&self) -> PortId {
        self.out.id()
    }

    pub fn is_enabled(&self) -> bool {
        self.out.is_enabled()
    }

    pub fn is_shedding(&self) -> bool {
        self.out.is_shedding()
    }

    pub fn stats(&self) -> BridgeStats {
        self.counters.snapshot()
    }

    pub fn monitor(&self) -> BridgeMonitor {
        BridgeMonitor::new(Arc::clone(&self.counters))
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        let port = &mut self.port;
        self.out.set_enabled(enabled, |on| {
            if on {
                port.enable();
            } else {
                port.disable();
            }
        });
    }

    fn poll_write(&mut self) -> usize {
        let port = &mut self.port;
        let counters = &self.counters;
        self.out.poll(|frame, _| {
            if port.available_for_write() == 0 || !port.write(frame) {
                return Progress::Blocked;
            }
            counters.add_frame();
            Progress::Done
        })
    }

    fn poll_read(&mut self) -> usize {
        let mut injected = 0;
        for _ in 0..self.port.available_to_read() {
            let Some(mut buffer) = self.out.hub().try_alloc() else {
                self.counters.add_deferred_read();
                tracing::debug!(bridge = %self.out.name(), "no free buffer, read deferred");
                break;
            };
            let Some(frame) = self.port.read() else {
                break;
            };
            if let Some(slot) = buffer.get_mut() {
                *slot = frame;
            }
            self.counters.add_inbound();
            self.out.hub().send_from(self.out.id(), buffer);
            injected += 1;
        }
        injected
    }
}

impl<P, F> LoopMember for FrameBridge<P, F>
where
    P: FramePort<F>,
    F: Recycle,
{
    fn poll(&mut self) -> usize {
        if !self.out.is_enabled() {
            return 0;
        }
        self.poll_write() + self.poll_read()
    }

    fn name(&self) -> &str {
        self.out.name()
    }
}

impl<P, F> Drop for FrameBridge<P, F>
where
    P: FramePort<F>,
    F: Recycle,
{
    fn drop(&mut self) {
        self.set_enabled(false);
    }
}
