use std::sync::Arc;

use hub::Hub;
use transport::PortId;
use transport_fabric::{LoopMember, Service};

use crate::port::ByteStreamPort;
use crate::stats::{BridgeCounters, BridgeMonitor, BridgeStats};
use crate::write::{BridgeOptions, Outbound, Progress};

/// Connects a byte-stream port to a `Hub<Vec<u8>>`.
///
/// Outbound buffers from the hub are written as fast as the port accepts
/// them, one buffer at a time. Inbound bytes are collected into a fresh hub
/// buffer tagged with this bridge's port id, so the hub never reflects them
/// back to the same link.
pub struct ByteBridge<P: ByteStreamPort> {
    port: P,
    out: Outbound<Vec<u8>>,
    counters: Arc<BridgeCounters>,
}

impl<P: ByteStreamPort> ByteBridge<P> {
    /// Enables `port` and registers the bridge on `hub`.
    pub fn new(service: &Service, hub: &Hub<Vec<u8>>, port: P, name: impl Into<String>) -> Self {
        Self::with_options(service, hub, port, BridgeOptions::named(name))
    }

    pub fn with_options(
        service: &Service,
        hub: &Hub<Vec<u8>>,
        mut port: P,
        options: BridgeOptions,
    ) -> Self {
        let counters = Arc::new(BridgeCounters::default());
        port.enable();
        let out = Outbound::new(service, hub, &options, Arc::clone(&counters));
        tracing::debug!(bridge = %options.name, hub = %hub.name(), port = %out.id(), "byte bridge up");
        Self {
            port,
            out,
            counters,
        }
    }

    /// Identity used as the origin tag of inbound data.
    pub fn id(&self) -> PortId {
        self.out.id()
    }

    pub fn is_enabled(&self) -> bool {
        self.out.is_enabled()
    }

    /// True while a stalled link is releasing outbound data unwritten.
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

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Disabling stops the port, leaves the hub and discards the pending
    /// buffer along with anything queued after it. Enabling reverses it.
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
        self.out.poll(|bytes, offset| {
            let remaining = &bytes[*offset..];
            let room = port.available_for_write().min(remaining.len());
            let written = if room > 0 {
                port.write(&remaining[..room])
            } else {
                0
            };
            *offset += written;
            counters.add_bytes(written);
            if *offset >= bytes.len() {
                Progress::Done
            } else if written > 0 {
                Progress::Partial
            } else {
                Progress::Blocked
            }
        })
    }

    fn poll_read(&mut self) -> usize {
        let available = self.port.available_to_read();
        if available == 0 {
            return 0;
        }
        let Some(mut buffer) = self.out.hub().try_alloc() else {
            self.counters.add_deferred_read();
            tracing::debug!(bridge = %self.out.name(), available, "no free buffer, read deferred");
            return 0;
        };
        let Some(bytes) = buffer.get_mut() else {
            return 0;
        };
        bytes.resize(available, 0);
        let read = self.port.read(bytes);
        bytes.truncate(read);
        if read == 0 {
            return 0;
        }
        self.counters.add_inbound();
        self.out.hub().send_from(self.out.id(), buffer);
        1
    }
}

impl<P: ByteStreamPort> LoopMember for ByteBridge<P> {
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

impl<P: ByteStreamPort> Drop for ByteBridge<P> {
    fn drop(&mut self) {
        self.set_enabled(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{recorder, LoopbackBytes};
    use transport::Pool;
    use transport_fabric::{Executor, RunState};

    fn setup(capacity: usize) -> (Service, Hub<Vec<u8>>) {
        let service = Service::new("bytes", Executor::named("bytes"));
        let hub = Hub::new(
            &service,
            "bytes",
            Pool::fixed("bytes", capacity).expect("pool"),
        );
        (service, hub)
    }

    fn drive(service: &Service) {
        while service.executor().run_some() > 0 {}
    }

    #[test]
    fn partial_writes_complete_once() {
        let (service, hub) = setup(2);
        let port = LoopbackBytes::new(4);
        let mut bridge = ByteBridge::new(&service, &hub, port.clone(), "uart");

        let mut out = hub.try_alloc().expect("cell");
        out.get_mut().expect("unique").extend_from_slice(b"0123456789");
        hub.send(out);
        drive(&service);
        assert_eq!(bridge.out.run_state(), RunState::Suspended);

        assert_eq!(bridge.poll(), 1);
        assert_eq!(bridge.poll(), 1);
        assert_eq!(hub.pool().outstanding(), 1, "held until the last byte");
        assert_eq!(bridge.stats().completions, 0);
        assert_eq!(bridge.poll(), 1);
        assert_eq!(hub.pool().outstanding(), 0);
        assert_eq!(port.written(), b"0123456789");

        let stats = bridge.stats();
        assert_eq!(stats.bytes_written, 10);
        assert_eq!(stats.completions, 1);
        assert_eq!(bridge.out.run_state(), RunState::Scheduled);
        drive(&service);
        assert_eq!(bridge.out.run_state(), RunState::Idle);
    }

    #[test]
    fn inbound_bytes_are_tagged_and_not_echoed() {
        let (service, hub) = setup(2);
        let port = LoopbackBytes::new(64);
        let mut bridge = ByteBridge::new(&service, &hub, port.clone(), "uart");
        let (tap, tap_rx) = recorder();
        hub.register_port(&tap);

        port.inject(b"hello");
        assert_eq!(bridge.poll(), 1);
        drive(&service);

        let got = tap_rx.try_recv().expect("delivered to tap");
        assert_eq!(&got[..], b"hello");
        assert_eq!(got.origin(), Some(bridge.id()));
        assert!(port.written().is_empty(), "never written back to its source");
        assert_eq!(bridge.stats().inbound, 1);
    }

    #[test]
    fn exhausted_pool_defers_reads() {
        let (service, hub) = setup(1);
        let port = LoopbackBytes::new(64);
        let mut bridge = ByteBridge::new(&service, &hub, port.clone(), "uart");
        let held = hub.try_alloc().expect("only cell");

        port.inject(b"abc");
        assert_eq!(bridge.poll(), 0);
        assert_eq!(bridge.stats().deferred_reads, 1);

        drop(held);
        assert_eq!(bridge.poll(), 1);
        drive(&service);
        assert_eq!(bridge.stats().inbound, 1);
    }

    #[test]
    fn disable_discards_pending_and_leaves_hub() {
        let (service, hub) = setup(3);
        let port = LoopbackBytes::new(2);
        let mut bridge = ByteBridge::new(&service, &hub, port.clone(), "uart");
        for text in [&b"first"[..], b"second"] {
            let mut out = hub.try_alloc().expect("cell");
            out.get_mut().expect("unique").extend_from_slice(text);
            hub.send(out);
        }
        drive(&service);
        bridge.poll();
        assert_eq!(hub.pool().outstanding(), 2);

        bridge.set_enabled(false);
        assert!(!port.is_enabled());
        assert_eq!(hub.port_count(), 0);
        drive(&service);
        assert_eq!(hub.pool().outstanding(), 0, "pending and queued buffers released");
        assert_eq!(bridge.poll(), 0);

        bridge.set_enabled(true);
        assert!(port.is_enabled());
        assert_eq!(hub.port_count(), 1);
    }

    #[test]
    fn stalled_link_sheds_and_recovers() {
        let (service, hub) = setup(4);
        let port = LoopbackBytes::new(0);
        let options = BridgeOptions {
            stall_polls: Some(3),
            ..BridgeOptions::named("dead")
        };
        let mut bridge = ByteBridge::with_options(&service, &hub, port.clone(), options);
        for text in [&b"one"[..], b"two", b"three"] {
            let mut out = hub.try_alloc().expect("cell");
            out.get_mut().expect("unique").extend_from_slice(text);
            hub.send(out);
        }
        drive(&service);
        assert_eq!(hub.pool().outstanding(), 3);

        for _ in 0..3 {
            assert_eq!(bridge.poll(), 0);
        }
        assert!(bridge.is_shedding());
        drive(&service);
        assert_eq!(hub.pool().outstanding(), 0, "stalled link holds no cells");
        assert_eq!(bridge.stats().shed, 3);

        // The write path reopens after another `stall_polls` idle polls.
        port.set_per_poll(16);
        for _ in 0..3 {
            bridge.poll();
        }
        assert!(!bridge.is_shedding());
        let mut out = hub.try_alloc().expect("cell");
        out.get_mut().expect("unique").extend_from_slice(b"back");
        hub.send(out);
        drive(&service);
        assert_eq!(bridge.poll(), 1);
        assert_eq!(port.written(), b"back");
        assert_eq!(bridge.stats().completions, 1);
    }

    #[test]
    fn drop_releases_pending_buffer() {
        let (service, hub) = setup(1);
        let port = LoopbackBytes::new(1);
        let mut bridge = ByteBridge::new(&service, &hub, port.clone(), "uart");
        let mut out = hub.try_alloc().expect("cell");
        out.get_mut().expect("unique").extend_from_slice(b"xyz");
        hub.send(out);
        drive(&service);
        bridge.poll();
        assert_eq!(hub.pool().outstanding(), 1);

        drop(bridge);
        drive(&service);
        assert_eq!(hub.pool().outstanding(), 0);
        assert_eq!(hub.port_count(), 0);
        assert!(!port.is_enabled());
    }
}
