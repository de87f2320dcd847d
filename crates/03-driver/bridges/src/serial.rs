use hub::Hub;
use serde::{Deserialize, Serialize};
use transport::{Pool, PoolConfig, PortId, TransportResult};
use transport_codecs::{AdapterStats, CanFrame, GcAdapter};
use transport_fabric::{LoopMember, Service};

use crate::byte::ByteBridge;
use crate::port::ByteStreamPort;
use crate::stats::{BridgeMonitor, BridgeStats};
use crate::write::{BridgeOptions, DEFAULT_STALL_POLLS};

/// Settings of a GridConnect serial link.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialOptions {
    pub name: String,
    /// Cells in the link's private text pool; `None` grows on demand.
    pub text_pool_capacity: Option<usize>,
    /// Emit every rendered character twice.
    pub double_bytes: bool,
    /// See [`BridgeOptions::stall_polls`].
    pub stall_polls: Option<u32>,
}

impl Default for SerialOptions {
    fn default() -> Self {
        Self {
            name: "serial".to_owned(),
            text_pool_capacity: Some(8),
            double_bytes: false,
            stall_polls: Some(DEFAULT_STALL_POLLS),
        }
    }
}

/// A byte-stream port speaking GridConnect, attached to a binary CAN hub.
///
/// Each link owns a private text hub so that traffic from one serial link
/// reaches the others only through the CAN hub, after a parse and render
/// round trip.
pub struct SerialBridge<P: ByteStreamPort> {
    // Field order is drop order: stop the port, then unlink the adapter.
    bridge: ByteBridge<P>,
    adapter: GcAdapter,
    text_hub: Hub<Vec<u8>>,
}

impl<P: ByteStreamPort> SerialBridge<P> {
    pub fn new(
        service: &Service,
        can_hub: &Hub<CanFrame>,
        port: P,
        options: SerialOptions,
    ) -> TransportResult<Self> {
        let pool = Pool::new(PoolConfig {
            name: format!("{}:text", options.name),
            capacity: options.text_pool_capacity,
        })?;
        let text_hub = Hub::new(service, format!("{}:text", options.name), pool);
        let adapter = GcAdapter::new(service, &text_hub, can_hub, options.double_bytes);
        let bridge = ByteBridge::with_options(
            service,
            &text_hub,
            port,
            BridgeOptions {
                name: options.name.clone(),
                stall_polls: options.stall_polls,
            },
        );
        tracing::info!(
            link = %options.name,
            can = %can_hub.name(),
            double_bytes = options.double_bytes,
            "gridconnect serial link attached"
        );
        Ok(Self {
            bridge,
            adapter,
            text_hub,
        })
    }

    pub fn id(&self) -> PortId {
        self.bridge.id()
    }

    pub fn text_hub(&self) -> &Hub<Vec<u8>> {
        &self.text_hub
    }

    pub fn stats(&self) -> BridgeStats {
        self.bridge.stats()
    }

    pub fn monitor(&self) -> BridgeMonitor {
        self.bridge.monitor()
    }

    pub fn adapter_stats(&self) -> AdapterStats {
        self.adapter.stats()
    }

    pub fn port(&self) -> &P {
        self.bridge.port()
    }

    pub fn is_shedding(&self) -> bool {
        self.bridge.is_shedding()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.bridge.set_enabled(enabled);
    }
}

impl<P: ByteStreamPort> LoopMember for SerialBridge<P> {
    fn poll(&mut self) -> usize {
        self.bridge.poll()
    }

    fn name(&self) -> &str {
        self.bridge.name()
    }
}
