//! Bridges between hardware ports and hubs.
//!
//! A bridge is a [`LoopMember`](transport_fabric::LoopMember): the polling
//! loop calls it to move data between a non-blocking device and a hub.
//! Its outbound side is a flow registered on the hub that holds one buffer
//! at a time until the device has accepted all of it, or until the link is
//! found stalled.

mod byte;
mod frame;
mod port;
mod serial;
mod stats;
mod write;

#[cfg(test)]
mod test_support;

pub use byte::ByteBridge;
pub use frame::{CanBridge, FrameBridge};
pub use port::{ByteStreamPort, FramePort};
pub use serial::{SerialBridge, SerialOptions};
pub use stats::{BridgeMonitor, BridgeStats};
pub use write::{BridgeOptions, DEFAULT_STALL_POLLS};
