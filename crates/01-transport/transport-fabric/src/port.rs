use transport::{Buffer, PortId, Priority};

use crate::service::SubmitOutcome;

/// Anything that accepts shared buffers: a flow's queue, a hub, a recorder.
///
/// `send` must never block. Rejected buffers are released by the sink before
/// it returns.
pub trait Sink<T>: Send + Sync {
    /// Identity used for origin tagging and loop avoidance.
    fn id(&self) -> PortId;

    /// Hands one reference to the sink.
    fn send(&self, buffer: Buffer<T>, priority: Priority) -> SubmitOutcome;
}
