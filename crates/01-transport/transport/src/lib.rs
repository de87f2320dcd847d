//! Core message-passing primitives shared by every layer of the stack.
//!
//! * [`Buffer`] – reference-counted payload cell with an origin tag.
//! * [`Pool`] – fixed or growing allocator of buffers with flow-level waiting.
//! * [`Queue`] – FIFO or priority input queue.
//! * [`Notifiable`] – non-blocking wakeup target, plus a blocking sync helper.
//! * [`TransportError`] – configuration failures.

mod buffer;
mod error;
mod notify;
mod pool;
mod queue;
pub mod wait;

pub use buffer::{Buffer, PortId, Recycle};
pub use error::{TransportError, TransportResult};
pub use notify::{Notifiable, SyncNotifiable};
pub use pool::{Pool, PoolConfig};
pub use queue::{Priority, Queue, QueueDiscipline};
