//! CAN frames and the GridConnect text encoding used on byte-stream links.

mod adapter;
mod error;
mod format;
mod frame;
mod parser;

pub use adapter::{AdapterStats, GcAdapter, GcPacketPrinter};
pub use error::{CodecError, CodecResult};
pub use format::{parse_body, render, render_into, MAX_FRAME_TEXT};
pub use frame::{CanFrame, EXTENDED_ID_MASK, MAX_DATA, STANDARD_ID_MASK};
pub use parser::{GcStreamParser, FRAME_BUFFER};
