use std::fmt;

use transport::Recycle;

use crate::error::{CodecError, CodecResult};

/// Largest 29-bit extended identifier.
pub const EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;
/// Largest 11-bit standard identifier.
pub const STANDARD_ID_MASK: u32 = 0x7FF;
/// Maximum payload of a classic CAN frame.
pub const MAX_DATA: usize = 8;

/// Native binary CAN frame carried by the CAN hub.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CanFrame {
    id: u32,
    extended: bool,
    remote: bool,
    len: u8,
    data: [u8; MAX_DATA],
}

impl CanFrame {
    /// Builds a data frame with a 29-bit identifier.
    pub fn extended(id: u32, data: &[u8]) -> CodecResult<Self> {
        Self::build(id, true, false, data)
    }

    /// Builds a data frame with an 11-bit identifier.
    pub fn standard(id: u32, data: &[u8]) -> CodecResult<Self> {
        Self::build(id, false, false, data)
    }

    /// Builds a remote-transmission-request frame.
    pub fn remote(id: u32, extended: bool) -> CodecResult<Self> {
        Self::build(id, extended, true, &[])
    }

    pub(crate) fn build(id: u32, extended: bool, remote: bool, data: &[u8]) -> CodecResult<Self> {
        let (mask, bits) = if extended {
            (EXTENDED_ID_MASK, 29)
        } else {
            (STANDARD_ID_MASK, 11)
        };
        if id & !mask != 0 {
            return Err(CodecError::IdentifierRange { id, bits });
        }
        if data.len() > MAX_DATA {
            return Err(CodecError::DataTooLong(data.len()));
        }
        let mut frame = Self {
            id,
            extended,
            remote,
            len: data.len() as u8,
            data: [0; MAX_DATA],
        };
        frame.data[..data.len()].copy_from_slice(data);
        Ok(frame)
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_extended(&self) -> bool {
        self.extended
    }

    pub fn is_remote(&self) -> bool {
        self.remote
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Recycle for CanFrame {}

impl fmt::Debug for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CanFrame")
            .field("id", &format_args!("{:#x}", self.id))
            .field("extended", &self.extended)
            .field("remote", &self.remote)
            .field("data", &self.data())
            .finish()
    }
}
