//! Hardware contracts polled by the bridges.
//!
//! Every call must return immediately. A port that cannot accept or supply
//! data reports zero availability; the bridge retries on its next poll.

/// Byte-oriented link such as a UART, USB CDC endpoint or TCP socket.
pub trait ByteStreamPort: Send {
    /// Bytes the port can accept right now.
    fn available_for_write(&self) -> usize;
    /// Writes a prefix of `bytes`, returning how many were accepted.
    fn write(&mut self, bytes: &[u8]) -> usize;
    /// Bytes ready to be read right now.
    fn available_to_read(&self) -> usize;
    /// Reads into `buf`, returning how many bytes were filled.
    fn read(&mut self, buf: &mut [u8]) -> usize;
    fn enable(&mut self);
    fn disable(&mut self);
}

/// Frame-oriented controller with transmit and receive FIFOs.
pub trait FramePort<F>: Send {
    /// Free transmit slots.
    fn available_for_write(&self) -> usize;
    /// Queues one frame; returns `false` if the controller refused it.
    fn write(&mut self, frame: &F) -> bool;
    /// Frames waiting in the receive FIFO.
    fn available_to_read(&self) -> usize;
    fn read(&mut self) -> Option<F>;
    fn enable(&mut self);
    fn disable(&mut self);
}
