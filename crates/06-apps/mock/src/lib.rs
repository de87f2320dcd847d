//! In-memory hardware for exercising bridges without devices.
//!
//! Each mock is a cheap handle over shared state: hand one clone to a
//! bridge and keep another to inject traffic and inspect what was written.

use std::collections::VecDeque;
use std::sync::Arc;

use bridges::{ByteStreamPort, FramePort};
use parking_lot::Mutex;
use transport_codecs::CanFrame;

/// Enable/disable call counts recorded by a mock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PowerLog {
    pub enables: usize,
    pub disables: usize,
}

#[derive(Default)]
struct SerialState {
    written: Vec<u8>,
    inbound: VecDeque<u8>,
    write_room: Option<usize>,
    read_chunk: Option<usize>,
    enabled: bool,
    power: PowerLog,
}

/// A UART-like byte stream.
#[derive(Clone, Default)]
pub struct MockSerial {
    state: Arc<Mutex<SerialState>>,
}

impl MockSerial {
    /// Unlimited write room and reads.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts at most `room` bytes per write call.
    pub fn with_write_room(room: usize) -> Self {
        let mock = Self::default();
        mock.set_write_room(Some(room));
        mock
    }

    pub fn set_write_room(&self, room: Option<usize>) {
        self.state.lock().write_room = room;
    }

    /// Reports at most `chunk` readable bytes at a time.
    pub fn set_read_chunk(&self, chunk: Option<usize>) {
        self.state.lock().read_chunk = chunk;
    }

    pub fn push_inbound(&self, bytes: &[u8]) {
        self.state.lock().inbound.extend(bytes);
    }

    pub fn pending_inbound(&self) -> usize {
        self.state.lock().inbound.len()
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    /// Drains and returns everything written so far.
    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.lock().written)
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    pub fn power_log(&self) -> PowerLog {
        self.state.lock().power
    }
}

impl ByteStreamPort for MockSerial {
    fn available_for_write(&self) -> usize {
        self.state.lock().write_room.unwrap_or(usize::MAX)
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        let mut state = self.state.lock();
        let n = bytes.len().min(state.write_room.unwrap_or(usize::MAX));
        state.written.extend_from_slice(&bytes[..n]);
        n
    }

    fn available_to_read(&self) -> usize {
        let state = self.state.lock();
        let len = state.inbound.len();
        state.read_chunk.map_or(len, |chunk| len.min(chunk))
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut state = self.state.lock();
        let n = buf.len().min(state.inbound.len());
        for (dst, src) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *dst = src;
        }
        n
    }

    fn enable(&mut self) {
        let mut state = self.state.lock();
        state.enabled = true;
        state.power.enables += 1;
    }

    fn disable(&mut self) {
        let mut state = self.state.lock();
        state.enabled = false;
        state.power.disables += 1;
    }
}

#[derive(Default)]
struct CanState {
    written: Vec<CanFrame>,
    inbound: VecDeque<CanFrame>,
    tx_free: Option<usize>,
    enabled: bool,
    power: PowerLog,
}

/// A CAN controller with an optionally bounded transmit FIFO.
#[derive(Clone, Default)]
pub struct MockCan {
    state: Arc<Mutex<CanState>>,
}

impl MockCan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transmit FIFO with `slots` free entries; refill with [`MockCan::set_tx_free`].
    pub fn with_tx_slots(slots: usize) -> Self {
        let mock = Self::default();
        mock.set_tx_free(Some(slots));
        mock
    }

    pub fn set_tx_free(&self, slots: Option<usize>) {
        self.state.lock().tx_free = slots;
    }

    pub fn push_inbound(&self, frame: CanFrame) {
        self.state.lock().inbound.push_back(frame);
    }

    pub fn written(&self) -> Vec<CanFrame> {
        self.state.lock().written.clone()
    }

    pub fn take_written(&self) -> Vec<CanFrame> {
        std::mem::take(&mut self.state.lock().written)
    }

    pub fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }

    pub fn power_log(&self) -> PowerLog {
        self.state.lock().power
    }
}

impl FramePort<CanFrame> for MockCan {
    fn available_for_write(&self) -> usize {
        self.state.lock().tx_free.unwrap_or(usize::MAX)
    }

    fn write(&mut self, frame: &CanFrame) -> bool {
        let mut state = self.state.lock();
        match state.tx_free {
            Some(0) => return false,
            Some(ref mut free) => *free -= 1,
            None => {}
        }
        state.written.push(*frame);
        true
    }

    fn available_to_read(&self) -> usize {
        self.state.lock().inbound.len()
    }

    fn read(&mut self) -> Option<CanFrame> {
        self.state.lock().inbound.pop_front()
    }

    fn enable(&mut self) {
        let mut state = self.state.lock();
        state.enabled = true;
        state.power.enables += 1;
    }

    fn disable(&mut self) {
        let mut state = self.state.lock();
        state.enabled = false;
        state.power.disables += 1;
    }
}
