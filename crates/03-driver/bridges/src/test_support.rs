use std::collections::VecDeque;
use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use transport::{Buffer, PortId, Priority};
use transport_fabric::{Sink, SubmitOutcome};

use crate::port::{ByteStreamPort, FramePort};

#[derive(Default)]
struct ByteState {
    per_poll: usize,
    written: Vec<u8>,
    inbound: VecDeque<u8>,
    enabled: bool,
}

/// Byte port accepting at most `per_poll` bytes per write call.
#[derive(Clone)]
pub(crate) struct LoopbackBytes {
    state: Arc<Mutex<ByteState>>,
}

impl LoopbackBytes {
    pub(crate) fn new(per_poll: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(ByteState {
                per_poll,
                ..ByteState::default()
            })),
        }
    }

    pub(crate) fn set_per_poll(&self, per_poll: usize) {
        self.state.lock().per_poll = per_poll;
    }

    pub(crate) fn inject(&self, bytes: &[u8]) {
        self.state.lock().inbound.extend(bytes);
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }
}

impl ByteStreamPort for LoopbackBytes {
    fn available_for_write(&self) -> usize {
        self.state.lock().per_poll
    }

    fn write(&mut self, bytes: &[u8]) -> usize {
        let mut state = self.state.lock();
        let n = bytes.len().min(state.per_poll);
        state.written.extend_from_slice(&bytes[..n]);
        n
    }

    fn available_to_read(&self) -> usize {
        self.state.lock().inbound.len()
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
        self.state.lock().enabled = true;
    }

    fn disable(&mut self) {
        self.state.lock().enabled = false;
    }
}

struct FrameState<F> {
    written: Vec<F>,
    inbound: VecDeque<F>,
    tx_free: usize,
    enabled: bool,
}

/// Frame port with a transmit FIFO of `tx_free` slots, refilled by the test.
#[derive(Clone)]
pub(crate) struct LoopbackFrames<F> {
    state: Arc<Mutex<FrameState<F>>>,
}

impl<F: Clone> LoopbackFrames<F> {
    pub(crate) fn new(tx_free: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(FrameState {
                written: Vec::new(),
                inbound: VecDeque::new(),
                tx_free,
                enabled: false,
            })),
        }
    }

    pub(crate) fn inject(&self, frame: F) {
        self.state.lock().inbound.push_back(frame);
    }

    pub(crate) fn set_tx_free(&self, free: usize) {
        self.state.lock().tx_free = free;
    }

    pub(crate) fn written(&self) -> Vec<F> {
        self.state.lock().written.clone()
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.state.lock().enabled
    }
}

impl<F: Clone + Send> FramePort<F> for LoopbackFrames<F> {
    fn available_for_write(&self) -> usize {
        self.state.lock().tx_free
    }

    fn write(&mut self, frame: &F) -> bool {
        let mut state = self.state.lock();
        if state.tx_free == 0 {
            return false;
        }
        state.tx_free -= 1;
        state.written.push(frame.clone());
        true
    }

    fn available_to_read(&self) -> usize {
        self.state.lock().inbound.len()
    }

    fn read(&mut self) -> Option<F> {
        self.state.lock().inbound.pop_front()
    }

    fn enable(&mut self) {
        self.state.lock().enabled = true;
    }

    fn disable(&mut self) {
        self.state.lock().enabled = false;
    }
}

struct Recorder<T> {
    id: PortId,
    tx: Sender<Buffer<T>>,
}

impl<T: Send + Sync + 'static> Sink<T> for Recorder<T> {
    fn id(&self) -> PortId {
        self.id
    }

    fn send(&self, buffer: Buffer<T>, _priority: Priority) -> SubmitOutcome {
        match self.tx.send(buffer) {
            Ok(()) => SubmitOutcome::Accepted,
            Err(_) => SubmitOutcome::Closed,
        }
    }
}

pub(crate) fn recorder<T: Send + Sync + 'static>() -> (Arc<dyn Sink<T>>, Receiver<Buffer<T>>) {
    let (tx, rx) = unbounded();
    let sink: Arc<dyn Sink<T>> = Arc::new(Recorder {
        id: PortId::next(),
        tx,
    });
    (sink, rx)
}
