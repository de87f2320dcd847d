//! Recording ports shared by the scenario tests.

use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use transport::{Buffer, PortId, Priority};
use transport_fabric::{Service, Sink, SubmitOutcome};

pub struct Recorder<T> {
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

/// A port that keeps every buffer it receives until the test drains it.
pub fn recorder<T: Send + Sync + 'static>() -> (Arc<dyn Sink<T>>, Receiver<Buffer<T>>) {
    let (tx, rx) = unbounded();
    let sink: Arc<dyn Sink<T>> = Arc::new(Recorder {
        id: PortId::next(),
        tx,
    });
    (sink, rx)
}

/// Runs executor work until nothing is runnable.
pub fn drive(service: &Service) -> usize {
    let mut steps = 0;
    loop {
        let ran = service.executor().run_some();
        if ran == 0 {
            return steps;
        }
        steps += ran;
    }
}
