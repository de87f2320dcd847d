//! The behavioural scenarios the stack guarantees, run against real hubs,
//! flows and bridges.

use std::sync::atomic::{AtomicUsize, Ordering};

use bridges::ByteBridge;
use hub::Hub;
use mock::MockSerial;
use transport::{Buffer, Pool, Recycle};
use transport_codecs::{render, CanFrame, GcAdapter};
use transport_fabric::{Executor, LoopMember, Service};

use crate::support::{drive, recorder};

fn service(name: &str) -> Service {
    Service::new(name, Executor::named(name))
}

#[test]
fn three_port_fan_out_shares_one_payload() {
    let svc = service("fanout");
    let hub = Hub::new(&svc, "bytes", Pool::<Vec<u8>>::fixed("bytes", 4).expect("pool"));
    let (a, a_rx) = recorder();
    let (b, b_rx) = recorder();
    let (c, c_rx) = recorder();
    for port in [&a, &b, &c] {
        assert!(hub.register_port(port));
    }

    let mut m = hub.try_alloc().expect("cell");
    m.get_mut().expect("unique").extend_from_slice(b"M");
    hub.send_from(a.id(), m);
    drive(&svc);

    assert!(a_rx.try_recv().is_err(), "origin gets nothing back");
    let at_b = b_rx.try_recv().expect("B receives M");
    let at_c = c_rx.try_recv().expect("C receives M");
    assert!(Buffer::ptr_eq(&at_b, &at_c), "one payload, two references");
    assert_eq!(at_b.ref_count(), 2);
    assert_eq!(hub.pool().outstanding(), 1);

    drop(at_b);
    assert_eq!(hub.pool().outstanding(), 1, "C still holds M");
    drop(at_c);
    assert_eq!(hub.pool().outstanding(), 0);
    assert_eq!(hub.pool().free_count(), 4);
}

static RECYCLED: AtomicUsize = AtomicUsize::new(0);

#[derive(Default)]
struct Counted(u32);

impl Recycle for Counted {
    fn recycle(&mut self) {
        RECYCLED.fetch_add(1, Ordering::SeqCst);
        self.0 = 0;
    }
}

#[test]
fn payload_is_reclaimed_exactly_once_after_last_holder() {
    let svc = service("refcount");
    let hub = Hub::new(&svc, "counted", Pool::fixed("counted", 1).expect("pool"));
    let holders: Vec<_> = (0..3).map(|_| recorder::<Counted>()).collect();
    for (sink, _) in &holders {
        hub.register_port(sink);
    }

    let mut cell = hub.try_alloc().expect("cell");
    cell.get_mut().expect("unique").0 = 7;
    let before = RECYCLED.load(Ordering::SeqCst);
    hub.send(cell);
    drive(&svc);

    let mut received: Vec<Buffer<Counted>> =
        holders.iter().map(|(_, rx)| rx.try_recv().expect("delivered")).collect();
    while let Some(holder) = received.pop() {
        assert_eq!(holder.0, 7, "payload intact while any holder remains");
        assert_eq!(RECYCLED.load(Ordering::SeqCst), before);
        drop(holder);
    }
    assert_eq!(RECYCLED.load(Ordering::SeqCst), before + 1);
    assert!(hub.try_alloc().is_some_and(|fresh| fresh.0 == 0));
}

#[test]
fn running_an_idle_executor_is_a_no_op() {
    let svc = service("idle");
    let _hub = Hub::new(&svc, "bytes", Pool::<Vec<u8>>::unbounded("bytes"));
    let before = svc.executor().stats();
    for _ in 0..3 {
        assert_eq!(svc.executor().run_some(), 0);
        assert!(!svc.executor().run_one());
    }
    assert_eq!(svc.executor().stats(), before);
    assert_eq!(svc.executor().pending(), 0);
}

#[test]
fn ten_bytes_through_four_byte_window_complete_once() {
    let svc = service("window");
    let hub = Hub::new(&svc, "uart", Pool::fixed("uart", 2).expect("pool"));
    let serial = MockSerial::with_write_room(4);
    let mut bridge = ByteBridge::new(&svc, &hub, serial.clone(), "uart0");

    let mut out = hub.try_alloc().expect("cell");
    out.get_mut().expect("unique").extend_from_slice(b"ABCDEFGHIJ");
    hub.send(out);
    drive(&svc);

    let mut progress = Vec::new();
    for _ in 0..3 {
        assert_eq!(bridge.stats().completions, 0);
        assert_eq!(hub.pool().outstanding(), 1);
        bridge.poll();
        progress.push(serial.written().len());
    }
    assert_eq!(progress, vec![4, 8, 10]);
    assert_eq!(hub.pool().outstanding(), 0, "released after the third step");
    assert_eq!(bridge.stats().completions, 1);

    assert_eq!(bridge.poll(), 0);
    drive(&svc);
    assert_eq!(bridge.stats().completions, 1);
    assert_eq!(serial.written(), b"ABCDEFGHIJ");
}

#[test]
fn exhausted_can_pool_suspends_parser_until_release() {
    let svc = service("pool");
    let text = Hub::new(&svc, "text", Pool::unbounded("text"));
    let can = Hub::new(&svc, "can", Pool::fixed("can", 2).expect("pool"));
    let _adapter = GcAdapter::new(&svc, &text, &can, false);
    let (tap, tap_rx) = recorder();
    can.register_port(&tap);

    let frames: Vec<CanFrame> = (1..=3u32)
        .map(|n| CanFrame::extended(n, &[n as u8; 3]).expect("frame"))
        .collect();
    let mut line = text.try_alloc().expect("text cell");
    for frame in &frames {
        line.get_mut().expect("unique").extend(render(frame, false));
    }
    text.send(line);
    drive(&svc);

    let mut held: Vec<_> = tap_rx.try_iter().collect();
    assert_eq!(held.len(), 2, "third allocation waits");
    assert_eq!(can.pool().waiting(), 1);

    let first = held.remove(0);
    assert_eq!(*first, frames[0]);
    drop(first);
    drive(&svc);

    let third = tap_rx.try_recv().expect("unblocked");
    assert_eq!(*third, frames[2]);
    assert_eq!(*held[0], frames[1], "held cell untouched");
}

#[test]
fn unregistered_port_receives_nothing_sent_afterwards() {
    let svc = service("unregister");
    let hub = Hub::new(&svc, "bytes", Pool::<Vec<u8>>::unbounded("bytes"));
    let (keep, keep_rx) = recorder();
    let (gone, gone_rx) = recorder();
    hub.register_port(&keep);
    hub.register_port(&gone);

    let send = |byte: u8| {
        let mut cell = hub.try_alloc().expect("cell");
        cell.get_mut().expect("unique").push(byte);
        hub.send(cell);
    };

    send(1);
    drive(&svc);
    assert!(hub.unregister_port(gone.id()));
    send(2);
    send(3);
    drive(&svc);

    let kept: Vec<u8> = keep_rx.try_iter().map(|b| b[0]).collect();
    let lost: Vec<u8> = gone_rx.try_iter().map(|b| b[0]).collect();
    assert_eq!(kept, vec![1, 2, 3]);
    assert_eq!(lost, vec![1]);
    assert_eq!(hub.metrics().delivered, 4);
}

#[test]
fn dropped_port_is_pruned_without_affecting_others() {
    let svc = service("isolation");
    let hub = Hub::new(&svc, "bytes", Pool::<Vec<u8>>::unbounded("bytes"));
    let (alive, alive_rx) = recorder();
    hub.register_port(&alive);
    {
        let (dropped, _) = recorder::<Vec<u8>>();
        hub.register_port(&dropped);
    }

    let mut cell = hub.try_alloc().expect("cell");
    cell.get_mut().expect("unique").push(9);
    hub.send(cell);
    drive(&svc);

    assert_eq!(alive_rx.try_recv().expect("delivered")[0], 9);
    assert_eq!(hub.port_count(), 1, "dead port pruned");
}
