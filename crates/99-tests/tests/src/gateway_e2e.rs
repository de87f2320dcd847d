//! Serial and CAN links joined through a `NativeStack`.

use std::time::{Duration, Instant};

use mock::{MockCan, MockSerial};
use runtime_native::{NativeStack, StackConfig};
use transport_codecs::{render, CanFrame, GcStreamParser};

use crate::support::recorder;

fn settle(stack: &mut NativeStack) {
    while stack.loop_once() > 0 {}
}

fn frames_in(text: &[u8]) -> Vec<CanFrame> {
    let mut parser = GcStreamParser::new();
    let mut frames = Vec::new();
    parser.feed(text, |frame, _| frames.push(frame.expect("well-formed")));
    frames
}

struct Gateway {
    stack: NativeStack,
    left: MockSerial,
    right: MockSerial,
    can: MockCan,
}

fn gateway(config: StackConfig) -> Gateway {
    let mut stack = NativeStack::new(config).expect("stack");
    let left = MockSerial::new();
    let right = MockSerial::with_write_room(5);
    let can = MockCan::with_tx_slots(64);
    stack.add_gridconnect_port("left", left.clone()).expect("left");
    stack.add_gridconnect_port("right", right.clone()).expect("right");
    stack.add_can_port("can0", can.clone());
    Gateway {
        stack,
        left,
        right,
        can,
    }
}

#[test]
fn serial_traffic_reaches_every_other_link() {
    let mut gw = gateway(StackConfig::default());
    let frame = CanFrame::extended(0x195B_4ABC, &[0xDE, 0xAD]).expect("frame");

    gw.left.push_inbound(&render(&frame, false));
    settle(&mut gw.stack);

    assert_eq!(frames_in(&gw.right.written()), vec![frame]);
    assert_eq!(gw.can.written(), vec![frame]);
    assert!(gw.left.written().is_empty(), "sender never hears itself");
}

#[test]
fn can_traffic_reaches_both_serial_links_in_order() {
    let mut gw = gateway(StackConfig::default());
    let frames: Vec<CanFrame> = (0..5u32)
        .map(|n| CanFrame::standard(0x100 + n, &[n as u8]).expect("frame"))
        .collect();
    for frame in &frames {
        gw.can.push_inbound(*frame);
    }
    settle(&mut gw.stack);

    assert_eq!(frames_in(&gw.left.written()), frames);
    assert_eq!(frames_in(&gw.right.written()), frames);
    assert!(gw.can.written().is_empty());
}

#[test]
fn fragmented_and_noisy_input_still_parses() {
    let mut gw = gateway(StackConfig::default());
    let good = CanFrame::remote(0x7A5, false).expect("frame");
    let mut stream = b"junk:XZZ;".to_vec();
    stream.extend(render(&good, false));
    gw.left.set_read_chunk(Some(3));
    gw.left.push_inbound(&stream);
    settle(&mut gw.stack);

    assert_eq!(gw.can.written(), vec![good], "malformed frame dropped at the boundary");
}

#[test]
fn doubled_output_is_written_to_serial_links() {
    let mut gw = gateway(StackConfig {
        double_bytes: true,
        ..StackConfig::default()
    });
    let frame = CanFrame::standard(0x123, &[]).expect("frame");
    gw.can.push_inbound(frame);
    settle(&mut gw.stack);

    assert_eq!(gw.left.written(), render(&frame, true));
    assert_eq!(gw.left.written(), b"::SS112233NN;;");
}

#[test]
fn removed_link_stops_receiving_while_others_continue() {
    let mut stack = NativeStack::new(StackConfig::default()).expect("stack");
    let left = MockSerial::new();
    let gone = MockSerial::new();
    let can = MockCan::new();
    stack.add_gridconnect_port("left", left.clone()).expect("left");
    let gone_id = stack.add_gridconnect_port("gone", gone.clone()).expect("gone");
    stack.add_can_port("can0", can.clone());

    assert!(stack.remove_port(gone_id));
    assert!(!gone.is_enabled());
    assert_eq!(gone.power_log().disables, 1);

    let frame = CanFrame::extended(1, &[1]).expect("frame");
    can.push_inbound(frame);
    settle(&mut stack);
    assert_eq!(frames_in(&left.written()), vec![frame]);
    assert!(gone.written().is_empty());
    assert_eq!(stack.port_count(), 2);
}

#[test]
fn higher_layer_port_on_can_hub_sees_all_traffic() {
    let mut gw = gateway(StackConfig::default());
    let (app, app_rx) = recorder();
    gw.stack.can_hub().register_port(&app);

    let from_serial = CanFrame::extended(0x10, &[1]).expect("frame");
    let from_can = CanFrame::extended(0x20, &[2]).expect("frame");
    gw.left.push_inbound(&render(&from_serial, false));
    gw.can.push_inbound(from_can);
    settle(&mut gw.stack);

    let mut seen: Vec<u32> = app_rx.try_iter().map(|b| b.id()).collect();
    seen.sort_unstable();
    assert_eq!(seen, vec![0x10, 0x20]);

    let mut injected = gw.stack.can_hub().try_alloc().expect("cell");
    *injected.get_mut().expect("unique") = CanFrame::extended(0x30, &[]).expect("frame");
    gw.stack.can_hub().send_from(app.id(), injected);
    settle(&mut gw.stack);
    assert!(app_rx.try_recv().is_err(), "no echo to the injecting layer");
    assert_eq!(frames_in(&gw.left.written()).last().map(CanFrame::id), Some(0x30));
    assert_eq!(gw.can.written().last().map(CanFrame::id), Some(0x30));
}

#[test]
fn executor_thread_mode_forwards_traffic() {
    let mut gw = gateway(StackConfig::default());
    gw.stack.start_executor_thread().expect("thread");
    let frame = CanFrame::standard(0x42, &[4, 2]).expect("frame");
    gw.left.push_inbound(&render(&frame, false));

    let deadline = Instant::now() + Duration::from_secs(5);
    while gw.can.written().is_empty() || frames_in(&gw.right.written()).is_empty() {
        assert!(Instant::now() < deadline, "traffic did not arrive");
        gw.stack.loop_once();
        std::thread::yield_now();
    }
    assert_eq!(gw.can.written(), vec![frame]);
    gw.stack.shutdown();
}
