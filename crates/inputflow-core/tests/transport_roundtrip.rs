//! Integration tests for the loopback transport.
//!
//! These tests drive both ends of a channel pair through the public API,
//! exercising the codec, message types, sequence numbers and readiness
//! signalling together.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use inputflow_core::{
    domain::codes::{motion_action, source, tool_type},
    protocol::{
        next_dispatch_seq, open_channel_pair, InputMessage, KeyEvent, MotionEvent,
        DEFAULT_CHANNEL_CAPACITY,
    },
    ChannelId, FinishedSignal, InputChannel, PointerCoords, PointerProperties, Readiness,
    ReadinessSink, ReceiveError,
};

#[derive(Default)]
struct CountingSink {
    signals: Mutex<Vec<(ChannelId, Readiness)>>,
}

impl ReadinessSink for CountingSink {
    fn signal(&self, channel_id: ChannelId, readiness: Readiness) {
        self.signals
            .lock()
            .expect("sink lock")
            .push((channel_id, readiness));
    }
}

fn touch(action: i32, x: f32, y: f32) -> MotionEvent {
    MotionEvent {
        device_id: 4,
        source: source::TOUCHSCREEN,
        action,
        flags: 0,
        edge_flags: 0,
        meta_state: 0,
        button_state: 0,
        x_offset: -100.0,
        y_offset: -50.0,
        x_precision: 1.0,
        y_precision: 1.0,
        down_time: 1_000,
        event_time: 1_000,
        pointer_properties: vec![PointerProperties {
            id: 0,
            tool_type: tool_type::FINGER,
        }],
        pointer_coords: vec![PointerCoords::at(x, y)],
    }
}

#[test]
fn test_motion_stroke_preserves_order_and_offsets() {
    // Arrange
    let (mut server, mut client) = open_channel_pair("window", DEFAULT_CHANNEL_CAPACITY);
    let strokes = [
        (motion_action::DOWN, 120.0, 60.0),
        (motion_action::MOVE, 130.0, 70.0),
        (motion_action::UP, 130.0, 70.0),
    ];

    // Act
    let mut seqs = Vec::new();
    for (action, x, y) in strokes {
        let seq = next_dispatch_seq();
        server
            .publish_motion_event(seq, &touch(action, x, y))
            .expect("publish");
        seqs.push(seq);
    }
    let received = client.consume_all();

    // Assert
    assert_eq!(received.len(), 3);
    for ((msg, seq), (action, _, _)) in received.iter().zip(&seqs).zip(strokes) {
        match msg {
            InputMessage::Motion { seq: got, event } => {
                assert_eq!(got, seq);
                assert_eq!(event.action, action);
            }
            other => panic!("unexpected message {other:?}"),
        }
    }
    if let InputMessage::Motion { event, .. } = &received[0] {
        assert_eq!(event.x(0), Some(20.0));
        assert_eq!(event.y(0), Some(10.0));
    }
}

#[test]
fn test_finished_signals_flow_back_in_order() {
    let (mut server, mut client) = open_channel_pair("window", DEFAULT_CHANNEL_CAPACITY);
    let sink = Arc::new(CountingSink::default());
    server.set_readiness_sink(sink.clone());

    client.send_finished_signal(5, true).expect("send");
    client.send_finished_signal(6, false).expect("send");

    assert_eq!(
        server.receive_finished_signal(),
        Ok(FinishedSignal {
            seq: 5,
            handled: true
        })
    );
    assert_eq!(
        server.receive_finished_signal(),
        Ok(FinishedSignal {
            seq: 6,
            handled: false
        })
    );
    assert_eq!(server.receive_finished_signal(), Err(ReceiveError::WouldBlock));
    assert_eq!(sink.signals.lock().expect("sink lock").len(), 2);
}

#[test]
fn test_consumer_wait_wakes_on_publish_from_other_thread() {
    let (mut server, client) = open_channel_pair("window", DEFAULT_CHANNEL_CAPACITY);

    let publisher = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        let key = KeyEvent {
            device_id: 1,
            source: source::KEYBOARD,
            action: 0,
            flags: 0,
            key_code: 29,
            scan_code: 30,
            meta_state: 0,
            repeat_count: 0,
            down_time: 0,
            event_time: 0,
        };
        server.publish_key_event(next_dispatch_seq(), &key).expect("publish");
        server
    });

    assert!(client.wait(Duration::from_secs(5)));
    assert_eq!(client.pending(), 1);
    drop(publisher.join().expect("publisher thread"));
}

#[test]
fn test_sink_registered_after_hangup_still_sees_it() {
    let (mut server, client) = open_channel_pair("window", DEFAULT_CHANNEL_CAPACITY);
    drop(client);

    let sink = Arc::new(CountingSink::default());
    server.set_readiness_sink(sink.clone());

    let signals = sink.signals.lock().expect("sink lock");
    assert_eq!(signals.len(), 1);
    assert!(signals[0].1.contains(Readiness::HANGUP));
}
