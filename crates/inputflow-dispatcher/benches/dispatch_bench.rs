//! Criterion benchmarks for the dispatch engine.
//!
//! Each iteration admits events, runs the dispatch loop, lets the client
//! consume and acknowledge over a loopback channel and processes the finished
//! signals, which is the full round trip a real event makes.
//!
//! Run with:
//! ```bash
//! cargo bench --package inputflow-dispatcher --bench dispatch_bench
//! ```

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use inputflow_core::domain::codes::{key_action, motion_action, source, tool_type};
use inputflow_core::keymap::keycodes;
use inputflow_core::protocol::{open_channel_pair, InputConsumer};
use inputflow_core::{
    InputTarget, KeyFlags, MotionFlags, Nanos, NotifyKeyArgs, NotifyMotionArgs, PointerCoords,
    PointerProperties, PolicyFlags,
};
use inputflow_dispatcher::application::{
    DispatcherSettings, InputDispatcher, PassThroughPolicy, SystemTimeSource, TimeSource,
};
use inputflow_dispatcher::infrastructure::looper::Looper;

// ── Fixtures ──────────────────────────────────────────────────────────────────

fn dispatcher() -> InputDispatcher {
    let dispatcher = InputDispatcher::new(
        Arc::new(PassThroughPolicy),
        Arc::new(Looper::new()),
        DispatcherSettings::default(),
    );
    dispatcher.set_input_dispatch_mode(true, false);
    dispatcher
}

fn key_args(action: i32, now: Nanos) -> NotifyKeyArgs {
    NotifyKeyArgs {
        event_time: now,
        device_id: 1,
        source: source::KEYBOARD,
        policy_flags: PolicyFlags::default(),
        action,
        flags: KeyFlags::default(),
        key_code: keycodes::A,
        scan_code: 30,
        meta_state: 0,
        down_time: now,
    }
}

fn tap_args(action: i32, pointers: usize, now: Nanos) -> NotifyMotionArgs {
    NotifyMotionArgs {
        event_time: now,
        device_id: 2,
        source: source::TOUCHSCREEN,
        policy_flags: PolicyFlags::default(),
        action,
        flags: MotionFlags::default(),
        meta_state: 0,
        button_state: 0,
        edge_flags: 0,
        pointer_properties: (0..pointers as i32)
            .map(|id| PointerProperties {
                id,
                tool_type: tool_type::FINGER,
            })
            .collect(),
        pointer_coords: (0..pointers)
            .map(|i| PointerCoords::at(10.0 * i as f32, 20.0))
            .collect(),
        x_precision: 1.0,
        y_precision: 1.0,
        down_time: now,
    }
}

/// Lets every client acknowledge what it received, then hands the finished
/// signals back to the dispatcher.
fn settle(dispatcher: &InputDispatcher, clients: &mut [InputConsumer]) {
    for _ in 0..2 {
        dispatcher.run_dispatch_step();
        for client in clients.iter_mut() {
            for message in client.consume_all() {
                let _ = client.send_finished_signal(message.seq(), true);
            }
        }
        dispatcher.poll_channels(Some(Duration::ZERO));
    }
}

// ── Benchmarks ────────────────────────────────────────────────────────────────

fn bench_key_round_trip(c: &mut Criterion) {
    let dispatcher = dispatcher();
    let (server, client) = open_channel_pair("app", 64 * 1024);
    let Ok(id) = dispatcher.register_input_channel(Box::new(server), false) else {
        return;
    };
    dispatcher.set_focused_channel(Some(id));
    let mut clients = [client];
    let clock = SystemTimeSource::new();

    c.bench_function("key_down_up_round_trip", |b| {
        b.iter(|| {
            let now = clock.now();
            dispatcher.notify_key(black_box(&key_args(key_action::DOWN, now)));
            dispatcher.notify_key(black_box(&key_args(key_action::UP, now)));
            settle(&dispatcher, &mut clients);
        });
    });
}

fn bench_motion_fan_out(c: &mut Criterion) {
    let mut group = c.benchmark_group("tap_fan_out");
    let clock = SystemTimeSource::new();

    for monitors in [0usize, 1, 4] {
        let dispatcher = dispatcher();
        let (server, client) = open_channel_pair("app", 64 * 1024);
        let Ok(id) = dispatcher.register_input_channel(Box::new(server), false) else {
            continue;
        };
        let mut clients = vec![client];
        for i in 0..monitors {
            let (server, client) = open_channel_pair(&format!("monitor-{i}"), 64 * 1024);
            if dispatcher
                .register_input_channel(Box::new(server), true)
                .is_ok()
            {
                clients.push(client);
            }
        }
        let targets = [InputTarget::foreground(id)];

        group.bench_with_input(BenchmarkId::new("monitors", monitors), &monitors, |b, _| {
            b.iter(|| {
                let now = clock.now();
                dispatcher
                    .notify_motion(black_box(&tap_args(motion_action::DOWN, 1, now)), &targets);
                dispatcher.notify_motion(black_box(&tap_args(motion_action::UP, 1, now)), &targets);
                settle(&dispatcher, &mut clients);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_key_round_trip, bench_motion_fan_out);
criterion_main!(benches);
