//! Shared fixtures for the dispatcher's unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use inputflow_core::domain::codes::{source, tool_type};
use inputflow_core::{
    ChannelId, EventEntry, EventKind, FinishedSignal, InputChannel, KeyEvent, KeyFlags,
    MotionEntry, MotionEvent, MotionFlags, Nanos, NotifyKeyArgs, NotifyMotionArgs, PointerCoords,
    PointerProperties, PolicyFlags, PublishError, Readiness, ReadinessSink, ReceiveError,
};

use super::{DispatcherSettings, InputDispatcher};
use crate::application::policy::DispatcherPolicy;
use crate::application::poller::ReadinessPoller;
use crate::application::time::{ManualTimeSource, TimeSource};

/// Clock value every test dispatcher starts at.
pub const START_TIME: Nanos = 1_000_000_000;

/// A poller that never blocks and never reports anything.  Tests deliver
/// readiness by calling `handle_receive_callback` directly.
#[derive(Debug, Default)]
pub struct NullPoller;

impl ReadinessSink for NullPoller {
    fn signal(&self, _channel_id: ChannelId, _readiness: Readiness) {}
}

impl ReadinessPoller for NullPoller {
    fn wake(&self) {}

    fn add_channel(&self, _channel_id: ChannelId) {}

    fn remove_channel(&self, _channel_id: ChannelId) {}

    fn poll_once(&self, _timeout: Option<Duration>) -> Vec<(ChannelId, Readiness)> {
        Vec::new()
    }

    fn as_sink(self: Arc<Self>) -> Arc<dyn ReadinessSink> {
        self
    }
}

pub fn enabled_dispatcher(
    policy: Arc<dyn DispatcherPolicy>,
    settings: DispatcherSettings,
) -> InputDispatcher {
    enabled_dispatcher_with_clock(policy, settings).0
}

/// An enabled dispatcher on a manual clock starting at [`START_TIME`].
pub fn enabled_dispatcher_with_clock(
    policy: Arc<dyn DispatcherPolicy>,
    settings: DispatcherSettings,
) -> (InputDispatcher, Arc<ManualTimeSource>) {
    let clock = Arc::new(ManualTimeSource::new(START_TIME));
    let dispatcher = InputDispatcher::new(policy, Arc::new(NullPoller), settings)
        .with_time_source(Arc::clone(&clock) as Arc<dyn TimeSource>);
    dispatcher.set_input_dispatch_mode(true, false);
    (dispatcher, clock)
}

pub fn key_args(action: i32, key_code: i32, event_time: Nanos) -> NotifyKeyArgs {
    NotifyKeyArgs {
        event_time,
        device_id: 1,
        source: source::KEYBOARD,
        policy_flags: PolicyFlags::default(),
        action,
        flags: KeyFlags::default(),
        key_code,
        scan_code: 30,
        meta_state: 0,
        down_time: event_time,
    }
}

fn pointers(count: usize) -> (Vec<PointerProperties>, Vec<PointerCoords>) {
    (0..count)
        .map(|i| {
            let offset = 10.0 * i as f32;
            (
                PointerProperties {
                    id: i as i32,
                    tool_type: tool_type::FINGER,
                },
                PointerCoords::at(100.0 + offset, 200.0 + offset),
            )
        })
        .unzip()
}

/// A single-finger touchscreen occurrence.
pub fn touch_args(action: i32, event_time: Nanos) -> NotifyMotionArgs {
    let (pointer_properties, pointer_coords) = pointers(1);
    NotifyMotionArgs {
        event_time,
        device_id: 2,
        source: source::TOUCHSCREEN,
        policy_flags: PolicyFlags::default(),
        action,
        flags: MotionFlags::default(),
        meta_state: 0,
        button_state: 0,
        edge_flags: 0,
        pointer_properties,
        pointer_coords,
        x_precision: 1.0,
        y_precision: 1.0,
        down_time: event_time,
    }
}

/// A touchscreen entry with `pointer_count` pointers, ids `0..pointer_count`.
pub fn motion_entry(action: i32, event_time: Nanos, pointer_count: usize) -> EventEntry {
    let (pointer_properties, pointer_coords) = pointers(pointer_count);
    EventEntry::new(
        event_time,
        PolicyFlags(PolicyFlags::TRUSTED | PolicyFlags::PASS_TO_USER),
        EventKind::Motion(MotionEntry {
            device_id: 2,
            source: source::TOUCHSCREEN,
            action,
            flags: MotionFlags::default(),
            meta_state: 0,
            button_state: 0,
            edge_flags: 0,
            x_precision: 1.0,
            y_precision: 1.0,
            down_time: event_time,
            pointer_properties,
            pointer_coords,
            targets: Vec::new(),
        }),
    )
}

// ── Scripted channel ──────────────────────────────────────────────────────────

/// What a [`ScriptedChannel`] answers to its next publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedPublish {
    Accept,
    WouldBlock,
    DeadObject,
}

static NEXT_SCRIPTED_ID: AtomicI32 = AtomicI32::new(100_000);

/// A channel whose publish results follow a script.  Once the script runs
/// out every publish is accepted.  It never has a finished signal to read.
#[derive(Debug)]
pub struct ScriptedChannel {
    id: ChannelId,
    name: String,
    script: VecDeque<ScriptedPublish>,
}

impl ScriptedChannel {
    pub fn new(name: &str, script: Vec<ScriptedPublish>) -> Self {
        Self {
            id: ChannelId(NEXT_SCRIPTED_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.to_owned(),
            script: script.into(),
        }
    }

    fn next(&mut self) -> Result<(), PublishError> {
        match self.script.pop_front().unwrap_or(ScriptedPublish::Accept) {
            ScriptedPublish::Accept => Ok(()),
            ScriptedPublish::WouldBlock => Err(PublishError::WouldBlock),
            ScriptedPublish::DeadObject => Err(PublishError::DeadObject),
        }
    }
}

impl InputChannel for ScriptedChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn publish_key_event(&mut self, _seq: u32, _event: &KeyEvent) -> Result<(), PublishError> {
        self.next()
    }

    fn publish_motion_event(&mut self, _seq: u32, _event: &MotionEvent) -> Result<(), PublishError> {
        self.next()
    }

    fn receive_finished_signal(&mut self) -> Result<FinishedSignal, ReceiveError> {
        Err(ReceiveError::WouldBlock)
    }
}
