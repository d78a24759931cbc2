//! Event records and the per-target dispatch entries built from them.
//!
//! # Ownership (for beginners)
//!
//! An [`EventEntry`] is owned by value while it sits in the dispatcher's inbound
//! queue.  When the dispatcher delivers it, the entry is frozen into an
//! [`EventRef`] (an `Arc<EventEntry>`) and every [`DispatchEntry`] created for a
//! target holds one clone of that handle.  The handle's strong count *is* the
//! reference count: creating a dispatch entry adds one, dropping it removes
//! one, and the record is freed exactly once when the last holder lets go.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::codes::{key_action, motion_action, source};
use super::flags::{KeyFlags, MotionFlags, PolicyFlags, TargetFlags};
use super::target::InputTarget;
use crate::protocol::sequence::next_dispatch_seq;

/// Monotonic time in nanoseconds.
pub type Nanos = i64;

/// Shared handle to a dispatched event record.
pub type EventRef = Arc<EventEntry>;

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

fn next_event_id() -> u64 {
    NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed)
}

// ── Admission arguments ───────────────────────────────────────────────────────

/// Arguments of a key occurrence as reported by the input source.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyKeyArgs {
    pub event_time: Nanos,
    pub device_id: i32,
    pub source: u32,
    pub policy_flags: PolicyFlags,
    pub action: i32,
    pub flags: KeyFlags,
    pub key_code: i32,
    pub scan_code: i32,
    pub meta_state: i32,
    pub down_time: Nanos,
}

/// Arguments of a pointer/touch occurrence as reported by the input source.
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyMotionArgs {
    pub event_time: Nanos,
    pub device_id: i32,
    pub source: u32,
    pub policy_flags: PolicyFlags,
    pub action: i32,
    pub flags: MotionFlags,
    pub meta_state: i32,
    pub button_state: i32,
    pub edge_flags: i32,
    pub pointer_properties: Vec<PointerProperties>,
    pub pointer_coords: Vec<PointerCoords>,
    pub x_precision: f32,
    pub y_precision: f32,
    pub down_time: Nanos,
}

/// A device was reset; everything in flight from it must be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyDeviceResetArgs {
    pub event_time: Nanos,
    pub device_id: i32,
}

// ── Pointer data ──────────────────────────────────────────────────────────────

/// Identity of one pointer within a motion event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerProperties {
    pub id: i32,
    pub tool_type: i32,
}

/// Axis values of one pointer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PointerCoords {
    pub x: f32,
    pub y: f32,
    pub pressure: f32,
    pub size: f32,
    pub touch_major: f32,
    pub touch_minor: f32,
    pub tool_major: f32,
    pub tool_minor: f32,
    pub orientation: f32,
}

impl PointerCoords {
    pub fn at(x: f32, y: f32) -> Self {
        Self {
            x,
            y,
            pressure: 1.0,
            ..Self::default()
        }
    }

    /// Scales every length-like axis by `factor`.
    pub fn scaled(&self, factor: f32) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            touch_major: self.touch_major * factor,
            touch_minor: self.touch_minor * factor,
            tool_major: self.tool_major * factor,
            tool_minor: self.tool_minor * factor,
            ..*self
        }
    }
}

// ── Event records ─────────────────────────────────────────────────────────────

/// Outcome of asking the policy about a key just before it is dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterceptKeyResult {
    /// The policy has not been asked yet.
    #[default]
    Unknown,
    Skip,
    Continue,
    /// Ask again once the wakeup time has passed.
    TryAgainLater,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceResetEntry {
    pub device_id: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyEntry {
    pub device_id: i32,
    pub source: u32,
    pub action: i32,
    pub flags: KeyFlags,
    pub key_code: i32,
    pub scan_code: i32,
    pub meta_state: i32,
    pub repeat_count: i32,
    pub down_time: Nanos,
    /// Generated by the dispatcher's own key-repeat timer.
    pub synthetic_repeat: bool,
    pub intercept_result: InterceptKeyResult,
    pub intercept_wakeup_time: Nanos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MotionEntry {
    pub device_id: i32,
    pub source: u32,
    pub action: i32,
    pub flags: MotionFlags,
    pub meta_state: i32,
    pub button_state: i32,
    pub edge_flags: i32,
    pub x_precision: f32,
    pub y_precision: f32,
    pub down_time: Nanos,
    pub pointer_properties: Vec<PointerProperties>,
    pub pointer_coords: Vec<PointerCoords>,
    /// Pre-resolved delivery targets supplied by the caller of `notify_motion`.
    pub targets: Vec<InputTarget>,
}

impl MotionEntry {
    pub fn pointer_count(&self) -> usize {
        self.pointer_properties.len()
    }

    pub fn is_pointer_event(&self) -> bool {
        source::is_pointer(self.source)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    DeviceReset(DeviceResetEntry),
    Key(KeyEntry),
    Motion(MotionEntry),
}

/// One input occurrence travelling through the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEntry {
    /// Process-wide unique identity, used to match deferred policy results.
    pub id: u64,
    pub event_time: Nanos,
    pub policy_flags: PolicyFlags,
    pub dispatch_in_progress: bool,
    pub kind: EventKind,
}

impl EventEntry {
    pub fn new(event_time: Nanos, policy_flags: PolicyFlags, kind: EventKind) -> Self {
        Self {
            id: next_event_id(),
            event_time,
            policy_flags,
            dispatch_in_progress: false,
            kind,
        }
    }

    pub fn key(&self) -> Option<&KeyEntry> {
        match &self.kind {
            EventKind::Key(key) => Some(key),
            _ => None,
        }
    }

    pub fn key_mut(&mut self) -> Option<&mut KeyEntry> {
        match &mut self.kind {
            EventKind::Key(key) => Some(key),
            _ => None,
        }
    }

    pub fn motion(&self) -> Option<&MotionEntry> {
        match &self.kind {
            EventKind::Motion(motion) => Some(motion),
            _ => None,
        }
    }

    pub fn device_id(&self) -> i32 {
        match &self.kind {
            EventKind::DeviceReset(reset) => reset.device_id,
            EventKind::Key(key) => key.device_id,
            EventKind::Motion(motion) => motion.device_id,
        }
    }

    /// `true` for motion events from a pointer-class source.
    pub fn is_pointer_event(&self) -> bool {
        self.motion().is_some_and(MotionEntry::is_pointer_event)
    }

    pub fn kind_label(&self) -> &'static str {
        match self.kind {
            EventKind::DeviceReset(_) => "DeviceReset",
            EventKind::Key(_) => "Key",
            EventKind::Motion(_) => "Motion",
        }
    }
}

impl fmt::Display for EventEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            EventKind::DeviceReset(reset) => {
                write!(f, "DeviceResetEvent(deviceId={})", reset.device_id)
            }
            EventKind::Key(key) => write!(
                f,
                "KeyEvent(deviceId={}, source=0x{:08x}, action={}, flags={}, keyCode={}, \
                 scanCode={}, metaState=0x{:08x}, repeatCount={}), policyFlags={}",
                key.device_id,
                key.source,
                key_action::label(key.action),
                key.flags,
                key.key_code,
                key.scan_code,
                key.meta_state,
                key.repeat_count,
                self.policy_flags,
            ),
            EventKind::Motion(motion) => {
                write!(
                    f,
                    "MotionEvent(deviceId={}, source=0x{:08x}, action={}, flags={}, \
                     metaState=0x{:08x}, buttonState=0x{:08x}, pointers=[",
                    motion.device_id,
                    motion.source,
                    motion_action::label(motion.action),
                    motion.flags,
                    motion.meta_state,
                    motion.button_state,
                )?;
                for (i, (props, coords)) in motion
                    .pointer_properties
                    .iter()
                    .zip(&motion.pointer_coords)
                    .enumerate()
                {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: ({:.1}, {:.1})", props.id, coords.x, coords.y)?;
                }
                write!(f, "]), policyFlags={}", self.policy_flags)
            }
        }
    }
}

// ── Dispatch entries ──────────────────────────────────────────────────────────

/// One event bound to one connection, with its resolved action and flags.
#[derive(Debug)]
pub struct DispatchEntry {
    /// Unique, never zero.  The client echoes it back in its finished signal.
    pub seq: u32,
    pub event: EventRef,
    pub target_flags: TargetFlags,
    pub x_offset: f32,
    pub y_offset: f32,
    pub scale_factor: f32,
    /// Time the entry was last handed to the channel.
    pub delivery_time: Nanos,
    pub resolved_action: i32,
    pub resolved_flags: i32,
}

impl DispatchEntry {
    /// Binds `event` to a target.  Takes ownership of one reference.
    pub fn new(event: EventRef, target_flags: TargetFlags, target: &InputTarget) -> Self {
        Self {
            seq: next_dispatch_seq(),
            event,
            target_flags,
            x_offset: target.x_offset,
            y_offset: target.y_offset,
            scale_factor: target.scale_factor,
            delivery_time: 0,
            resolved_action: 0,
            resolved_flags: 0,
        }
    }

    pub fn has_foreground_target(&self) -> bool {
        self.target_flags.contains(TargetFlags::FOREGROUND)
    }
}
