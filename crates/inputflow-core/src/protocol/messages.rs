//! Messages exchanged between the dispatcher and a client over an input channel.
//!
//! The dispatcher publishes [`KeyEvent`]s and [`MotionEvent`]s; the client
//! answers each one with a finished signal carrying the same sequence number.

use serde::{Deserialize, Serialize};

use crate::domain::event::{Nanos, PointerCoords, PointerProperties};

// ── Protocol constants ────────────────────────────────────────────────────────

/// Current protocol version byte.
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Size of the frame header in bytes.
pub const HEADER_SIZE: usize = 12;

// ── Message type codes ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    Key = 0x01,
    Motion = 0x02,
    Finished = 0x03,
}

impl TryFrom<u8> for MessageType {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, ()> {
        match value {
            0x01 => Ok(MessageType::Key),
            0x02 => Ok(MessageType::Motion),
            0x03 => Ok(MessageType::Finished),
            _ => Err(()),
        }
    }
}

// ── Payloads ──────────────────────────────────────────────────────────────────

/// A key event as seen by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub device_id: i32,
    pub source: u32,
    pub action: i32,
    pub flags: i32,
    pub key_code: i32,
    pub scan_code: i32,
    pub meta_state: i32,
    pub repeat_count: i32,
    pub down_time: Nanos,
    pub event_time: Nanos,
}

/// A motion event as seen by the client.
///
/// Coordinates are already scaled for the target; `x_offset` / `y_offset` are
/// the target's translation, applied by the client when it reads raw positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionEvent {
    pub device_id: i32,
    pub source: u32,
    pub action: i32,
    pub flags: i32,
    pub edge_flags: i32,
    pub meta_state: i32,
    pub button_state: i32,
    pub x_offset: f32,
    pub y_offset: f32,
    pub x_precision: f32,
    pub y_precision: f32,
    pub down_time: Nanos,
    pub event_time: Nanos,
    pub pointer_properties: Vec<PointerProperties>,
    pub pointer_coords: Vec<PointerCoords>,
}

impl MotionEvent {
    pub fn pointer_count(&self) -> usize {
        self.pointer_properties.len()
    }

    /// X coordinate of pointer `index` in the target's coordinate space.
    pub fn x(&self, index: usize) -> Option<f32> {
        self.pointer_coords.get(index).map(|c| c.x + self.x_offset)
    }

    pub fn y(&self, index: usize) -> Option<f32> {
        self.pointer_coords.get(index).map(|c| c.y + self.y_offset)
    }
}

/// One frame on an input channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputMessage {
    Key { seq: u32, event: KeyEvent },
    Motion { seq: u32, event: MotionEvent },
    /// The client has finished with the event published under `seq`.
    Finished { seq: u32, handled: bool },
}

impl InputMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            InputMessage::Key { .. } => MessageType::Key,
            InputMessage::Motion { .. } => MessageType::Motion,
            InputMessage::Finished { .. } => MessageType::Finished,
        }
    }

    pub fn seq(&self) -> u32 {
        match self {
            InputMessage::Key { seq, .. }
            | InputMessage::Motion { seq, .. }
            | InputMessage::Finished { seq, .. } => *seq,
        }
    }
}
