//! Delivery targets: which channel an event goes to, and how.

use serde::{Deserialize, Serialize};

use super::flags::TargetFlags;

/// Stable identity of a registered channel, usable as a map key.
///
/// Plays the role of a file descriptor: it is unique among live channels and
/// is what the readiness poller reports when a channel has data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub i32);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A pre-resolved delivery target.
///
/// Window placement and focus policy live outside the dispatcher; callers hand
/// it fully resolved targets (channel, coordinate transform, flags).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputTarget {
    pub channel_id: ChannelId,
    pub flags: TargetFlags,
    /// Added to pointer X coordinates before scaling is undone by the client.
    pub x_offset: f32,
    pub y_offset: f32,
    pub scale_factor: f32,
    /// Pointer ids delivered to this target when [`TargetFlags::SPLIT`] is set.
    pub pointer_ids: u32,
}

impl InputTarget {
    /// A foreground target receiving the event unchanged.
    pub fn foreground(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            flags: TargetFlags(TargetFlags::FOREGROUND | TargetFlags::DISPATCH_AS_IS),
            x_offset: 0.0,
            y_offset: 0.0,
            scale_factor: 1.0,
            pointer_ids: 0,
        }
    }

    /// A passive monitoring target: no foreground status, event delivered as-is.
    pub fn monitor(channel_id: ChannelId) -> Self {
        Self {
            flags: TargetFlags(TargetFlags::DISPATCH_AS_IS),
            ..Self::foreground(channel_id)
        }
    }

    pub fn with_offset(mut self, x_offset: f32, y_offset: f32) -> Self {
        self.x_offset = x_offset;
        self.y_offset = y_offset;
        self
    }

    pub fn with_scale(mut self, scale_factor: f32) -> Self {
        self.scale_factor = scale_factor;
        self
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags.insert(flags);
        self
    }

    /// Restricts the target to the pointers whose ids are set in `pointer_ids`.
    pub fn split(mut self, pointer_ids: u32) -> Self {
        self.flags.insert(TargetFlags::SPLIT);
        self.pointer_ids = pointer_ids;
        self
    }

    pub fn is_foreground(&self) -> bool {
        self.flags.contains(TargetFlags::FOREGROUND)
    }
}
