//! Bit-flag newtypes carried by event records and dispatch entries.
//!
//! Each type wraps a raw integer and exposes the individual bits as associated
//! constants, so a flag set can travel over the wire unchanged while call
//! sites still read as `flags.contains(KeyFlags::CANCELED)`.

use serde::{Deserialize, Serialize};

macro_rules! flag_ops {
    ($name:ident, $repr:ty) => {
        impl $name {
            /// Returns `true` if every bit in `bits` is set.
            pub fn contains(self, bits: $repr) -> bool {
                self.0 & bits == bits
            }

            /// Returns `true` if any bit in `bits` is set.
            pub fn intersects(self, bits: $repr) -> bool {
                self.0 & bits != 0
            }

            pub fn insert(&mut self, bits: $repr) {
                self.0 |= bits;
            }

            pub fn remove(&mut self, bits: $repr) {
                self.0 &= !bits;
            }

            /// Returns a copy with `bits` set.
            pub fn with(self, bits: $repr) -> Self {
                Self(self.0 | bits)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "0x{:08x}", self.0)
            }
        }
    };
}

/// Flags attached by the input source and the external policy to every event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyFlags(pub u32);

impl PolicyFlags {
    pub const WAKE: u32 = 0x0000_0001;
    pub const WAKE_DROPPED: u32 = 0x0000_0002;
    pub const SHIFT: u32 = 0x0000_0004;
    pub const CAPS_LOCK: u32 = 0x0000_0008;
    pub const ALT: u32 = 0x0000_0010;
    pub const ALT_GR: u32 = 0x0000_0020;
    pub const MENU: u32 = 0x0000_0040;
    pub const LAUNCHER: u32 = 0x0000_0080;
    pub const VIRTUAL: u32 = 0x0000_0100;
    pub const FUNCTION: u32 = 0x0000_0200;

    /// Bits that come straight from the device; everything above is set by
    /// the dispatcher or the policy.
    pub const RAW_MASK: u32 = 0x0000_ffff;

    pub const INJECTED: u32 = 0x0100_0000;
    pub const TRUSTED: u32 = 0x0200_0000;
    pub const FILTERED: u32 = 0x0400_0000;
    pub const DISABLE_KEY_REPEAT: u32 = 0x0800_0000;
    pub const PASS_TO_USER: u32 = 0x4000_0000;
}

flag_ops!(PolicyFlags, u32);

/// Per-event key flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyFlags(pub i32);

impl KeyFlags {
    pub const WOKE_HERE: i32 = 0x1;
    pub const SOFT_KEYBOARD: i32 = 0x2;
    pub const KEEP_TOUCH_MODE: i32 = 0x4;
    pub const FROM_SYSTEM: i32 = 0x8;
    pub const EDITOR_ACTION: i32 = 0x10;
    pub const CANCELED: i32 = 0x20;
    pub const VIRTUAL_HARD_KEY: i32 = 0x40;
    pub const LONG_PRESS: i32 = 0x80;
    pub const CANCELED_LONG_PRESS: i32 = 0x100;
    pub const TRACKING: i32 = 0x200;
    pub const FALLBACK: i32 = 0x400;
}

flag_ops!(KeyFlags, i32);

/// Per-event motion flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MotionFlags(pub i32);

impl MotionFlags {
    pub const WINDOW_IS_OBSCURED: i32 = 0x1;
}

flag_ops!(MotionFlags, i32);

/// Flags describing how an event reaches one particular target.
///
/// The `DISPATCH_AS_*` bits select *dispatch modes*: one target may ask for the
/// same motion event to be delivered several times with different resolved
/// actions (for example a hover exit followed by the event itself).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetFlags(pub u32);

impl TargetFlags {
    /// The target is the foreground receiver and acknowledges the event.
    pub const FOREGROUND: u32 = 1 << 0;
    pub const WINDOW_IS_OBSCURED: u32 = 1 << 1;
    /// Only the pointers in the target's pointer-id set are delivered.
    pub const SPLIT: u32 = 1 << 2;
    /// Pointer coordinates are replaced with zeroes before publishing.
    pub const ZERO_COORDS: u32 = 1 << 3;

    pub const DISPATCH_AS_IS: u32 = 1 << 8;
    pub const DISPATCH_AS_OUTSIDE: u32 = 1 << 9;
    pub const DISPATCH_AS_HOVER_ENTER: u32 = 1 << 10;
    pub const DISPATCH_AS_HOVER_EXIT: u32 = 1 << 11;

    pub const DISPATCH_MASK: u32 = Self::DISPATCH_AS_IS
        | Self::DISPATCH_AS_OUTSIDE
        | Self::DISPATCH_AS_HOVER_ENTER
        | Self::DISPATCH_AS_HOVER_EXIT;

    /// Dispatch modes in the order they are enqueued for one target.
    pub const DISPATCH_ORDER: [u32; 4] = [
        Self::DISPATCH_AS_HOVER_EXIT,
        Self::DISPATCH_AS_OUTSIDE,
        Self::DISPATCH_AS_HOVER_ENTER,
        Self::DISPATCH_AS_IS,
    ];
}

flag_ops!(TargetFlags, u32);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_requires_every_bit() {
        let flags = PolicyFlags(PolicyFlags::TRUSTED | PolicyFlags::PASS_TO_USER);

        assert!(flags.contains(PolicyFlags::TRUSTED));
        assert!(flags.contains(PolicyFlags::TRUSTED | PolicyFlags::PASS_TO_USER));
        assert!(!flags.contains(PolicyFlags::TRUSTED | PolicyFlags::VIRTUAL));
        assert!(flags.intersects(PolicyFlags::TRUSTED | PolicyFlags::VIRTUAL));
    }

    #[test]
    fn test_insert_and_remove() {
        let mut flags = KeyFlags::default();
        flags.insert(KeyFlags::CANCELED | KeyFlags::FALLBACK);
        flags.remove(KeyFlags::CANCELED);

        assert_eq!(flags, KeyFlags(KeyFlags::FALLBACK));
    }

    #[test]
    fn test_dispatch_mask_covers_dispatch_order() {
        let combined = TargetFlags::DISPATCH_ORDER
            .iter()
            .fold(0, |acc, mode| acc | mode);
        assert_eq!(combined, TargetFlags::DISPATCH_MASK);
    }
}
