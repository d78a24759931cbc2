//! Numeric codes shared by the admission path, the dispatcher and the wire format.
//!
//! Input sources report actions, sources and meta state as raw integers.  The
//! dispatcher keeps them raw (so that admission can reject unrecognised values
//! instead of failing to construct an enum) and names them here.
//!
//! # Motion action layout (for beginners)
//!
//! A motion action packs two things into one `i32`:
//!
//! ```text
//!  bits 15..8          bits 7..0
//! [pointer index]     [action code]
//! ```
//!
//! The pointer index is only meaningful for `POINTER_DOWN` / `POINTER_UP`,
//! where it says *which* pointer of a multi-touch gesture went down or up.

/// Key action codes.
pub mod key_action {
    pub const DOWN: i32 = 0;
    pub const UP: i32 = 1;
    pub const MULTIPLE: i32 = 2;

    /// Returns `true` if `action` is a recognised key action.
    pub fn is_valid(action: i32) -> bool {
        matches!(action, DOWN | UP | MULTIPLE)
    }

    /// Short label used in logs and dumps.
    pub fn label(action: i32) -> &'static str {
        match action {
            DOWN => "DOWN",
            UP => "UP",
            MULTIPLE => "MULTIPLE",
            _ => "?",
        }
    }
}

/// Motion action codes and helpers for the packed pointer index.
pub mod motion_action {
    pub const MASK: i32 = 0xff;
    pub const POINTER_INDEX_MASK: i32 = 0xff00;
    pub const POINTER_INDEX_SHIFT: i32 = 8;

    pub const DOWN: i32 = 0;
    pub const UP: i32 = 1;
    pub const MOVE: i32 = 2;
    pub const CANCEL: i32 = 3;
    pub const OUTSIDE: i32 = 4;
    pub const POINTER_DOWN: i32 = 5;
    pub const POINTER_UP: i32 = 6;
    pub const HOVER_MOVE: i32 = 7;
    pub const SCROLL: i32 = 8;
    pub const HOVER_ENTER: i32 = 9;
    pub const HOVER_EXIT: i32 = 10;

    /// Extracts the action code without the pointer index.
    pub fn masked(action: i32) -> i32 {
        action & MASK
    }

    /// Extracts the pointer index of a `POINTER_DOWN` / `POINTER_UP` action.
    pub fn pointer_index(action: i32) -> usize {
        ((action & POINTER_INDEX_MASK) >> POINTER_INDEX_SHIFT) as usize
    }

    /// Packs an action code together with a pointer index.
    pub fn with_pointer_index(action: i32, index: usize) -> i32 {
        (action & MASK) | ((index as i32) << POINTER_INDEX_SHIFT)
    }

    /// Short label used in logs and dumps.
    pub fn label(action: i32) -> &'static str {
        match masked(action) {
            DOWN => "DOWN",
            UP => "UP",
            MOVE => "MOVE",
            CANCEL => "CANCEL",
            OUTSIDE => "OUTSIDE",
            POINTER_DOWN => "POINTER_DOWN",
            POINTER_UP => "POINTER_UP",
            HOVER_MOVE => "HOVER_MOVE",
            SCROLL => "SCROLL",
            HOVER_ENTER => "HOVER_ENTER",
            HOVER_EXIT => "HOVER_EXIT",
            _ => "?",
        }
    }
}

/// Input source identifiers.  The low byte is the source *class*.
pub mod source {
    pub const CLASS_MASK: u32 = 0x0000_00ff;
    pub const CLASS_BUTTON: u32 = 0x0000_0001;
    pub const CLASS_POINTER: u32 = 0x0000_0002;
    pub const CLASS_NAVIGATION: u32 = 0x0000_0004;
    pub const CLASS_POSITION: u32 = 0x0000_0008;
    pub const CLASS_JOYSTICK: u32 = 0x0000_0010;

    pub const UNKNOWN: u32 = 0x0000_0000;
    pub const KEYBOARD: u32 = 0x0000_0100 | CLASS_BUTTON;
    pub const DPAD: u32 = 0x0000_0200 | CLASS_BUTTON;
    pub const GAMEPAD: u32 = 0x0000_0400 | CLASS_BUTTON;
    pub const TOUCHSCREEN: u32 = 0x0000_1000 | CLASS_POINTER;
    pub const MOUSE: u32 = 0x0000_2000 | CLASS_POINTER;
    pub const STYLUS: u32 = 0x0000_4000 | CLASS_POINTER;
    pub const TRACKBALL: u32 = 0x0001_0000 | CLASS_NAVIGATION;
    pub const TOUCHPAD: u32 = 0x0010_0000 | CLASS_POSITION;
    pub const JOYSTICK: u32 = 0x0100_0000 | CLASS_JOYSTICK;

    /// Returns `true` if the source belongs to the pointer class.
    pub fn is_pointer(source: u32) -> bool {
        source & CLASS_POINTER != 0
    }
}

/// Modifier meta-state bits.
pub mod meta {
    pub const NONE: i32 = 0;
    pub const SHIFT_ON: i32 = 0x01;
    pub const ALT_ON: i32 = 0x02;
    pub const SYM_ON: i32 = 0x04;
    pub const FUNCTION_ON: i32 = 0x08;
    pub const ALT_LEFT_ON: i32 = 0x10;
    pub const ALT_RIGHT_ON: i32 = 0x20;
    pub const SHIFT_LEFT_ON: i32 = 0x40;
    pub const SHIFT_RIGHT_ON: i32 = 0x80;
    pub const CTRL_ON: i32 = 0x1000;
    pub const CTRL_LEFT_ON: i32 = 0x2000;
    pub const CTRL_RIGHT_ON: i32 = 0x4000;
    pub const META_ON: i32 = 0x10000;
    pub const META_LEFT_ON: i32 = 0x20000;
    pub const META_RIGHT_ON: i32 = 0x40000;
    pub const CAPS_LOCK_ON: i32 = 0x100000;
    pub const NUM_LOCK_ON: i32 = 0x200000;
    pub const SCROLL_LOCK_ON: i32 = 0x400000;
}

/// Pointer tool types.
pub mod tool_type {
    pub const UNKNOWN: i32 = 0;
    pub const FINGER: i32 = 1;
    pub const STYLUS: i32 = 2;
    pub const MOUSE: i32 = 3;
    pub const ERASER: i32 = 4;
}

/// Maximum number of pointers a single motion event may carry.
pub const MAX_POINTERS: usize = 16;

/// Largest valid pointer id.  Ids index a 32-bit set, so they lie in `0..=31`.
pub const MAX_POINTER_ID: i32 = 31;
