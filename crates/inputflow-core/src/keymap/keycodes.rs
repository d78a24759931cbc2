//! Key codes and their symbolic labels.
//!
//! Key codes identify the *meaning* of a key (HOME, BACK, the letter A) as
//! opposed to the scan code, which identifies the physical switch.  The
//! dispatcher only gives special treatment to a handful of them; the rest are
//! carried through opaquely and labelled here for logs, dumps and the demo CLI.

pub const UNKNOWN: i32 = 0;
pub const SOFT_LEFT: i32 = 1;
pub const SOFT_RIGHT: i32 = 2;
pub const HOME: i32 = 3;
pub const BACK: i32 = 4;
pub const CALL: i32 = 5;
pub const ENDCALL: i32 = 6;
pub const DPAD_UP: i32 = 19;
pub const DPAD_DOWN: i32 = 20;
pub const DPAD_LEFT: i32 = 21;
pub const DPAD_RIGHT: i32 = 22;
pub const DPAD_CENTER: i32 = 23;
pub const VOLUME_UP: i32 = 24;
pub const VOLUME_DOWN: i32 = 25;
pub const POWER: i32 = 26;
pub const A: i32 = 29;
pub const Z: i32 = 54;
pub const ALT_LEFT: i32 = 57;
pub const SHIFT_LEFT: i32 = 59;
pub const TAB: i32 = 61;
pub const SPACE: i32 = 62;
pub const ENTER: i32 = 66;
pub const DEL: i32 = 67;
pub const MENU: i32 = 82;
pub const SEARCH: i32 = 84;
pub const ESCAPE: i32 = 111;
pub const CTRL_LEFT: i32 = 113;
pub const CAPS_LOCK: i32 = 115;
pub const APP_SWITCH: i32 = 187;

/// Labels for key codes `0..=115`, indexed by key code.
const CONTIGUOUS_LABELS: [&str; 116] = [
    "UNKNOWN",
    "SOFT_LEFT",
    "SOFT_RIGHT",
    "HOME",
    "BACK",
    "CALL",
    "ENDCALL",
    "0",
    "1",
    "2",
    "3",
    "4",
    "5",
    "6",
    "7",
    "8",
    "9",
    "STAR",
    "POUND",
    "DPAD_UP",
    "DPAD_DOWN",
    "DPAD_LEFT",
    "DPAD_RIGHT",
    "DPAD_CENTER",
    "VOLUME_UP",
    "VOLUME_DOWN",
    "POWER",
    "CAMERA",
    "CLEAR",
    "A",
    "B",
    "C",
    "D",
    "E",
    "F",
    "G",
    "H",
    "I",
    "J",
    "K",
    "L",
    "M",
    "N",
    "O",
    "P",
    "Q",
    "R",
    "S",
    "T",
    "U",
    "V",
    "W",
    "X",
    "Y",
    "Z",
    "COMMA",
    "PERIOD",
    "ALT_LEFT",
    "ALT_RIGHT",
    "SHIFT_LEFT",
    "SHIFT_RIGHT",
    "TAB",
    "SPACE",
    "SYM",
    "EXPLORER",
    "ENVELOPE",
    "ENTER",
    "DEL",
    "GRAVE",
    "MINUS",
    "EQUALS",
    "LEFT_BRACKET",
    "RIGHT_BRACKET",
    "BACKSLASH",
    "SEMICOLON",
    "APOSTROPHE",
    "SLASH",
    "AT",
    "NUM",
    "HEADSETHOOK",
    "FOCUS",
    "PLUS",
    "MENU",
    "NOTIFICATION",
    "SEARCH",
    "MEDIA_PLAY_PAUSE",
    "MEDIA_STOP",
    "MEDIA_NEXT",
    "MEDIA_PREVIOUS",
    "MEDIA_REWIND",
    "MEDIA_FAST_FORWARD",
    "MUTE",
    "PAGE_UP",
    "PAGE_DOWN",
    "PICTSYMBOLS",
    "SWITCH_CHARSET",
    "BUTTON_A",
    "BUTTON_B",
    "BUTTON_C",
    "BUTTON_X",
    "BUTTON_Y",
    "BUTTON_Z",
    "BUTTON_L1",
    "BUTTON_R1",
    "BUTTON_L2",
    "BUTTON_R2",
    "BUTTON_THUMBL",
    "BUTTON_THUMBR",
    "BUTTON_START",
    "BUTTON_SELECT",
    "BUTTON_MODE",
    "ESCAPE",
    "FORWARD_DEL",
    "CTRL_LEFT",
    "CTRL_RIGHT",
    "CAPS_LOCK",
];

/// Returns the symbolic label of `key_code`, or `None` if it has none.
pub fn keycode_label(key_code: i32) -> Option<&'static str> {
    if key_code == APP_SWITCH {
        return Some("APP_SWITCH");
    }
    usize::try_from(key_code)
        .ok()
        .and_then(|index| CONTIGUOUS_LABELS.get(index))
        .copied()
}

/// Looks up a key code by label.  Matching is case-insensitive.
pub fn keycode_from_label(label: &str) -> Option<i32> {
    if label.eq_ignore_ascii_case("APP_SWITCH") {
        return Some(APP_SWITCH);
    }
    CONTIGUOUS_LABELS
        .iter()
        .position(|candidate| candidate.eq_ignore_ascii_case(label))
        .map(|index| index as i32)
}

/// Keys that make the dispatcher abandon queued input in favour of the switch.
pub fn is_app_switch_key_code(key_code: i32) -> bool {
    matches!(key_code, HOME | ENDCALL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_constants_match_label_table() {
        for (code, label) in [
            (HOME, "HOME"),
            (BACK, "BACK"),
            (ENDCALL, "ENDCALL"),
            (A, "A"),
            (Z, "Z"),
            (ENTER, "ENTER"),
            (MENU, "MENU"),
            (ESCAPE, "ESCAPE"),
            (CAPS_LOCK, "CAPS_LOCK"),
            (APP_SWITCH, "APP_SWITCH"),
        ] {
            assert_eq!(keycode_label(code), Some(label), "key code {code}");
        }
    }

    #[test]
    fn test_label_lookup_is_case_insensitive() {
        assert_eq!(keycode_from_label("home"), Some(HOME));
        assert_eq!(keycode_from_label("App_Switch"), Some(APP_SWITCH));
        assert_eq!(keycode_from_label("NOT_A_KEY"), None);
    }

    #[test]
    fn test_out_of_range_codes_have_no_label() {
        assert_eq!(keycode_label(-1), None);
        assert_eq!(keycode_label(116), None);
    }

    #[test]
    fn test_app_switch_keys() {
        assert!(is_app_switch_key_code(HOME));
        assert!(is_app_switch_key_code(ENDCALL));
        assert!(!is_app_switch_key_code(APP_SWITCH));
        assert!(!is_app_switch_key_code(BACK));
    }
}
