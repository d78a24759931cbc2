//! Key code vocabulary.
//!
//! Only symbolic naming lives here; key translation (meta state, fallback
//! substitution) is the policy's business.

pub mod keycodes;

pub use keycodes::{is_app_switch_key_code, keycode_from_label, keycode_label};
