//! # inputflow-core
//!
//! Shared library for inputflow containing the input event model, the
//! per-connection input state machine, the channel wire codec and the key code
//! vocabulary.
//!
//! This crate has no threads and no clocks of its own.  The dispatcher crate
//! builds on it.
//!
//! # Architecture overview (for beginners)
//!
//! inputflow routes key and pointer events from input devices to client
//! applications.  Each client owns one end of an *input channel*; the
//! dispatcher owns the other end, publishes events into it and waits for the
//! client to acknowledge each one.
//!
//! This crate (`inputflow-core`) is the shared foundation.  It defines:
//!
//! - **`domain`** – Event records, dispatch entries, delivery targets, flag
//!   sets and [`InputState`], which remembers the keys and pointer strokes a
//!   client has seen so the dispatcher can cancel them cleanly.
//!
//! - **`protocol`** – How events travel over a channel.  Messages are framed
//!   with a 12-byte header and a `bincode` payload.  The [`InputChannel`] trait
//!   is the seam the dispatcher publishes through, and the loopback transport
//!   provides an in-process implementation.
//!
//! - **`keymap`** – Symbolic names for key codes.

pub mod domain;
pub mod keymap;
pub mod protocol;

pub use domain::event::{
    DispatchEntry, EventEntry, EventKind, EventRef, KeyEntry, MotionEntry, Nanos,
    NotifyDeviceResetArgs, NotifyKeyArgs, NotifyMotionArgs, PointerCoords, PointerProperties,
};
pub use domain::flags::{KeyFlags, MotionFlags, PolicyFlags, TargetFlags};
pub use domain::input_state::{CancelationMode, CancelationOptions, InputState};
pub use domain::target::{ChannelId, InputTarget};
pub use domain::validation::ValidationError;
pub use protocol::channel::{
    FinishedSignal, InputChannel, PublishError, Readiness, ReadinessSink, ReceiveError,
};
pub use protocol::messages::{InputMessage, KeyEvent, MotionEvent};
