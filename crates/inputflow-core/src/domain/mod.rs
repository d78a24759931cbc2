//! Domain entities for inputflow.
//!
//! Pure data and rules with no threads, no clocks and no I/O.
//!
//! # What lives here (for beginners)
//!
//! - **`codes`** – the raw integer vocabulary of input: key and motion actions,
//!   source classes, meta-state bits.
//! - **`flags`** – bit-flag newtypes for policy, key, motion and target flags.
//! - **`event`** – the records that travel through the dispatcher and the
//!   per-target dispatch entries built from them.
//! - **`target`** – channel identities and pre-resolved delivery targets.
//! - **`input_state`** – the per-connection memory of which keys are held and
//!   which pointer strokes are open, used to synthesize cancellations.
//! - **`split`** – restricting a multi-pointer event to a subset of pointers.
//! - **`validation`** – structural checks run before an event is admitted.
//!
//! The dispatcher crate owns all of the *behaviour*; everything here can be
//! tested on its own.

pub mod codes;
pub mod event;
pub mod flags;
pub mod input_state;
pub mod split;
pub mod target;
pub mod validation;
