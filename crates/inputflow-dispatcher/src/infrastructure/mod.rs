//! Infrastructure layer for the dispatcher.
//!
//! Contains the OS-facing adapters: the condition-variable looper the
//! dispatch thread blocks on, the dispatch thread itself, and configuration
//! file storage.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `inputflow_core`, but MUST NOT be imported by the `application` layer.

pub mod dispatch_thread;
pub mod looper;
pub mod storage;
