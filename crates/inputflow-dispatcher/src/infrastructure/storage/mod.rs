//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the TOML configuration file, writes it back
//! when asked, and falls back to defaults when no file exists yet.  The rest
//! of the crate only ever sees [`DispatcherSettings`](crate::application::DispatcherSettings).

pub mod config;
