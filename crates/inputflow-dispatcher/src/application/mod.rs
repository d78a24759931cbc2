//! Application layer: the dispatch engine and the seams it is driven through.
//!
//! # What lives here? (for beginners)
//!
//! This layer holds the dispatcher's rules: ordering, backpressure, timeouts,
//! cancellation and fallback keys.  It never spawns threads or touches the
//! file system.  Everything it needs from the outside world is expressed as a
//! trait, so tests can substitute deterministic implementations:
//!
//! - **`dispatcher`** – [`InputDispatcher`], the engine itself.
//!
//! - **`policy`** – [`DispatcherPolicy`], the external component that decides
//!   whether keys reach applications, supplies fallback keys and hears about
//!   unresponsive or broken channels.
//!
//! - **`poller`** – [`ReadinessPoller`], what the dispatch thread blocks on
//!   between steps.  The production implementation is the looper in the
//!   infrastructure layer.
//!
//! - **`report`** – [`InputReport`], a passive observer of event traffic.
//!
//! - **`time`** – [`TimeSource`], the monotonic clock every timeout is measured
//!   against.

pub mod dispatcher;
pub mod policy;
pub mod poller;
pub mod report;
pub mod time;

pub use dispatcher::{
    ConnectionStatus, DispatchError, DispatcherSettings, DropReason, InputDispatcher, WaitCause,
};
pub use policy::{DispatcherPolicy, KeyInterception, PassThroughPolicy, UserActivity};
pub use poller::ReadinessPoller;
pub use report::{InputReport, TracingInputReport};
pub use time::{ManualTimeSource, SystemTimeSource, TimeSource};
