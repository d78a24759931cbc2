//! The readiness poller the dispatcher blocks on between dispatch steps.
//!
//! The dispatcher registers every channel with the poller.  Channels report
//! through the poller's [`ReadinessSink`] side when a finished signal arrives
//! or their peer hangs up; [`ReadinessPoller::poll_once`] hands those reports
//! back to the dispatch thread.

use std::sync::Arc;
use std::time::Duration;

use inputflow_core::{ChannelId, Readiness, ReadinessSink};

pub trait ReadinessPoller: ReadinessSink {
    /// Interrupts a blocked [`poll_once`](Self::poll_once), or makes the next
    /// call return immediately.
    fn wake(&self);

    fn add_channel(&self, channel_id: ChannelId);

    /// Stops reporting the channel and discards anything already recorded
    /// for it.
    fn remove_channel(&self, channel_id: ChannelId);

    /// Blocks until a registered channel is ready, the poller is woken, or
    /// `timeout` elapses (`None` waits indefinitely).
    fn poll_once(&self, timeout: Option<Duration>) -> Vec<(ChannelId, Readiness)>;

    /// The sink handed to channels at registration.
    fn as_sink(self: Arc<Self>) -> Arc<dyn ReadinessSink>;
}
