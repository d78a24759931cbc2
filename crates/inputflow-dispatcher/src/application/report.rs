//! Diagnostic hooks fired as events move through the dispatcher.
//!
//! An [`InputReport`] observes; it never influences dispatch.  It is called
//! with the dispatcher lock held, so implementations must be quick and must
//! not call back into the dispatcher.

use inputflow_core::{ChannelId, EventEntry, KeyEvent, MotionEvent};
use tracing::trace;

/// Observer of admission, publication and acknowledgement.
pub trait InputReport: Send + Sync {
    /// An event passed validation and entered the inbound queue.
    fn received_event(&self, event: &EventEntry);

    fn published_key_event(&self, channel_id: ChannelId, seq: u32, event: &KeyEvent);

    fn published_motion_event(&self, channel_id: ChannelId, seq: u32, event: &MotionEvent);

    /// A client acknowledged the event published under `seq`.
    fn received_finished_signal(&self, channel_id: ChannelId, seq: u32, handled: bool);
}

/// Routes every report to `tracing` at TRACE level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingInputReport;

impl InputReport for TracingInputReport {
    fn received_event(&self, event: &EventEntry) {
        trace!("received event: {}", event);
    }

    fn published_key_event(&self, channel_id: ChannelId, seq: u32, event: &KeyEvent) {
        trace!(
            "published key event: channel={}, seq={}, action={}, keyCode={}, repeatCount={}",
            channel_id,
            seq,
            event.action,
            event.key_code,
            event.repeat_count
        );
    }

    fn published_motion_event(&self, channel_id: ChannelId, seq: u32, event: &MotionEvent) {
        trace!(
            "published motion event: channel={}, seq={}, action=0x{:x}, pointers={}",
            channel_id,
            seq,
            event.action,
            event.pointer_count()
        );
    }

    fn received_finished_signal(&self, channel_id: ChannelId, seq: u32, handled: bool) {
        trace!(
            "received finished signal: channel={}, seq={}, handled={}",
            channel_id,
            seq,
            handled
        );
    }
}
