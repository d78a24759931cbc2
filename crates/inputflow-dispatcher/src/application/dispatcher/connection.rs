//! One registered client channel and its delivery queues.
//!
//! # Connection lifecycle (for beginners)
//!
//! ```text
//!            unrecoverable publish error
//!   Normal ─────────────────────────────►  Broken
//!     │
//!     │      unregister
//!     └─────────────────────────────────►  Zombie
//! ```
//!
//! Both `Broken` and `Zombie` are terminal.  A broken connection stays in the
//! connection table (so a later unregister still finds it) but never receives
//! another event.
//!
//! Entries move through two queues:
//!
//! - **outbound**: bound to this connection, not yet handed to the channel.
//! - **wait**: handed to the channel, waiting for the client's finished signal.

use std::collections::VecDeque;
use std::fmt;

use inputflow_core::{ChannelId, DispatchEntry, InputChannel, InputState, Nanos};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Everything is peachy.
    Normal,
    /// An unrecoverable communication error has occurred.
    Broken,
    /// The channel was unregistered.
    Zombie,
}

impl ConnectionStatus {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionStatus::Normal => "NORMAL",
            ConnectionStatus::Broken => "BROKEN",
            ConnectionStatus::Zombie => "ZOMBIE",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Coordinate transform of the last target this connection was reached
/// through.  Synthesized cancellations reuse it so that a CANCEL lands in the
/// same coordinate space as the stroke it ends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Transform {
    pub x_offset: f32,
    pub y_offset: f32,
    pub scale_factor: f32,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            x_offset: 0.0,
            y_offset: 0.0,
            scale_factor: 1.0,
        }
    }
}

pub(crate) struct Connection {
    pub channel: Box<dyn InputChannel>,
    pub status: ConnectionStatus,
    pub is_monitor: bool,
    pub outbound: VecDeque<DispatchEntry>,
    pub wait: VecDeque<DispatchEntry>,
    pub input_state: InputState,
    /// Set when the channel reported a full buffer while events were still
    /// awaiting acknowledgement.
    pub publisher_blocked: bool,
    pub last_transform: Transform,
}

impl Connection {
    pub fn new(channel: Box<dyn InputChannel>, is_monitor: bool) -> Self {
        Self {
            channel,
            status: ConnectionStatus::Normal,
            is_monitor,
            outbound: VecDeque::new(),
            wait: VecDeque::new(),
            input_state: InputState::new(),
            publisher_blocked: false,
            last_transform: Transform::default(),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.channel.id()
    }

    pub fn name(&self) -> &str {
        self.channel.name()
    }

    pub fn find_wait_entry(&self, seq: u32) -> Option<&DispatchEntry> {
        self.wait.iter().find(|entry| entry.seq == seq)
    }

    pub fn remove_wait_entry(&mut self, seq: u32) -> Option<DispatchEntry> {
        let index = self.wait.iter().position(|entry| entry.seq == seq)?;
        self.wait.remove(index)
    }

    /// Delivery time of the oldest unacknowledged entry.
    pub fn oldest_delivery_time(&self) -> Option<Nanos> {
        self.wait.front().map(|entry| entry.delivery_time)
    }

    /// Releases every queued entry.  Returns how many were dropped.
    pub fn drain_queues(&mut self) -> usize {
        let drained = self.outbound.len() + self.wait.len();
        self.outbound.clear();
        self.wait.clear();
        drained
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("status", &self.status)
            .field("is_monitor", &self.is_monitor)
            .field("outbound", &self.outbound.len())
            .field("wait", &self.wait.len())
            .field("publisher_blocked", &self.publisher_blocked)
            .finish()
    }
}
