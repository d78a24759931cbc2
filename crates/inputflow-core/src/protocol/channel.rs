//! The transport seam between the dispatcher and a client.
//!
//! The dispatcher never touches sockets directly.  It talks to each client
//! through an [`InputChannel`], and learns that a channel has something to say
//! through a [`ReadinessSink`] the channel was handed at registration.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::domain::target::ChannelId;
use crate::protocol::codec::CodecError;
use crate::protocol::messages::{KeyEvent, MotionEvent};

/// Why a publish attempt failed.
#[derive(Debug, Error, PartialEq)]
pub enum PublishError {
    /// The channel's buffer is full; retry once the client has drained it.
    #[error("channel buffer is full")]
    WouldBlock,

    /// The client end is gone.
    #[error("peer has closed the channel")]
    DeadObject,

    #[error("failed to encode frame: {0}")]
    Codec(#[from] CodecError),
}

/// Why reading a finished signal failed.
#[derive(Debug, Error, PartialEq)]
pub enum ReceiveError {
    /// Nothing to read right now.
    #[error("no finished signal available")]
    WouldBlock,

    #[error("peer has closed the channel")]
    DeadObject,

    /// The client sent something that is not a finished signal.
    #[error("malformed finished signal: {0}")]
    Malformed(String),
}

/// The client's acknowledgement of one published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishedSignal {
    pub seq: u32,
    pub handled: bool,
}

/// Readiness condition reported for a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Readiness(pub u32);

impl Readiness {
    /// A finished signal can be read.
    pub const INPUT: u32 = 0x1;
    /// Buffer space has become available.
    pub const OUTPUT: u32 = 0x2;
    pub const ERROR: u32 = 0x4;
    /// The peer has gone away.
    pub const HANGUP: u32 = 0x8;

    pub fn contains(self, bits: u32) -> bool {
        self.0 & bits == bits
    }

    pub fn intersects(self, bits: u32) -> bool {
        self.0 & bits != 0
    }

    pub fn insert(&mut self, bits: u32) {
        self.0 |= bits;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// `true` if the channel can no longer be used.
    pub fn is_broken(self) -> bool {
        self.intersects(Self::ERROR | Self::HANGUP)
    }
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::INPUT, "INPUT"),
            (Self::OUTPUT, "OUTPUT"),
            (Self::ERROR, "ERROR"),
            (Self::HANGUP, "HANGUP"),
        ];
        let mut first = true;
        for (bit, name) in names {
            if self.intersects(bit) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{name}")?;
                first = false;
            }
        }
        if first {
            write!(f, "NONE")?;
        }
        Ok(())
    }
}

/// Receives readiness notifications from channels.
///
/// Implemented by the dispatcher's poller.  Implementations must not call
/// back into the channel that is signalling.
pub trait ReadinessSink: Send + Sync {
    fn signal(&self, channel_id: ChannelId, readiness: Readiness);
}

/// Server side of a bidirectional channel to one client.
pub trait InputChannel: Send {
    fn id(&self) -> ChannelId;

    fn name(&self) -> &str;

    fn publish_key_event(&mut self, seq: u32, event: &KeyEvent) -> Result<(), PublishError>;

    fn publish_motion_event(&mut self, seq: u32, event: &MotionEvent)
        -> Result<(), PublishError>;

    /// Reads the next finished signal without blocking.
    fn receive_finished_signal(&mut self) -> Result<FinishedSignal, ReceiveError>;

    /// Hands the channel the sink it must notify when it becomes readable or
    /// its peer goes away.  Channels that cannot signal may ignore it.
    fn set_readiness_sink(&mut self, _sink: Arc<dyn ReadinessSink>) {}
}
