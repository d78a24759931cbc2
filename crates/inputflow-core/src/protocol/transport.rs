//! In-process channel pair used by tests, benchmarks and the demo daemon.
//!
//! [`open_channel_pair`] returns the dispatcher's end ([`LoopbackChannel`]) and
//! the client's end ([`InputConsumer`]).  Frames are real encoded bytes, so the
//! codec is exercised end to end, and the server-to-client direction has a
//! bounded byte capacity so a slow client eventually causes `WouldBlock`.
//!
//! Dropping either end marks the pair closed: the survivor sees `DeadObject`,
//! and a dropped consumer signals `HANGUP` to the dispatcher's poller.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::domain::target::ChannelId;
use crate::protocol::channel::{
    FinishedSignal, InputChannel, PublishError, Readiness, ReadinessSink, ReceiveError,
};
use crate::protocol::codec::{decode_message, encode_message};
use crate::protocol::messages::{InputMessage, KeyEvent, MotionEvent};

/// Default capacity of the server-to-client direction, in bytes.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32 * 1024;

static NEXT_CHANNEL_ID: AtomicI32 = AtomicI32::new(1);

#[derive(Default)]
struct Shared {
    to_client: VecDeque<Vec<u8>>,
    to_client_bytes: usize,
    to_server: VecDeque<Vec<u8>>,
    server_open: bool,
    client_open: bool,
    sink: Option<Arc<dyn ReadinessSink>>,
}

struct Pipe {
    id: ChannelId,
    capacity: usize,
    shared: Mutex<Shared>,
    client_wakeup: Condvar,
}

impl Pipe {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivers `readiness` to the sink, outside the pipe lock.
    fn notify(&self, guard: MutexGuard<'_, Shared>, readiness: u32) {
        let sink = guard.sink.clone();
        drop(guard);
        if let Some(sink) = sink {
            sink.signal(self.id, Readiness(readiness));
        }
    }
}

/// Opens a connected channel pair.
pub fn open_channel_pair(name: &str, capacity_bytes: usize) -> (LoopbackChannel, InputConsumer) {
    let id = ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed));
    let pipe = Arc::new(Pipe {
        id,
        capacity: capacity_bytes,
        shared: Mutex::new(Shared {
            server_open: true,
            client_open: true,
            ..Shared::default()
        }),
        client_wakeup: Condvar::new(),
    });
    (
        LoopbackChannel {
            name: name.to_string(),
            pipe: Arc::clone(&pipe),
        },
        InputConsumer {
            name: name.to_string(),
            pipe,
        },
    )
}

// ── Server end ────────────────────────────────────────────────────────────────

/// The dispatcher's end of a loopback pair.
pub struct LoopbackChannel {
    name: String,
    pipe: Arc<Pipe>,
}

impl LoopbackChannel {
    fn publish(&mut self, msg: &InputMessage) -> Result<(), PublishError> {
        let frame = encode_message(msg)?;
        let mut shared = self.pipe.lock();
        if !shared.client_open {
            return Err(PublishError::DeadObject);
        }
        if shared.to_client_bytes + frame.len() > self.pipe.capacity {
            return Err(PublishError::WouldBlock);
        }
        shared.to_client_bytes += frame.len();
        shared.to_client.push_back(frame);
        drop(shared);
        self.pipe.client_wakeup.notify_all();
        Ok(())
    }
}

impl InputChannel for LoopbackChannel {
    fn id(&self) -> ChannelId {
        self.pipe.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn publish_key_event(&mut self, seq: u32, event: &KeyEvent) -> Result<(), PublishError> {
        self.publish(&InputMessage::Key {
            seq,
            event: event.clone(),
        })
    }

    fn publish_motion_event(
        &mut self,
        seq: u32,
        event: &MotionEvent,
    ) -> Result<(), PublishError> {
        self.publish(&InputMessage::Motion {
            seq,
            event: event.clone(),
        })
    }

    fn receive_finished_signal(&mut self) -> Result<FinishedSignal, ReceiveError> {
        let mut shared = self.pipe.lock();
        let Some(frame) = shared.to_server.pop_front() else {
            return Err(if shared.client_open {
                ReceiveError::WouldBlock
            } else {
                ReceiveError::DeadObject
            });
        };
        drop(shared);

        match decode_message(&frame) {
            Ok((InputMessage::Finished { seq, handled }, _)) => {
                Ok(FinishedSignal { seq, handled })
            }
            Ok((other, _)) => Err(ReceiveError::Malformed(format!(
                "expected finished signal, got {:?}",
                other.message_type()
            ))),
            Err(err) => Err(ReceiveError::Malformed(err.to_string())),
        }
    }

    fn set_readiness_sink(&mut self, sink: Arc<dyn ReadinessSink>) {
        let mut shared = self.pipe.lock();
        shared.sink = Some(sink);
        let pending = !shared.to_server.is_empty();
        let closed = !shared.client_open;
        if pending || closed {
            let mut readiness = 0;
            if pending {
                readiness |= Readiness::INPUT;
            }
            if closed {
                readiness |= Readiness::HANGUP;
            }
            self.pipe.notify(shared, readiness);
        }
    }
}

impl Drop for LoopbackChannel {
    fn drop(&mut self) {
        let mut shared = self.pipe.lock();
        shared.server_open = false;
        shared.sink = None;
        drop(shared);
        self.pipe.client_wakeup.notify_all();
    }
}

// ── Client end ────────────────────────────────────────────────────────────────

/// The client's end of a loopback pair.
pub struct InputConsumer {
    name: String,
    pipe: Arc<Pipe>,
}

impl InputConsumer {
    pub fn id(&self) -> ChannelId {
        self.pipe.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Takes the next published message without blocking.
    pub fn consume(&mut self) -> Result<InputMessage, ReceiveError> {
        let mut shared = self.pipe.lock();
        let Some(frame) = shared.to_client.pop_front() else {
            return Err(if shared.server_open {
                ReceiveError::WouldBlock
            } else {
                ReceiveError::DeadObject
            });
        };
        shared.to_client_bytes -= frame.len();
        self.pipe.notify(shared, Readiness::OUTPUT);

        decode_message(&frame)
            .map(|(msg, _)| msg)
            .map_err(|err| ReceiveError::Malformed(err.to_string()))
    }

    /// Takes every message currently queued for this client.
    pub fn consume_all(&mut self) -> Vec<InputMessage> {
        let mut messages = Vec::new();
        while let Ok(msg) = self.consume() {
            messages.push(msg);
        }
        messages
    }

    /// Blocks until a message is available, the server closes, or `timeout`
    /// elapses.  Returns `true` if a message is ready.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut shared = self.pipe.lock();
        loop {
            if !shared.to_client.is_empty() {
                return true;
            }
            if !shared.server_open {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            shared = self
                .pipe
                .client_wakeup
                .wait_timeout(shared, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Number of messages published but not yet consumed.
    pub fn pending(&self) -> usize {
        self.pipe.lock().to_client.len()
    }

    /// Acknowledges the message published under `seq`.
    pub fn send_finished_signal(&mut self, seq: u32, handled: bool) -> Result<(), PublishError> {
        let frame = encode_message(&InputMessage::Finished { seq, handled })?;
        let mut shared = self.pipe.lock();
        if !shared.server_open {
            return Err(PublishError::DeadObject);
        }
        shared.to_server.push_back(frame);
        trace!(channel = %self.name, seq, handled, "finished signal sent");
        self.pipe.notify(shared, Readiness::INPUT);
        Ok(())
    }
}

impl Drop for InputConsumer {
    fn drop(&mut self) {
        let mut shared = self.pipe.lock();
        shared.client_open = false;
        self.pipe.notify(shared, Readiness::HANGUP);
    }
}
