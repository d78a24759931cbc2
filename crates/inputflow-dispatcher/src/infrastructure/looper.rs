//! A `Mutex` + `Condvar` readiness poller.
//!
//! # How it works (for beginners)
//!
//! Channels run on other threads.  When a client sends a finished signal or
//! hangs up, its channel calls [`ReadinessSink::signal`] on the looper, which
//! records the readiness bits under the channel's id and notifies the
//! condition variable.  The dispatch thread, parked in [`Looper::poll_once`],
//! wakes up, takes everything recorded so far and hands it to the dispatcher.
//!
//! ```text
//!  client thread                  looper                 dispatch thread
//!  ─────────────                  ──────                 ───────────────
//!  send_finished_signal ──► signal(id, INPUT) ──► notify ──► poll_once returns
//! ```
//!
//! Only input, error and hangup readiness is recorded; "buffer space
//! available" reports are of no interest to the dispatcher.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use inputflow_core::{ChannelId, Readiness, ReadinessSink};
use tracing::trace;

use crate::application::poller::ReadinessPoller;

/// Readiness bits the looper records.
const INTEREST: u32 = Readiness::INPUT | Readiness::ERROR | Readiness::HANGUP;

#[derive(Debug, Default)]
struct LooperState {
    channels: BTreeSet<ChannelId>,
    ready: BTreeMap<ChannelId, Readiness>,
    woken: bool,
}

#[derive(Debug, Default)]
pub struct Looper {
    state: Mutex<LooperState>,
    ready: Condvar,
}

impl Looper {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LooperState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of channels currently watched.
    pub fn channel_count(&self) -> usize {
        self.lock().channels.len()
    }
}

impl ReadinessSink for Looper {
    fn signal(&self, channel_id: ChannelId, readiness: Readiness) {
        let bits = readiness.0 & INTEREST;
        if bits == 0 {
            return;
        }

        let mut state = self.lock();
        if !state.channels.contains(&channel_id) {
            trace!("ignoring readiness {} for unwatched channel {}", readiness, channel_id);
            return;
        }
        state.ready.entry(channel_id).or_default().insert(bits);
        drop(state);
        self.ready.notify_all();
    }
}

impl ReadinessPoller for Looper {
    fn wake(&self) {
        self.lock().woken = true;
        self.ready.notify_all();
    }

    fn add_channel(&self, channel_id: ChannelId) {
        self.lock().channels.insert(channel_id);
    }

    fn remove_channel(&self, channel_id: ChannelId) {
        let mut state = self.lock();
        state.channels.remove(&channel_id);
        state.ready.remove(&channel_id);
    }

    fn poll_once(&self, timeout: Option<Duration>) -> Vec<(ChannelId, Readiness)> {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut state = self.lock();
        loop {
            if state.woken || !state.ready.is_empty() {
                state.woken = false;
                return std::mem::take(&mut state.ready).into_iter().collect();
            }

            state = match deadline {
                None => self
                    .ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Vec::new();
                    }
                    self.ready
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn as_sink(self: Arc<Self>) -> Arc<dyn ReadinessSink> {
        self
    }
}
