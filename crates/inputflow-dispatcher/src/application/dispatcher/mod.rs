//! InputDispatcher: the single owner of the inbound queue, the connection
//! table, the dispatch timers and the deferred-command queue.
//!
//! # Threading model (for beginners)
//!
//! Any thread may call the public entry points (`notify_*`, registration,
//! `set_input_dispatch_mode`, ...).  They all serialise through one internal
//! [`Mutex`] and hold it only briefly.
//!
//! Exactly one thread, the *dispatch thread*, calls [`InputDispatcher::dispatch_once`]
//! in a loop.  Each call:
//!
//! 1. Takes the lock and performs one unit of dispatch work (pick an event,
//!    classify it, find its targets, hand it to their connections).
//! 2. Releases the lock and runs any *commands* that work produced.
//! 3. Blocks on the readiness poller until the next timer is due, an
//!    admission call wakes it, or a channel reports a finished signal.
//!
//! # Commands
//!
//! The dispatcher never calls the external [`DispatcherPolicy`] while holding
//! its lock.  Whenever dispatch needs the policy's opinion it appends a
//! command to a queue instead.  The queue is drained after the lock is
//! released; each command calls the policy and then re-takes the lock to apply
//! the answer.  While commands are pending, no new dispatch work starts.

mod admission;
mod cancel;
mod commands;
mod connection;
mod dispatch_loop;
mod dump;
mod fallback;
mod publish;

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use inputflow_core::{
    CancelationMode, CancelationOptions, ChannelId, EventEntry, InputChannel, KeyEntry, Nanos,
    PolicyFlags, Readiness, ReceiveError,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use connection::ConnectionStatus;
pub use dispatch_loop::DropReason;

use commands::Command;
use connection::Connection;

use super::policy::DispatcherPolicy;
use super::poller::ReadinessPoller;
use super::report::{InputReport, TracingInputReport};
use super::time::{SystemTimeSource, TimeSource};

// ── Settings ──────────────────────────────────────────────────────────────────

/// How long the dispatcher waits for a pending app switch before dropping
/// events that are in the way.
pub const DEFAULT_APP_SWITCH_TIMEOUT: Duration = Duration::from_millis(500);

/// Events older than this are dropped instead of delivered.
pub const DEFAULT_STALE_EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a target may stay unresponsive before the policy hears about it.
pub const DEFAULT_DISPATCHING_TIMEOUT: Duration = Duration::from_secs(5);

/// How far ahead of an unacknowledged event further motion may be streamed.
pub const DEFAULT_STREAM_AHEAD_TIMEOUT: Duration = Duration::from_millis(500);

pub const DEFAULT_SLOW_EVENT_WARNING: Duration = Duration::from_secs(2);

pub const DEFAULT_KEY_REPEAT_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_KEY_REPEAT_DELAY: Duration = Duration::from_millis(50);

/// Tunable timeouts of one dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatcherSettings {
    pub app_switch_timeout: Duration,
    pub stale_event_timeout: Duration,
    pub dispatching_timeout: Duration,
    pub stream_ahead_timeout: Duration,
    pub slow_event_warning: Duration,
    /// Whether the dispatcher synthesizes repeats for held keys.
    pub key_repeat_enabled: bool,
    /// Delay between the initial DOWN and the first synthesized repeat.
    pub key_repeat_timeout: Duration,
    /// Delay between subsequent synthesized repeats.
    pub key_repeat_delay: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            app_switch_timeout: DEFAULT_APP_SWITCH_TIMEOUT,
            stale_event_timeout: DEFAULT_STALE_EVENT_TIMEOUT,
            dispatching_timeout: DEFAULT_DISPATCHING_TIMEOUT,
            stream_ahead_timeout: DEFAULT_STREAM_AHEAD_TIMEOUT,
            slow_event_warning: DEFAULT_SLOW_EVENT_WARNING,
            key_repeat_enabled: true,
            key_repeat_timeout: DEFAULT_KEY_REPEAT_TIMEOUT,
            key_repeat_delay: DEFAULT_KEY_REPEAT_DELAY,
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("input channel {0} is already registered")]
    AlreadyRegistered(ChannelId),

    #[error("input channel {0} is not registered")]
    NotRegistered(ChannelId),
}

// ── Internal state ────────────────────────────────────────────────────────────

/// Why the dispatcher is holding the pending event back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitCause {
    #[default]
    None,
    /// The target has no registered connection yet.
    SystemNotReady,
    /// The target's connection exists but cannot take more input.
    ApplicationNotReady,
}

#[derive(Debug, Default)]
struct TargetWait {
    cause: WaitCause,
    start_time: Nanos,
    timeout_time: Nanos,
    expired: bool,
    target: Option<ChannelId>,
}

#[derive(Debug)]
struct KeyRepeatState {
    last_key: Option<(KeyEntry, PolicyFlags)>,
    next_repeat_time: Nanos,
}

impl Default for KeyRepeatState {
    fn default() -> Self {
        Self {
            last_key: None,
            next_repeat_time: Nanos::MAX,
        }
    }
}

/// Everything guarded by the dispatcher lock.
pub(crate) struct DispatcherState {
    settings: DispatcherSettings,
    clock: Arc<dyn TimeSource>,
    report: Arc<dyn InputReport>,

    inbound: VecDeque<EventEntry>,
    /// The event currently being processed, if it could not finish in one step.
    pending: Option<EventEntry>,

    connections: BTreeMap<ChannelId, Connection>,
    monitors: Vec<ChannelId>,
    focused: Option<ChannelId>,

    commands: VecDeque<Command>,

    dispatch_enabled: bool,
    dispatch_frozen: bool,

    app_switch_saw_key_down: bool,
    /// `Nanos::MAX` when no app switch is pending.
    app_switch_due_time: Nanos,

    /// Id of an inbound event the user produced while the current target was
    /// unresponsive.  Everything ahead of it is dropped.
    next_unblocked_event: Option<u64>,
    last_drop_reason: Option<DropReason>,

    key_repeat: KeyRepeatState,
    wait: TargetWait,
}

impl DispatcherState {
    fn new(settings: DispatcherSettings) -> Self {
        Self {
            settings,
            clock: Arc::new(SystemTimeSource::new()),
            report: Arc::new(TracingInputReport),
            inbound: VecDeque::new(),
            pending: None,
            connections: BTreeMap::new(),
            monitors: Vec::new(),
            focused: None,
            commands: VecDeque::new(),
            dispatch_enabled: false,
            dispatch_frozen: false,
            app_switch_saw_key_down: false,
            app_switch_due_time: Nanos::MAX,
            next_unblocked_event: None,
            last_drop_reason: None,
            key_repeat: KeyRepeatState::default(),
            wait: TargetWait::default(),
        }
    }

    fn now(&self) -> Nanos {
        self.clock.now()
    }

    /// Removes a connection from service.  With `notify` set, the policy is
    /// told the channel broke.
    fn unregister_input_channel(
        &mut self,
        channel_id: ChannelId,
        notify: bool,
        poller: &dyn ReadinessPoller,
    ) -> Result<(), DispatchError> {
        if !self.connections.contains_key(&channel_id) {
            warn!("attempted to unregister already unregistered input channel {}", channel_id);
            return Err(DispatchError::NotRegistered(channel_id));
        }

        self.monitors.retain(|&id| id != channel_id);
        poller.remove_channel(channel_id);
        self.abort_broken_dispatch_cycle(channel_id, notify);

        if let Some(mut connection) = self.connections.remove(&channel_id) {
            connection.status = ConnectionStatus::Zombie;
            info!("unregistered input channel '{}' ({})", connection.name(), channel_id);
        }
        if self.focused == Some(channel_id) {
            self.focused = None;
        }
        Ok(())
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

/// The input dispatch engine.
///
/// Construct one, share it through an `Arc`, and drive it from a single
/// dispatch thread with [`dispatch_once`](Self::dispatch_once).
pub struct InputDispatcher {
    state: Mutex<DispatcherState>,
    policy: Arc<dyn DispatcherPolicy>,
    poller: Arc<dyn ReadinessPoller>,
}

impl InputDispatcher {
    /// Creates a dispatcher.  Dispatch starts disabled; call
    /// [`set_input_dispatch_mode`](Self::set_input_dispatch_mode) to enable it.
    pub fn new(
        policy: Arc<dyn DispatcherPolicy>,
        poller: Arc<dyn ReadinessPoller>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            state: Mutex::new(DispatcherState::new(settings)),
            policy,
            poller,
        }
    }

    /// Replaces the clock every timeout is measured against.
    pub fn with_time_source(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .clock = clock;
        self
    }

    pub fn with_report(mut self, report: Arc<dyn InputReport>) -> Self {
        self.state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .report = report;
        self
    }

    fn lock(&self) -> MutexGuard<'_, DispatcherState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn settings(&self) -> DispatcherSettings {
        self.lock().settings.clone()
    }

    /// Interrupts the dispatch thread's poll so it re-evaluates its state.
    pub fn wake(&self) {
        self.poller.wake();
    }

    // ── Registration ──────────────────────────────────────────────────────────

    /// Starts delivering events to `channel`.
    ///
    /// A monitor receives a passive copy of every dispatched event.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyRegistered`] if a channel with the same
    /// id is already registered.
    pub fn register_input_channel(
        &self,
        mut channel: Box<dyn InputChannel>,
        is_monitor: bool,
    ) -> Result<ChannelId, DispatchError> {
        let channel_id = channel.id();
        {
            let mut state = self.lock();
            if state.connections.contains_key(&channel_id) {
                warn!(
                    "attempted to register already registered input channel '{}'",
                    channel.name()
                );
                return Err(DispatchError::AlreadyRegistered(channel_id));
            }

            info!(
                "registering input channel '{}' ({}), monitor={}",
                channel.name(),
                channel_id,
                is_monitor
            );
            // The poller must know the id before the channel can signal it.
            self.poller.add_channel(channel_id);
            channel.set_readiness_sink(Arc::clone(&self.poller).as_sink());

            state
                .connections
                .insert(channel_id, Connection::new(channel, is_monitor));
            if is_monitor {
                state.monitors.push(channel_id);
            }
        }
        self.poller.wake();
        Ok(channel_id)
    }

    /// Takes a channel out of service.  Anything queued for it is released
    /// without synthesizing cancellations.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotRegistered`] for an unknown id.
    pub fn unregister_input_channel(&self, channel_id: ChannelId) -> Result<(), DispatchError> {
        self.lock()
            .unregister_input_channel(channel_id, false, self.poller.as_ref())?;
        self.poller.wake();
        Ok(())
    }

    // ── Mode and focus ────────────────────────────────────────────────────────

    /// Enables or disables dispatch, and freezes or thaws it.
    ///
    /// Disabling drops every queued event and cancels everything the
    /// connections consider live.  Freezing holds events back without
    /// dropping them; thawing restarts the timeout clock.
    pub fn set_input_dispatch_mode(&self, enabled: bool, frozen: bool) {
        let changed = {
            let mut state = self.lock();
            if state.dispatch_enabled == enabled && state.dispatch_frozen == frozen {
                false
            } else {
                if state.dispatch_frozen && !frozen {
                    state.reset_anr_timeouts();
                }
                if state.dispatch_enabled && !enabled {
                    state.reset_and_drop_everything("dispatcher is being disabled");
                }
                state.dispatch_enabled = enabled;
                state.dispatch_frozen = frozen;
                true
            }
        };

        if changed {
            info!("input dispatch mode set: enabled={}, frozen={}", enabled, frozen);
            self.poller.wake();
        }
    }

    /// Sets the channel keys are delivered to.  The previously focused
    /// connection receives cancellations for its live keys.
    pub fn set_focused_channel(&self, focused: Option<ChannelId>) {
        let changed = {
            let mut state = self.lock();
            if state.focused == focused {
                false
            } else {
                if let Some(old) = state.focused {
                    let options = CancelationOptions::new(
                        CancelationMode::NonPointerEvents,
                        "focus left window",
                    );
                    state.synthesize_cancelation_events_for_connection(old, &options);
                }
                debug!("focus changed: {:?} -> {:?}", state.focused, focused);
                state.focused = focused;
                true
            }
        };

        if changed {
            self.poller.wake();
        }
    }

    // ── Driving the loop ──────────────────────────────────────────────────────

    /// Performs one dispatch step, then blocks until there is more to do.
    pub fn dispatch_once(&self) {
        let next_wakeup = self.run_dispatch_step();
        let timeout = self.poll_timeout(next_wakeup);
        self.poll_channels(timeout);
    }

    /// Performs one unit of dispatch work and runs the resulting commands.
    ///
    /// Returns the time the next step is due: `Nanos::MIN` to run again
    /// immediately, `Nanos::MAX` to wait for an external wakeup.
    pub fn run_dispatch_step(&self) -> Nanos {
        let mut next_wakeup = Nanos::MAX;
        {
            let mut state = self.lock();
            // Commands from the previous step must run before new work starts.
            if state.commands.is_empty() {
                state.dispatch_once_inner(&mut next_wakeup);
            }
        }

        if self.run_commands() {
            next_wakeup = Nanos::MIN;
        }
        next_wakeup
    }

    /// Converts a wakeup time into a poll timeout.  `None` blocks until woken.
    pub fn poll_timeout(&self, next_wakeup: Nanos) -> Option<Duration> {
        if next_wakeup == Nanos::MAX {
            return None;
        }
        let now = self.lock().now();
        let remaining = u64::try_from(next_wakeup.saturating_sub(now)).unwrap_or(0);
        Some(Duration::from_nanos(remaining))
    }

    /// Waits up to `timeout` for channel readiness and handles what arrives.
    pub fn poll_channels(&self, timeout: Option<Duration>) {
        for (channel_id, readiness) in self.poller.poll_once(timeout) {
            self.handle_receive_callback(channel_id, readiness);
        }
    }

    /// Reacts to a readiness report for one channel: reads finished signals,
    /// or unregisters the channel if its peer is gone.
    pub fn handle_receive_callback(&self, channel_id: ChannelId, readiness: Readiness) {
        {
            let mut guard = self.lock();
            let state = &mut *guard;

            let Some(connection) = state.connections.get(&channel_id) else {
                error!(
                    "received spurious receive callback for unknown input channel {}, events={}",
                    channel_id, readiness
                );
                return;
            };
            let is_monitor = connection.is_monitor;
            let name = connection.name().to_owned();

            let notify = if readiness.is_broken() {
                // Monitors are never unregistered explicitly; their peer
                // closing is the normal way for them to go.
                let notify = !is_monitor;
                if notify {
                    warn!(
                        "channel '{}' ~ consumer closed input channel or an error occurred, events={}",
                        name, readiness
                    );
                }
                Some(notify)
            } else if !readiness.contains(Readiness::INPUT) {
                warn!(
                    "channel '{}' ~ received spurious callback for unhandled poll event, events={}",
                    name, readiness
                );
                return;
            } else {
                let now = state.now();
                let status = loop {
                    let Some(connection) = state.connections.get_mut(&channel_id) else {
                        break ReceiveError::WouldBlock;
                    };
                    match connection.channel.receive_finished_signal() {
                        Ok(signal) => {
                            state.report.received_finished_signal(
                                channel_id,
                                signal.seq,
                                signal.handled,
                            );
                            state.finish_dispatch_cycle(now, channel_id, signal.seq, signal.handled);
                        }
                        Err(err) => break err,
                    }
                };

                match status {
                    ReceiveError::WouldBlock => None,
                    ReceiveError::DeadObject => {
                        let notify = !is_monitor;
                        if notify {
                            error!("channel '{}' ~ failed to receive finished signal: peer is gone", name);
                        }
                        Some(notify)
                    }
                    ReceiveError::Malformed(reason) => {
                        error!("channel '{}' ~ failed to receive finished signal: {}", name, reason);
                        Some(true)
                    }
                }
            };

            if let Some(notify) = notify {
                if let Err(err) =
                    state.unregister_input_channel(channel_id, notify, self.poller.as_ref())
                {
                    debug!("channel '{}' ~ {}", name, err);
                }
            }
        }

        self.run_commands();
    }

    // ── Introspection ─────────────────────────────────────────────────────────

    pub fn inbound_queue_len(&self) -> usize {
        self.lock().inbound.len()
    }

    /// Deadline of the pending app switch, if one is armed.
    pub fn app_switch_due_time(&self) -> Option<Nanos> {
        let due = self.lock().app_switch_due_time;
        (due != Nanos::MAX).then_some(due)
    }

    pub fn connection_status(&self, channel_id: ChannelId) -> Option<ConnectionStatus> {
        self.lock()
            .connections
            .get(&channel_id)
            .map(|connection| connection.status)
    }

    pub fn outbound_queue_len(&self, channel_id: ChannelId) -> Option<usize> {
        self.lock()
            .connections
            .get(&channel_id)
            .map(|connection| connection.outbound.len())
    }

    pub fn wait_queue_len(&self, channel_id: ChannelId) -> Option<usize> {
        self.lock()
            .connections
            .get(&channel_id)
            .map(|connection| connection.wait.len())
    }

    pub fn is_publisher_blocked(&self, channel_id: ChannelId) -> Option<bool> {
        self.lock()
            .connections
            .get(&channel_id)
            .map(|connection| connection.publisher_blocked)
    }

    /// `true` when the connection holds no live keys or strokes.
    pub fn is_connection_neutral(&self, channel_id: ChannelId) -> Option<bool> {
        self.lock()
            .connections
            .get(&channel_id)
            .map(|connection| connection.input_state.is_neutral())
    }

    pub fn wait_cause(&self) -> WaitCause {
        self.lock().wait.cause
    }

    /// Why the most recently finished event was dropped, if it was.
    pub fn last_drop_reason(&self) -> Option<DropReason> {
        self.lock().last_drop_reason
    }
}

/// Converts a millisecond-resolution age for logs and dumps.
fn millis(nanos: Nanos) -> f64 {
    nanos as f64 / 1_000_000.0
}

#[cfg(test)]
mod test_support;
