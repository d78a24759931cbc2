//! One unit of dispatch work: pick the next event, decide whether to drop it,
//! find its targets, and hand it to their connections.
//!
//! # Step outcome (for beginners)
//!
//! An event does not always finish in one step.  A key may be waiting for the
//! policy's interception verdict; any event may be waiting for its target to
//! become ready.  Such an event stays *pending* and the step is retried on the
//! next wakeup.  When the event finishes (delivered or dropped) the step asks
//! to run again immediately, so a backlog drains without sleeping.
//!
//! Drop precedence, first match wins:
//!
//! ```text
//! policy > disabled > app switch (non-switch events) > stale > blocked
//! ```

use std::fmt;
use std::sync::Arc;

use inputflow_core::domain::codes::{key_action, motion_action};
use inputflow_core::domain::event::{DeviceResetEntry, InterceptKeyResult};
use inputflow_core::{
    CancelationMode, CancelationOptions, ChannelId, EventEntry, EventKind, InputTarget, KeyFlags,
    Nanos, PolicyFlags,
};
use tracing::{debug, error, info};

use super::admission::is_app_switch_key_event;
use super::commands::Command;
use super::publish::to_key_event;
use super::{millis, ConnectionStatus, DispatcherState, TargetWait, WaitCause};
use crate::application::policy::UserActivity;
use crate::application::time::duration_to_nanos;

/// Why an inbound event was discarded instead of delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The policy consumed the event.
    Policy,
    /// Dispatch is disabled.
    Disabled,
    /// An app switch is overdue and the event is in its way.
    AppSwitch,
    /// The current target is unresponsive and the user moved on to another.
    Blocked,
    /// The event waited longer than the stale-event timeout.
    Stale,
}

impl DropReason {
    fn cancelation_reason(self) -> &'static str {
        match self {
            DropReason::Policy => "inbound event was dropped because the policy consumed it",
            DropReason::Disabled => "inbound event was dropped because input dispatch is disabled",
            DropReason::AppSwitch => {
                "inbound event was dropped because of pending overdue app switch"
            }
            DropReason::Blocked => {
                "inbound event was dropped because the current application is not responding \
                 and the user has started interacting with a different application"
            }
            DropReason::Stale => "inbound event was dropped because it is stale",
        }
    }
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DropReason::Policy => "POLICY",
            DropReason::Disabled => "DISABLED",
            DropReason::AppSwitch => "APP_SWITCH",
            DropReason::Blocked => "BLOCKED",
            DropReason::Stale => "STALE",
        };
        f.write_str(label)
    }
}

enum Outcome {
    /// Keep the event pending and try again on the next wakeup.
    Retry,
    /// The event is finished without delivery.
    Done,
    Deliver(Vec<InputTarget>),
}

enum TargetSearch {
    Ready(Vec<InputTarget>),
    Pending,
    /// Waiting for the target was abandoned.
    Failed,
}

impl DispatcherState {
    pub(super) fn dispatch_once_inner(&mut self, next_wakeup: &mut Nanos) {
        let now = self.now();

        if !self.dispatch_enabled {
            self.reset_key_repeat();
        }
        if self.dispatch_frozen {
            debug!("dispatch frozen, waiting until thawed");
            return;
        }

        // Wake up no later than the app switch deadline.
        let mut app_switch_due = self.app_switch_due_time <= now;
        if self.app_switch_due_time < *next_wakeup {
            *next_wakeup = self.app_switch_due_time;
        }

        let mut entry = match self.pending.take() {
            Some(entry) => entry,
            None => match self.next_inbound_event(now, &mut app_switch_due, next_wakeup) {
                Some(entry) => entry,
                None => return,
            },
        };

        let mut drop_reason = None;
        if !entry.policy_flags.contains(PolicyFlags::PASS_TO_USER) {
            drop_reason = Some(DropReason::Policy);
        } else if !self.dispatch_enabled {
            drop_reason = Some(DropReason::Disabled);
        }
        if self.next_unblocked_event == Some(entry.id) {
            self.next_unblocked_event = None;
        }

        let outcome = match entry.kind {
            EventKind::DeviceReset(DeviceResetEntry { device_id }) => {
                self.dispatch_device_reset(device_id);
                Outcome::Done
            }
            EventKind::Key(_) => {
                if app_switch_due {
                    if is_app_switch_key_event(&entry) {
                        self.reset_pending_app_switch(true);
                    } else if drop_reason.is_none() {
                        drop_reason = Some(DropReason::AppSwitch);
                    }
                }
                if drop_reason.is_none() && self.is_stale_event(now, &entry) {
                    drop_reason = Some(DropReason::Stale);
                }
                if drop_reason.is_none() && self.next_unblocked_event.is_some() {
                    drop_reason = Some(DropReason::Blocked);
                }
                self.dispatch_key(now, &mut entry, &mut drop_reason, next_wakeup)
            }
            EventKind::Motion(_) => {
                if drop_reason.is_none() && app_switch_due {
                    drop_reason = Some(DropReason::AppSwitch);
                }
                if drop_reason.is_none() && self.is_stale_event(now, &entry) {
                    drop_reason = Some(DropReason::Stale);
                }
                if drop_reason.is_none() && self.next_unblocked_event.is_some() {
                    drop_reason = Some(DropReason::Blocked);
                }
                self.dispatch_motion(now, &mut entry, drop_reason, next_wakeup)
            }
        };

        match outcome {
            Outcome::Retry => {
                self.pending = Some(entry);
            }
            Outcome::Done => {
                if let Some(reason) = drop_reason {
                    self.drop_inbound_event(&entry, reason);
                }
                self.last_drop_reason = drop_reason;
                self.release_pending_event(entry.id);
                *next_wakeup = Nanos::MIN;
            }
            Outcome::Deliver(targets) => {
                let event_id = entry.id;
                self.dispatch_event_to_targets(now, Arc::new(entry), &targets);
                self.last_drop_reason = None;
                self.release_pending_event(event_id);
                *next_wakeup = Nanos::MIN;
            }
        }
    }

    /// Dequeues the next inbound event, or synthesizes a key repeat when the
    /// queue is idle and a key is held.
    fn next_inbound_event(
        &mut self,
        now: Nanos,
        app_switch_due: &mut bool,
        next_wakeup: &mut Nanos,
    ) -> Option<EventEntry> {
        let entry = match self.inbound.pop_front() {
            Some(entry) => entry,
            None => {
                // The switch key will never arrive now.
                if *app_switch_due {
                    self.reset_pending_app_switch(false);
                    *app_switch_due = false;
                }

                self.key_repeat.last_key.as_ref()?;
                if now < self.key_repeat.next_repeat_time {
                    *next_wakeup = (*next_wakeup).min(self.key_repeat.next_repeat_time);
                    return None;
                }
                self.synthesize_key_repeat(now)?
            }
        };

        // A new event starts with a fresh wait.
        self.reset_anr_timeouts();
        Some(entry)
    }

    // ── Key repeat ────────────────────────────────────────────────────────────

    fn synthesize_key_repeat(&mut self, now: Nanos) -> Option<EventEntry> {
        let (last, last_flags) = self.key_repeat.last_key.as_mut()?;
        last.repeat_count += 1;

        let policy_flags = PolicyFlags(
            last_flags.0
                & (PolicyFlags::RAW_MASK | PolicyFlags::PASS_TO_USER | PolicyFlags::TRUSTED),
        );
        let mut repeat = last.clone();
        repeat.synthetic_repeat = true;
        repeat.intercept_result = InterceptKeyResult::Unknown;
        repeat.intercept_wakeup_time = 0;

        self.key_repeat.next_repeat_time =
            now.saturating_add(duration_to_nanos(self.settings.key_repeat_delay));
        debug!(
            "synthesized key repeat: keyCode={}, repeatCount={}",
            repeat.key_code, repeat.repeat_count
        );
        Some(EventEntry::new(now, policy_flags, EventKind::Key(repeat)))
    }

    pub(super) fn reset_key_repeat(&mut self) {
        self.key_repeat.last_key = None;
        self.key_repeat.next_repeat_time = Nanos::MAX;
    }

    // ── App switch and staleness ──────────────────────────────────────────────

    pub(super) fn is_app_switch_pending(&self) -> bool {
        self.app_switch_due_time != Nanos::MAX
    }

    fn reset_pending_app_switch(&mut self, handled: bool) {
        self.app_switch_due_time = Nanos::MAX;
        if handled {
            debug!("app switch has arrived");
        } else {
            debug!("app switch was abandoned");
        }
    }

    fn is_stale_event(&self, now: Nanos, entry: &EventEntry) -> bool {
        now.saturating_sub(entry.event_time) >= duration_to_nanos(self.settings.stale_event_timeout)
    }

    // ── Per-kind dispatch ─────────────────────────────────────────────────────

    fn dispatch_device_reset(&mut self, device_id: i32) {
        debug!("dispatchDeviceReset - deviceId={}", device_id);
        let options =
            CancelationOptions::new(CancelationMode::All, "device was reset").for_device(device_id);
        self.synthesize_cancelation_events_for_all_connections(&options);
    }

    fn dispatch_key(
        &mut self,
        now: Nanos,
        entry: &mut EventEntry,
        drop_reason: &mut Option<DropReason>,
        next_wakeup: &mut Nanos,
    ) -> Outcome {
        let event_id = entry.id;
        let event_time = entry.event_time;
        let policy_flags = entry.policy_flags;

        if !entry.dispatch_in_progress {
            let Some(key) = entry.key_mut() else {
                return Outcome::Done;
            };
            let arms_repeat = self.settings.key_repeat_enabled
                && key.repeat_count == 0
                && key.action == key_action::DOWN
                && policy_flags.contains(PolicyFlags::TRUSTED)
                && !policy_flags.contains(PolicyFlags::DISABLE_KEY_REPEAT);

            if arms_repeat {
                let previous = self
                    .key_repeat
                    .last_key
                    .as_ref()
                    .filter(|(last, _)| last.key_code == key.key_code)
                    .map(|(last, _)| last.repeat_count);
                self.reset_key_repeat();
                match previous {
                    // Two identical DOWNs in a row: the device driver repeats
                    // the key itself, so do not synthesize our own.
                    Some(previous_count) => key.repeat_count = previous_count + 1,
                    None => {
                        self.key_repeat.next_repeat_time = event_time
                            .saturating_add(duration_to_nanos(self.settings.key_repeat_timeout));
                    }
                }
                self.key_repeat.last_key = Some((key.clone(), policy_flags));
            } else if !key.synthetic_repeat {
                self.reset_key_repeat();
            }

            if key.repeat_count == 1 {
                key.flags.insert(KeyFlags::LONG_PRESS);
            } else {
                key.flags.remove(KeyFlags::LONG_PRESS);
            }
            entry.dispatch_in_progress = true;
            debug!("dispatchKey - {}", entry);
        }

        let focused = self.focused;
        let Some(key) = entry.key_mut() else {
            return Outcome::Done;
        };

        if key.intercept_result == InterceptKeyResult::TryAgainLater {
            if now < key.intercept_wakeup_time {
                *next_wakeup = (*next_wakeup).min(key.intercept_wakeup_time);
                return Outcome::Retry;
            }
            key.intercept_result = InterceptKeyResult::Unknown;
            key.intercept_wakeup_time = 0;
        }

        match key.intercept_result {
            InterceptKeyResult::Unknown => {
                if policy_flags.contains(PolicyFlags::PASS_TO_USER) {
                    self.commands.push_back(Command::InterceptKeyBeforeDispatching {
                        event_id,
                        focused,
                        event: to_key_event(key, event_time),
                        policy_flags,
                    });
                    return Outcome::Retry;
                }
                key.intercept_result = InterceptKeyResult::Continue;
            }
            InterceptKeyResult::Skip => {
                if drop_reason.is_none() {
                    *drop_reason = Some(DropReason::Policy);
                }
            }
            InterceptKeyResult::Continue | InterceptKeyResult::TryAgainLater => {}
        }

        if drop_reason.is_some() {
            return Outcome::Done;
        }

        match self.find_focused_targets(now, entry, next_wakeup) {
            TargetSearch::Pending => Outcome::Retry,
            TargetSearch::Failed => Outcome::Done,
            TargetSearch::Ready(mut targets) => {
                self.add_monitoring_targets(&mut targets);
                Outcome::Deliver(targets)
            }
        }
    }

    fn dispatch_motion(
        &mut self,
        now: Nanos,
        entry: &mut EventEntry,
        drop_reason: Option<DropReason>,
        next_wakeup: &mut Nanos,
    ) -> Outcome {
        if !entry.dispatch_in_progress {
            entry.dispatch_in_progress = true;
            debug!("dispatchMotion - {}", entry);
        }

        if drop_reason.is_some() {
            return Outcome::Done;
        }

        match self.find_motion_targets(now, entry, next_wakeup) {
            TargetSearch::Pending => Outcome::Retry,
            TargetSearch::Failed => {
                if entry.is_pointer_event() {
                    let options = CancelationOptions::new(
                        CancelationMode::PointerEvents,
                        "input event targeting timed out",
                    );
                    self.synthesize_cancelation_events_for_monitors(&options);
                }
                Outcome::Done
            }
            TargetSearch::Ready(mut targets) => {
                self.add_monitoring_targets(&mut targets);
                Outcome::Deliver(targets)
            }
        }
    }

    // ── Targeting ─────────────────────────────────────────────────────────────

    fn find_focused_targets(
        &mut self,
        now: Nanos,
        entry: &EventEntry,
        next_wakeup: &mut Nanos,
    ) -> TargetSearch {
        let Some(focused) = self.focused else {
            debug!("no focused channel, delivering key to monitors only");
            return TargetSearch::Ready(Vec::new());
        };

        if let Some((cause, reason)) = self.check_target_ready(now, entry, focused) {
            return self.handle_targets_not_ready(now, entry, cause, Some(focused), &reason, next_wakeup);
        }
        TargetSearch::Ready(vec![InputTarget::foreground(focused)])
    }

    fn find_motion_targets(
        &mut self,
        now: Nanos,
        entry: &EventEntry,
        next_wakeup: &mut Nanos,
    ) -> TargetSearch {
        let Some(motion) = entry.motion() else {
            return TargetSearch::Failed;
        };

        for target in motion.targets.iter().filter(|target| target.is_foreground()) {
            // Unknown channels are skipped at delivery, not waited on.
            if !self.connections.contains_key(&target.channel_id) {
                continue;
            }
            if let Some((cause, reason)) = self.check_target_ready(now, entry, target.channel_id) {
                return self.handle_targets_not_ready(
                    now,
                    entry,
                    cause,
                    Some(target.channel_id),
                    &reason,
                    next_wakeup,
                );
            }
        }
        TargetSearch::Ready(motion.targets.clone())
    }

    /// Returns why `channel_id` cannot take `entry` yet, or `None` if it can.
    fn check_target_ready(
        &self,
        now: Nanos,
        entry: &EventEntry,
        channel_id: ChannelId,
    ) -> Option<(WaitCause, String)> {
        let Some(connection) = self.connections.get(&channel_id) else {
            return Some((
                WaitCause::SystemNotReady,
                format!("Waiting because input channel {} is not registered.", channel_id),
            ));
        };

        if connection.status != ConnectionStatus::Normal {
            return Some((
                WaitCause::ApplicationNotReady,
                format!(
                    "Waiting because the '{}' input channel is {}.",
                    connection.name(),
                    connection.status
                ),
            ));
        }

        if connection.publisher_blocked {
            return Some((
                WaitCause::ApplicationNotReady,
                format!(
                    "Waiting because the '{}' input channel is full.",
                    connection.name()
                ),
            ));
        }

        if entry.key().is_some() {
            // Keys may change focus, so they wait until everything sent
            // before them has been processed.
            if !connection.outbound.is_empty() || !connection.wait.is_empty() {
                return Some((
                    WaitCause::ApplicationNotReady,
                    format!(
                        "Waiting to send key event because the '{}' input channel has not \
                         finished processing all of the input events that were previously \
                         delivered to it.  Outbound queue length: {}.  Wait queue length: {}.",
                        connection.name(),
                        connection.outbound.len(),
                        connection.wait.len()
                    ),
                ));
            }
        } else if let Some(oldest) = connection.oldest_delivery_time() {
            let stream_ahead = duration_to_nanos(self.settings.stream_ahead_timeout);
            if now >= oldest.saturating_add(stream_ahead) {
                return Some((
                    WaitCause::ApplicationNotReady,
                    format!(
                        "Waiting to send non-key event because the '{}' input channel has not \
                         finished processing certain input events that were delivered to it \
                         over {:.1}ms ago.  Wait queue length: {}.  Wait queue head age: {:.1}ms.",
                        connection.name(),
                        millis(stream_ahead),
                        connection.wait.len(),
                        millis(now - oldest)
                    ),
                ));
            }
        }
        None
    }

    fn handle_targets_not_ready(
        &mut self,
        now: Nanos,
        entry: &EventEntry,
        cause: WaitCause,
        target: Option<ChannelId>,
        reason: &str,
        next_wakeup: &mut Nanos,
    ) -> TargetSearch {
        if self.wait.cause != cause || self.wait.target != target {
            debug!("waiting for {:?} ({:?}): {}", target, cause, reason);
            self.wait = TargetWait {
                cause,
                start_time: now,
                timeout_time: now
                    .saturating_add(duration_to_nanos(self.settings.dispatching_timeout)),
                expired: false,
                target,
            };
        }

        if self.wait.expired {
            return TargetSearch::Failed;
        }

        if now >= self.wait.timeout_time {
            self.on_anr(now, entry, target, reason);
            *next_wakeup = Nanos::MIN;
        } else if self.wait.timeout_time < *next_wakeup {
            *next_wakeup = self.wait.timeout_time;
        }
        TargetSearch::Pending
    }

    fn on_anr(&mut self, now: Nanos, entry: &EventEntry, target: Option<ChannelId>, reason: &str) {
        let name = target
            .and_then(|id| self.connections.get(&id))
            .map_or("<unknown>", |connection| connection.name());
        error!(
            "application is not responding: {}.  It has been {:.1}ms since event, \
             {:.1}ms since wait started.  Reason: {}",
            name,
            millis(now.saturating_sub(entry.event_time)),
            millis(now.saturating_sub(self.wait.start_time)),
            reason
        );
        self.commands.push_back(Command::NotifyAnr {
            channel_id: target,
            reason: reason.to_owned(),
        });
    }

    pub(super) fn reset_anr_timeouts(&mut self) {
        self.wait = TargetWait::default();
    }

    /// Applies the policy's answer to an ANR: a positive extension keeps
    /// waiting, anything else abandons the wait and cancels what the
    /// unresponsive connection holds.
    pub(super) fn resume_after_targets_not_ready_timeout(
        &mut self,
        extension: Option<std::time::Duration>,
        channel_id: Option<ChannelId>,
    ) {
        let now = self.now();
        match extension.filter(|extension| !extension.is_zero()) {
            Some(extension) => {
                info!("extending wait for {:?} by {:?}", channel_id, extension);
                self.wait.timeout_time = now.saturating_add(duration_to_nanos(extension));
            }
            None => {
                self.wait.expired = true;
                // Its input state will no longer be realistic.
                let normal = channel_id
                    .and_then(|id| self.connections.get(&id))
                    .is_some_and(|connection| connection.status == ConnectionStatus::Normal);
                if let (true, Some(id)) = (normal, channel_id) {
                    let options = CancelationOptions::new(
                        CancelationMode::All,
                        "application not responding",
                    );
                    self.synthesize_cancelation_events_for_connection(id, &options);
                }
            }
        }
    }

    /// Appends every monitor that is not already a target of the event.
    fn add_monitoring_targets(&self, targets: &mut Vec<InputTarget>) {
        for &id in &self.monitors {
            if !targets.iter().any(|target| target.channel_id == id) {
                targets.push(InputTarget::monitor(id));
            }
        }
    }

    fn dispatch_event_to_targets(&mut self, now: Nanos, event: Arc<EventEntry>, targets: &[InputTarget]) {
        debug!("dispatchEventToTargets - {} targets", targets.len());
        self.poke_user_activity(&event);

        for target in targets {
            if self.connections.contains_key(&target.channel_id) {
                self.prepare_dispatch_cycle(now, target.channel_id, &event, target);
            } else {
                debug!(
                    "dropping event delivery to target {} because it is no longer registered",
                    target.channel_id
                );
            }
        }
    }

    fn poke_user_activity(&mut self, entry: &EventEntry) {
        let activity = match &entry.kind {
            EventKind::Key(key) => {
                if key.flags.contains(KeyFlags::CANCELED) {
                    return;
                }
                UserActivity::Button
            }
            EventKind::Motion(motion) => {
                if motion_action::masked(motion.action) == motion_action::CANCEL {
                    return;
                }
                if motion.is_pointer_event() {
                    UserActivity::Touch
                } else {
                    UserActivity::Other
                }
            }
            EventKind::DeviceReset(_) => return,
        };
        self.commands.push_back(Command::PokeUserActivity {
            event_time: entry.event_time,
            activity,
        });
    }

    // ── Dropping and releasing ────────────────────────────────────────────────

    fn drop_inbound_event(&mut self, entry: &EventEntry, reason: DropReason) {
        let message = reason.cancelation_reason();
        if reason == DropReason::Policy {
            debug!("dropped event: {}", message);
        } else {
            info!("dropped event: {}", message);
        }

        let mode = match &entry.kind {
            EventKind::Key(_) => CancelationMode::NonPointerEvents,
            EventKind::Motion(motion) if motion.is_pointer_event() => {
                CancelationMode::PointerEvents
            }
            EventKind::Motion(_) => CancelationMode::NonPointerEvents,
            EventKind::DeviceReset(_) => return,
        };
        self.synthesize_cancelation_events_for_all_connections(&CancelationOptions::new(
            mode, message,
        ));
    }

    fn release_pending_event(&mut self, event_id: u64) {
        self.reset_anr_timeouts();
        self.release_inbound_event(event_id);
    }

    fn release_inbound_event(&mut self, event_id: u64) {
        if self.next_unblocked_event == Some(event_id) {
            self.next_unblocked_event = None;
        }
    }

    fn drain_inbound_queue(&mut self) {
        while let Some(entry) = self.inbound.pop_front() {
            self.release_inbound_event(entry.id);
        }
    }

    /// Cancels everything live on every connection and forgets all queued
    /// input.
    pub(super) fn reset_and_drop_everything(&mut self, reason: &'static str) {
        debug!("resetting and dropping all events ({})", reason);

        let options = CancelationOptions::new(CancelationMode::All, reason);
        self.synthesize_cancelation_events_for_all_connections(&options);

        self.reset_key_repeat();
        if let Some(pending) = self.pending.take() {
            self.release_pending_event(pending.id);
        }
        self.drain_inbound_queue();
        self.reset_anr_timeouts();
    }
}
