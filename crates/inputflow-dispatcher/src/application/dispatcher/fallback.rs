//! Completing a dispatch cycle, including fallback key substitution.
//!
//! # Fallback keys (for beginners)
//!
//! When a foreground client does not handle a key, the policy may supply a
//! different key to deliver instead (for example a dedicated media key that
//! an application ignores becomes something it understands).  The choice is
//! latched on the initial DOWN in the connection's fallback map and can only
//! be withdrawn afterwards, never changed:
//!
//! ```text
//!  DOWN unhandled ─► policy picks F ─► latch original → F ─► redeliver as F
//!  UP unhandled   ─► policy still says F ─► redeliver as F, forget latch
//!  handled later  ─► cancel the delivered F
//! ```
//!
//! A substituted entry carries [`KeyFlags::FALLBACK`] and is never
//! post-processed again, so substitution is one level deep.

use std::sync::Arc;

use inputflow_core::domain::codes::key_action;
use inputflow_core::keymap::keycodes;
use inputflow_core::{
    CancelationMode, CancelationOptions, ChannelId, EventEntry, EventKind, KeyEntry, KeyEvent,
    KeyFlags, Nanos, PolicyFlags,
};
use tracing::{debug, info};

use super::publish::to_key_event;
use super::{millis, ConnectionStatus, DispatcherState, InputDispatcher};
use crate::application::time::duration_to_nanos;

/// What the policy must be asked about an acknowledged key.
#[derive(Debug)]
enum UnhandledKey {
    /// The original key was handled, or its target is no longer foreground,
    /// after a fallback had been latched.
    Handled {
        event: KeyEvent,
        policy_flags: PolicyFlags,
        original_key_code: i32,
        fallback_key_code: i32,
    },
    /// The original key was not handled.
    Unhandled {
        event: KeyEvent,
        policy_flags: PolicyFlags,
        original_key_code: i32,
        latched: Option<i32>,
        initial_down: bool,
    },
}

impl UnhandledKey {
    fn event(&self) -> &KeyEvent {
        match self {
            UnhandledKey::Handled { event, .. } | UnhandledKey::Unhandled { event, .. } => event,
        }
    }

    fn policy_flags(&self) -> PolicyFlags {
        match self {
            UnhandledKey::Handled { policy_flags, .. }
            | UnhandledKey::Unhandled { policy_flags, .. } => *policy_flags,
        }
    }
}

enum Completion {
    /// The entry is no longer waiting; nothing to do.
    Missing,
    Ready,
    AskPolicy(UnhandledKey),
}

impl InputDispatcher {
    /// Runs post-processing for the entry acknowledged under `seq`, then
    /// releases or redelivers it and resumes the connection's cycle.
    pub(super) fn complete_dispatch_cycle(
        &self,
        channel_id: ChannelId,
        seq: u32,
        handled: bool,
        finish_time: Nanos,
    ) {
        let completion = self
            .lock()
            .prepare_completion(channel_id, seq, handled, finish_time);

        match completion {
            // An unknown sequence still unblocks the publisher, so the cycle
            // must resume either way.
            Completion::Missing | Completion::Ready => {
                self.lock().finish_completed_entry(channel_id, seq, None);
            }
            Completion::AskPolicy(query) => {
                let answer =
                    self.policy
                        .dispatch_unhandled_key(channel_id, query.event(), query.policy_flags());
                let mut state = self.lock();
                let restart = state.apply_unhandled_key(channel_id, query, answer);
                // Held through the requeue so the wait queue cannot change
                // in between.
                state.finish_completed_entry(channel_id, seq, restart);
            }
        }
    }
}

impl DispatcherState {
    fn prepare_completion(
        &mut self,
        channel_id: ChannelId,
        seq: u32,
        handled: bool,
        finish_time: Nanos,
    ) -> Completion {
        let slow_event_warning = duration_to_nanos(self.settings.slow_event_warning);
        let Some(connection) = self.connections.get_mut(&channel_id) else {
            return Completion::Missing;
        };
        let Some(entry) = connection.find_wait_entry(seq) else {
            return Completion::Missing;
        };

        let duration = finish_time.saturating_sub(entry.delivery_time);
        if duration > slow_event_warning {
            info!(
                "channel '{}' spent {:.1}ms processing the last input event: {}",
                connection.name(),
                millis(duration),
                entry.event
            );
        }

        let Some(key) = entry.event.key() else {
            return Completion::Ready;
        };
        if key.flags.contains(KeyFlags::FALLBACK) {
            return Completion::Ready;
        }

        let foreground = entry.has_foreground_target();
        let policy_flags = entry.event.policy_flags;
        let original_key_code = key.key_code;
        let action = key.action;
        let initial_down = action == key_action::DOWN && key.repeat_count == 0;
        let mut event = to_key_event(key, entry.event.event_time);
        event.repeat_count = 0;

        let latched = connection.input_state.fallback_key(original_key_code);
        if action == key_action::UP {
            connection.input_state.remove_fallback_key(original_key_code);
        }

        if handled || !foreground {
            return match latched {
                Some(fallback_key_code) => {
                    debug!(
                        "unhandled key event: asking policy to cancel fallback action, keyCode={}",
                        original_key_code
                    );
                    event.flags |= KeyFlags::CANCELED;
                    Completion::AskPolicy(UnhandledKey::Handled {
                        event,
                        policy_flags,
                        original_key_code,
                        fallback_key_code,
                    })
                }
                None => Completion::Ready,
            };
        }

        if latched.is_none() && !initial_down {
            debug!(
                "unhandled key event: skipping unhandled key event processing since this is \
                 not an initial down, keyCode={}, action={}",
                original_key_code,
                key_action::label(action)
            );
            return Completion::Ready;
        }

        debug!(
            "unhandled key event: asking policy to perform fallback action, keyCode={}",
            original_key_code
        );
        Completion::AskPolicy(UnhandledKey::Unhandled {
            event,
            policy_flags,
            original_key_code,
            latched,
            initial_down,
        })
    }

    /// Applies the policy's answer.  Returns the key to redeliver in place of
    /// the original, if any.
    fn apply_unhandled_key(
        &mut self,
        channel_id: ChannelId,
        query: UnhandledKey,
        answer: Option<KeyEvent>,
    ) -> Option<KeyEvent> {
        match query {
            UnhandledKey::Handled {
                original_key_code,
                fallback_key_code,
                ..
            } => {
                if fallback_key_code != keycodes::UNKNOWN {
                    let options = CancelationOptions::new(
                        CancelationMode::FallbackEvents,
                        "application handled the original non-fallback key or is no longer a \
                         foreground target, canceling previously dispatched fallback key",
                    )
                    .for_key_code(fallback_key_code);
                    self.synthesize_cancelation_events_for_connection(channel_id, &options);
                }
                if let Some(connection) = self.connections.get_mut(&channel_id) {
                    connection.input_state.remove_fallback_key(original_key_code);
                }
                None
            }
            UnhandledKey::Unhandled {
                event,
                original_key_code,
                latched,
                initial_down,
                ..
            } => {
                let connection = self.connections.get_mut(&channel_id)?;
                if connection.status != ConnectionStatus::Normal {
                    connection.input_state.remove_fallback_key(original_key_code);
                    return None;
                }

                // The fallback is latched on the initial DOWN and cannot
                // change afterwards.
                let mut fallback_key_code = latched.unwrap_or(keycodes::UNKNOWN);
                if initial_down {
                    fallback_key_code = answer
                        .as_ref()
                        .map_or(keycodes::UNKNOWN, |fallback| fallback.key_code);
                    connection
                        .input_state
                        .set_fallback_key(original_key_code, fallback_key_code);
                }

                let mut answer = answer;
                let withdrawn = answer
                    .as_ref()
                    .map_or(true, |fallback| fallback.key_code != fallback_key_code);
                if fallback_key_code != keycodes::UNKNOWN && withdrawn {
                    match &answer {
                        Some(fallback) => debug!(
                            "unhandled key event: policy requested to send key {} as a fallback \
                             for {}, but on the DOWN it had requested to send {} instead, \
                             fallback canceled",
                            fallback.key_code, original_key_code, fallback_key_code
                        ),
                        None => debug!(
                            "unhandled key event: policy did not request fallback for {}, but on \
                             the DOWN it had requested to send {}, fallback canceled",
                            original_key_code, fallback_key_code
                        ),
                    }

                    let options = CancelationOptions::new(
                        CancelationMode::FallbackEvents,
                        "canceling fallback, policy no longer desires it",
                    )
                    .for_key_code(fallback_key_code);
                    self.synthesize_cancelation_events_for_connection(channel_id, &options);

                    answer = None;
                    fallback_key_code = keycodes::UNKNOWN;
                    if event.action != key_action::UP {
                        if let Some(connection) = self.connections.get_mut(&channel_id) {
                            connection
                                .input_state
                                .set_fallback_key(original_key_code, fallback_key_code);
                        }
                    }
                }

                match answer {
                    Some(fallback) if fallback_key_code != keycodes::UNKNOWN => {
                        debug!(
                            "unhandled key event: dispatching fallback key, originalKeyCode={}, \
                             fallbackKeyCode={}, fallbackMetaState=0x{:08x}",
                            original_key_code, fallback_key_code, fallback.meta_state
                        );
                        Some(KeyEvent {
                            key_code: fallback_key_code,
                            ..fallback
                        })
                    }
                    _ => {
                        debug!("unhandled key event: no fallback key");
                        None
                    }
                }
            }
        }
    }

    /// Takes the acknowledged entry off the wait queue, either releasing it
    /// or putting it back at the head of the outbound queue as `restart`.
    fn finish_completed_entry(
        &mut self,
        channel_id: ChannelId,
        seq: u32,
        restart: Option<KeyEvent>,
    ) {
        let now = self.now();
        let Some(connection) = self.connections.get_mut(&channel_id) else {
            return;
        };

        // The wait queue may have been drained while the lock was released.
        if let Some(mut entry) = connection.remove_wait_entry(seq) {
            match restart {
                Some(fallback) if connection.status == ConnectionStatus::Normal => {
                    let flags = KeyFlags(fallback.flags | KeyFlags::FALLBACK);
                    let substituted = EventEntry::new(
                        fallback.event_time,
                        entry.event.policy_flags,
                        EventKind::Key(KeyEntry {
                            device_id: fallback.device_id,
                            source: fallback.source,
                            action: entry.resolved_action,
                            flags,
                            key_code: fallback.key_code,
                            scan_code: fallback.scan_code,
                            meta_state: fallback.meta_state,
                            repeat_count: fallback.repeat_count,
                            down_time: fallback.down_time,
                            synthetic_repeat: false,
                            intercept_result: Default::default(),
                            intercept_wakeup_time: 0,
                        }),
                    );
                    connection
                        .input_state
                        .track(&substituted, entry.resolved_action, flags.0);

                    entry.event = Arc::new(substituted);
                    entry.resolved_flags = flags.0;
                    connection.outbound.push_front(entry);
                }
                _ => drop(entry),
            }
        }

        self.start_dispatch_cycle(now, channel_id);
    }
}
