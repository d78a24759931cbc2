//! Deferred commands: work that must call the policy and therefore cannot run
//! under the dispatcher lock.
//!
//! Dispatch code appends a [`Command`] while locked.  [`InputDispatcher::run_commands`]
//! later pops them one at a time, releases the lock, makes the policy call,
//! and re-locks to apply the answer.  Anything may have changed while the lock
//! was released, so every apply step re-checks the state it depends on.

use std::time::Duration;

use inputflow_core::domain::event::InterceptKeyResult;
use inputflow_core::{ChannelId, KeyEvent, Nanos, PolicyFlags};
use tracing::debug;

use super::InputDispatcher;
use crate::application::policy::{KeyInterception, UserActivity};
use crate::application::time::duration_to_nanos;

#[derive(Debug)]
pub(crate) enum Command {
    /// Ask the policy whether the pending key should reach the application.
    InterceptKeyBeforeDispatching {
        event_id: u64,
        focused: Option<ChannelId>,
        event: KeyEvent,
        policy_flags: PolicyFlags,
    },
    /// A client acknowledged an entry; run fallback post-processing and
    /// resume its publish cycle.
    DispatchCycleFinished {
        channel_id: ChannelId,
        seq: u32,
        handled: bool,
        finish_time: Nanos,
    },
    NotifyInputChannelBroken {
        channel_id: ChannelId,
    },
    NotifyAnr {
        channel_id: Option<ChannelId>,
        reason: String,
    },
    PokeUserActivity {
        event_time: Nanos,
        activity: UserActivity,
    },
}

impl InputDispatcher {
    /// Drains the command queue.  Returns `true` if any command ran.
    pub(crate) fn run_commands(&self) -> bool {
        let mut ran_any = false;
        loop {
            // The guard is dropped at the end of this statement.
            let next = self.lock().commands.pop_front();
            let Some(command) = next else {
                return ran_any;
            };
            ran_any = true;
            self.run_command(command);
        }
    }

    fn run_command(&self, command: Command) {
        match command {
            Command::InterceptKeyBeforeDispatching {
                event_id,
                focused,
                event,
                policy_flags,
            } => {
                let verdict =
                    self.policy
                        .intercept_key_before_dispatching(focused, &event, policy_flags);
                self.apply_key_interception(event_id, verdict);
            }
            Command::DispatchCycleFinished {
                channel_id,
                seq,
                handled,
                finish_time,
            } => {
                self.complete_dispatch_cycle(channel_id, seq, handled, finish_time);
            }
            Command::NotifyInputChannelBroken { channel_id } => {
                self.policy.notify_input_channel_broken(channel_id);
            }
            Command::NotifyAnr { channel_id, reason } => {
                let extension = self.policy.notify_anr(channel_id, &reason);
                self.lock()
                    .resume_after_targets_not_ready_timeout(extension, channel_id);
            }
            Command::PokeUserActivity {
                event_time,
                activity,
            } => {
                self.policy.poke_user_activity(event_time, activity);
            }
        }
    }

    fn apply_key_interception(&self, event_id: u64, verdict: KeyInterception) {
        let mut state = self.lock();
        let now = state.now();

        // The pending event may have been dropped while the policy was
        // deciding; the verdict then has nothing to apply to.
        let Some(key) = state
            .pending
            .as_mut()
            .filter(|pending| pending.id == event_id)
            .and_then(|pending| pending.key_mut())
        else {
            debug!("discarding interception verdict for event {} that is no longer pending", event_id);
            return;
        };

        match verdict {
            KeyInterception::Continue => key.intercept_result = InterceptKeyResult::Continue,
            KeyInterception::Skip => key.intercept_result = InterceptKeyResult::Skip,
            KeyInterception::TryAgainLater(delay) if delay == Duration::ZERO => {
                key.intercept_result = InterceptKeyResult::Continue;
            }
            KeyInterception::TryAgainLater(delay) => {
                key.intercept_result = InterceptKeyResult::TryAgainLater;
                key.intercept_wakeup_time = now.saturating_add(duration_to_nanos(delay));
            }
        }
    }
}
