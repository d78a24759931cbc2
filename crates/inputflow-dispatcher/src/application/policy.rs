//! The external policy the dispatcher consults.
//!
//! The dispatcher decides *how* events travel; the policy decides *whether*
//! they should and what they mean.  It is called at a handful of fixed points:
//!
//! | Hook                               | When                                   | Lock held? |
//! |------------------------------------|----------------------------------------|------------|
//! | `intercept_key_before_queueing`    | admission, before the inbound queue    | no         |
//! | `intercept_motion_before_queueing` | admission, before the inbound queue    | no         |
//! | `intercept_key_before_dispatching` | deferred command, before targeting     | no         |
//! | `dispatch_unhandled_key`           | deferred command, after a client ack   | no         |
//! | `notify_anr`                       | deferred command, wait deadline passed | no         |
//! | `notify_input_channel_broken`      | deferred command                       | no         |
//! | `poke_user_activity`               | deferred command                       | no         |
//!
//! The dispatcher never holds its own lock while calling any of these, so an
//! implementation may call back into the dispatcher freely.

use std::time::Duration;

use inputflow_core::{ChannelId, KeyEvent, Nanos, PolicyFlags};

/// Verdict of [`DispatcherPolicy::intercept_key_before_dispatching`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInterception {
    /// Deliver the key to the application.
    Continue,
    /// The policy consumed the key; drop it.
    Skip,
    /// Hold the key and ask again after the delay.
    TryAgainLater(Duration),
}

/// Kind of user activity an event represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserActivity {
    Other,
    Button,
    Touch,
}

/// Hooks through which an embedder customises dispatch.
///
/// Every method has a pass-through default, so an implementation only
/// overrides what it cares about.
#[cfg_attr(test, mockall::automock)]
pub trait DispatcherPolicy: Send + Sync {
    /// Called for each admitted key before it is queued.  Setting
    /// [`PolicyFlags::PASS_TO_USER`] lets the key reach applications.
    fn intercept_key_before_queueing(&self, _event: &KeyEvent, policy_flags: &mut PolicyFlags) {
        policy_flags.insert(PolicyFlags::PASS_TO_USER);
    }

    /// Called for each admitted motion before it is queued.
    fn intercept_motion_before_queueing(&self, _event_time: Nanos, policy_flags: &mut PolicyFlags) {
        policy_flags.insert(PolicyFlags::PASS_TO_USER);
    }

    /// Gives the policy a chance to consume a key before it reaches the
    /// focused channel.
    fn intercept_key_before_dispatching(
        &self,
        _focused: Option<ChannelId>,
        _event: &KeyEvent,
        _policy_flags: PolicyFlags,
    ) -> KeyInterception {
        KeyInterception::Continue
    }

    /// Called when a foreground client did not handle a key.  Returning a key
    /// event makes the dispatcher deliver it as a fallback.
    fn dispatch_unhandled_key(
        &self,
        _channel_id: ChannelId,
        _event: &KeyEvent,
        _policy_flags: PolicyFlags,
    ) -> Option<KeyEvent> {
        None
    }

    /// The target has not become ready within the dispatching timeout.
    ///
    /// Returning a non-zero duration keeps waiting that much longer; returning
    /// `None` or zero abandons the pending event.
    fn notify_anr(&self, _channel_id: Option<ChannelId>, _reason: &str) -> Option<Duration> {
        None
    }

    /// A channel broke and was taken out of service.
    fn notify_input_channel_broken(&self, _channel_id: ChannelId) {}

    fn poke_user_activity(&self, _event_time: Nanos, _activity: UserActivity) {}
}

/// A policy that lets every event through and never substitutes keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughPolicy;

impl DispatcherPolicy for PassThroughPolicy {}
