//! Admission: validating raw input and placing it on the inbound queue.
//!
//! Admission never fails loudly.  A structurally invalid event is logged and
//! forgotten; a valid one is normalised, shown to the policy (outside the
//! lock) and queued.  The dispatch thread is woken only when it might be idle.

use inputflow_core::domain::codes::{key_action, meta, motion_action, source};
use inputflow_core::domain::event::DeviceResetEntry;
use inputflow_core::domain::validation::{validate_key_event, validate_motion_event};
use inputflow_core::keymap::is_app_switch_key_code;
use inputflow_core::{
    EventEntry, EventKind, InputTarget, KeyEntry, KeyEvent, KeyFlags, MotionEntry,
    NotifyDeviceResetArgs, NotifyKeyArgs, NotifyMotionArgs, PolicyFlags,
};
use tracing::{debug, warn};

use super::{DispatcherState, InputDispatcher, WaitCause};
use crate::application::time::duration_to_nanos;

impl InputDispatcher {
    /// Admits a key occurrence.
    pub fn notify_key(&self, args: &NotifyKeyArgs) {
        debug!(
            "notifyKey - eventTime={}, deviceId={}, source=0x{:x}, policyFlags={}, action={}, \
             flags={}, keyCode={}, scanCode={}, metaState=0x{:x}, downTime={}",
            args.event_time,
            args.device_id,
            args.source,
            args.policy_flags,
            key_action::label(args.action),
            args.flags,
            args.key_code,
            args.scan_code,
            args.meta_state,
            args.down_time
        );
        if let Err(err) = validate_key_event(args) {
            warn!("rejected key event: {}", err);
            return;
        }

        let (mut policy_flags, flags, meta_state) =
            normalize_key_flags(args.policy_flags, args.flags, args.meta_state);
        policy_flags.insert(PolicyFlags::TRUSTED);

        let event = KeyEvent {
            device_id: args.device_id,
            source: args.source,
            action: args.action,
            flags: flags.0,
            key_code: args.key_code,
            scan_code: args.scan_code,
            meta_state,
            repeat_count: 0,
            down_time: args.down_time,
            event_time: args.event_time,
        };
        self.policy
            .intercept_key_before_queueing(&event, &mut policy_flags);

        let entry = EventEntry::new(
            args.event_time,
            policy_flags,
            EventKind::Key(KeyEntry {
                device_id: args.device_id,
                source: args.source,
                action: args.action,
                flags,
                key_code: args.key_code,
                scan_code: args.scan_code,
                meta_state,
                repeat_count: 0,
                down_time: args.down_time,
                synthetic_repeat: false,
                intercept_result: Default::default(),
                intercept_wakeup_time: 0,
            }),
        );

        let needs_wake = self.lock().enqueue_inbound_event(entry);
        if needs_wake {
            self.poller.wake();
        }
    }

    /// Admits a motion occurrence together with its pre-resolved targets.
    pub fn notify_motion(&self, args: &NotifyMotionArgs, targets: &[InputTarget]) {
        debug!(
            "notifyMotion - eventTime={}, deviceId={}, source=0x{:x}, policyFlags={}, action={}, \
             flags={}, metaState=0x{:x}, buttonState=0x{:x}, edgeFlags=0x{:x}, pointerCount={}, \
             targets={}",
            args.event_time,
            args.device_id,
            args.source,
            args.policy_flags,
            motion_action::label(args.action),
            args.flags,
            args.meta_state,
            args.button_state,
            args.edge_flags,
            args.pointer_properties.len(),
            targets.len()
        );
        if let Err(err) = validate_motion_event(args) {
            warn!("rejected motion event: {}", err);
            return;
        }

        let mut policy_flags = args.policy_flags;
        policy_flags.insert(PolicyFlags::TRUSTED);
        self.policy
            .intercept_motion_before_queueing(args.event_time, &mut policy_flags);

        let entry = EventEntry::new(
            args.event_time,
            policy_flags,
            EventKind::Motion(MotionEntry {
                device_id: args.device_id,
                source: args.source,
                action: args.action,
                flags: args.flags,
                meta_state: args.meta_state,
                button_state: args.button_state,
                edge_flags: args.edge_flags,
                x_precision: args.x_precision,
                y_precision: args.y_precision,
                down_time: args.down_time,
                pointer_properties: args.pointer_properties.clone(),
                pointer_coords: args.pointer_coords.clone(),
                targets: targets.to_vec(),
            }),
        );

        let needs_wake = self.lock().enqueue_inbound_event(entry);
        if needs_wake {
            self.poller.wake();
        }
    }

    /// Admits a device reset.  Everything live from that device will be
    /// cancelled when the reset is dispatched.
    pub fn notify_device_reset(&self, args: &NotifyDeviceResetArgs) {
        debug!(
            "notifyDeviceReset - eventTime={}, deviceId={}",
            args.event_time, args.device_id
        );

        let entry = EventEntry::new(
            args.event_time,
            PolicyFlags::default(),
            EventKind::DeviceReset(DeviceResetEntry {
                device_id: args.device_id,
            }),
        );

        let needs_wake = self.lock().enqueue_inbound_event(entry);
        if needs_wake {
            self.poller.wake();
        }
    }
}

/// Folds modifier policy bits into the meta state and keeps the two virtual
/// key markers in agreement.
fn normalize_key_flags(
    mut policy_flags: PolicyFlags,
    mut flags: KeyFlags,
    mut meta_state: i32,
) -> (PolicyFlags, KeyFlags, i32) {
    if policy_flags.contains(PolicyFlags::VIRTUAL) || flags.contains(KeyFlags::VIRTUAL_HARD_KEY) {
        policy_flags.insert(PolicyFlags::VIRTUAL);
        flags.insert(KeyFlags::VIRTUAL_HARD_KEY);
    }
    if policy_flags.contains(PolicyFlags::ALT) {
        meta_state |= meta::ALT_ON | meta::ALT_LEFT_ON;
    }
    if policy_flags.contains(PolicyFlags::ALT_GR) {
        meta_state |= meta::ALT_ON | meta::ALT_RIGHT_ON;
    }
    if policy_flags.contains(PolicyFlags::SHIFT) {
        meta_state |= meta::SHIFT_ON | meta::SHIFT_LEFT_ON;
    }
    if policy_flags.contains(PolicyFlags::CAPS_LOCK) {
        meta_state |= meta::CAPS_LOCK_ON;
    }
    if policy_flags.contains(PolicyFlags::FUNCTION) {
        meta_state |= meta::FUNCTION_ON;
    }
    (policy_flags, flags, meta_state)
}

/// A trusted, user-visible, uncanceled press of HOME or ENDCALL.
pub(super) fn is_app_switch_key_event(entry: &EventEntry) -> bool {
    let Some(key) = entry.key() else {
        return false;
    };
    !key.flags.contains(KeyFlags::CANCELED)
        && is_app_switch_key_code(key.key_code)
        && entry
            .policy_flags
            .contains(PolicyFlags::TRUSTED | PolicyFlags::PASS_TO_USER)
}

impl DispatcherState {
    /// Appends `entry` to the inbound queue.  Returns `true` if the dispatch
    /// thread must be woken.
    pub(super) fn enqueue_inbound_event(&mut self, entry: EventEntry) -> bool {
        let mut needs_wake = self.inbound.is_empty();
        self.report.received_event(&entry);

        match &entry.kind {
            EventKind::Key(key) => {
                // Watch for a complete press of an app switch key so that
                // anything queued in front of the switch can be pruned.
                if is_app_switch_key_event(&entry) {
                    if key.action == key_action::DOWN {
                        self.app_switch_saw_key_down = true;
                    } else if key.action == key_action::UP && self.app_switch_saw_key_down {
                        self.app_switch_due_time = entry
                            .event_time
                            .saturating_add(duration_to_nanos(self.settings.app_switch_timeout));
                        self.app_switch_saw_key_down = false;
                        debug!("app switch is pending, due at {}", self.app_switch_due_time);
                        needs_wake = true;
                    }
                }
            }
            EventKind::Motion(motion) => {
                // The user touched a different target while the current one
                // is unresponsive: start pruning the queue up to this event.
                let pointer_down = motion_action::masked(motion.action) == motion_action::DOWN
                    && motion.source & source::CLASS_POINTER != 0;
                if pointer_down && self.wait.cause == WaitCause::ApplicationNotReady {
                    let touched = motion
                        .targets
                        .iter()
                        .find(|target| target.is_foreground())
                        .map(|target| target.channel_id);
                    if let (Some(touched), Some(waiting)) = (touched, self.wait.target) {
                        if touched != waiting {
                            debug!(
                                "user touched {} while waiting on {}, pruning the inbound queue",
                                touched, waiting
                            );
                            self.next_unblocked_event = Some(entry.id);
                            needs_wake = true;
                        }
                    }
                }
            }
            EventKind::DeviceReset(_) => {}
        }

        self.inbound.push_back(entry);
        needs_wake
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_policy_flag_implies_virtual_hard_key() {
        let (policy_flags, flags, _) =
            normalize_key_flags(PolicyFlags(PolicyFlags::VIRTUAL), KeyFlags::default(), 0);

        assert!(policy_flags.contains(PolicyFlags::VIRTUAL));
        assert!(flags.contains(KeyFlags::VIRTUAL_HARD_KEY));
    }

    #[test]
    fn test_virtual_hard_key_implies_virtual_policy_flag() {
        let (policy_flags, flags, _) = normalize_key_flags(
            PolicyFlags::default(),
            KeyFlags(KeyFlags::VIRTUAL_HARD_KEY),
            0,
        );

        assert!(policy_flags.contains(PolicyFlags::VIRTUAL));
        assert!(flags.contains(KeyFlags::VIRTUAL_HARD_KEY));
    }

    #[test]
    fn test_modifier_policy_bits_fold_into_meta_state() {
        // Arrange
        let policy_flags = PolicyFlags(
            PolicyFlags::ALT | PolicyFlags::SHIFT | PolicyFlags::CAPS_LOCK | PolicyFlags::FUNCTION,
        );

        // Act
        let (_, _, meta_state) = normalize_key_flags(policy_flags, KeyFlags::default(), 0);

        // Assert
        assert_eq!(
            meta_state,
            meta::ALT_ON
                | meta::ALT_LEFT_ON
                | meta::SHIFT_ON
                | meta::SHIFT_LEFT_ON
                | meta::CAPS_LOCK_ON
                | meta::FUNCTION_ON
        );
    }

    #[test]
    fn test_alt_gr_sets_right_alt() {
        let (_, _, meta_state) =
            normalize_key_flags(PolicyFlags(PolicyFlags::ALT_GR), KeyFlags::default(), 0);

        assert_eq!(meta_state, meta::ALT_ON | meta::ALT_RIGHT_ON);
    }
}
