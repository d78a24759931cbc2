//! The per-connection publish cycle.
//!
//! ```text
//!  prepare ─► enqueue (one entry per dispatch mode) ─► outbound ─► publish ─► wait
//!                                                         ▲                     │
//!                                                         └── fallback restart ─┤
//!                                                                               ▼
//!                                                                  finished signal: release
//! ```
//!
//! A full channel with entries still awaiting acknowledgement only pauses
//! the connection: the next finished signal frees space and resumes the
//! cycle.  A full channel with nothing outstanding can never drain, so it is
//! treated like any other publish failure and the connection breaks.

use std::sync::Arc;

use inputflow_core::domain::codes::motion_action;
use inputflow_core::domain::split::split_motion_event;
use inputflow_core::{
    ChannelId, DispatchEntry, EventKind, EventRef, InputTarget, KeyEntry, KeyEvent, MotionEvent,
    MotionFlags, Nanos, PointerCoords, PublishError, TargetFlags,
};
use tracing::{debug, error};

use super::commands::Command;
use super::connection::{Connection, Transform};
use super::{ConnectionStatus, DispatcherState};

/// Builds the client-facing form of a key record.
pub(super) fn to_key_event(key: &KeyEntry, event_time: Nanos) -> KeyEvent {
    KeyEvent {
        device_id: key.device_id,
        source: key.source,
        action: key.action,
        flags: key.flags.0,
        key_code: key.key_code,
        scan_code: key.scan_code,
        meta_state: key.meta_state,
        repeat_count: key.repeat_count,
        down_time: key.down_time,
        event_time,
    }
}

impl DispatcherState {
    /// Binds `event` to `target`'s connection, splitting a motion event first
    /// when the target only owns some of its pointers.
    pub(super) fn prepare_dispatch_cycle(
        &mut self,
        now: Nanos,
        channel_id: ChannelId,
        event: &EventRef,
        target: &InputTarget,
    ) {
        let Some(connection) = self.connections.get(&channel_id) else {
            return;
        };
        if connection.status != ConnectionStatus::Normal {
            debug!(
                "channel '{}' ~ dropping event because the channel status is {}",
                connection.name(),
                connection.status
            );
            return;
        }

        if target.flags.contains(TargetFlags::SPLIT) {
            if let Some(motion) = event.motion() {
                if target.pointer_ids.count_ones() as usize != motion.pointer_count() {
                    let Some(split) = split_motion_event(event, target.pointer_ids) else {
                        return;
                    };
                    debug!("channel '{}' ~ split motion event", connection.name());
                    let split: EventRef = Arc::new(split);
                    self.enqueue_dispatch_entries(now, channel_id, &split, target);
                    return;
                }
            }
        }

        self.enqueue_dispatch_entries(now, channel_id, event, target);
    }

    fn enqueue_dispatch_entries(
        &mut self,
        now: Nanos,
        channel_id: ChannelId,
        event: &EventRef,
        target: &InputTarget,
    ) {
        let Some(connection) = self.connections.get_mut(&channel_id) else {
            return;
        };
        let was_empty = connection.outbound.is_empty();

        for mode in TargetFlags::DISPATCH_ORDER {
            enqueue_dispatch_entry(connection, event, target, mode);
        }

        // A non-empty queue already has a cycle in progress.
        if was_empty && !connection.outbound.is_empty() {
            self.start_dispatch_cycle(now, channel_id);
        }
    }

    /// Publishes outbound entries until the queue is empty or the channel
    /// pushes back.
    pub(super) fn start_dispatch_cycle(&mut self, now: Nanos, channel_id: ChannelId) {
        let Some(connection) = self.connections.get_mut(&channel_id) else {
            return;
        };
        debug!("channel '{}' ~ startDispatchCycle", connection.name());

        while connection.status == ConnectionStatus::Normal {
            let Some(entry) = connection.outbound.front_mut() else {
                break;
            };
            entry.delivery_time = now;

            let result = match &entry.event.kind {
                EventKind::Key(key) => {
                    let mut event = to_key_event(key, entry.event.event_time);
                    event.action = entry.resolved_action;
                    event.flags = entry.resolved_flags;
                    let result = connection.channel.publish_key_event(entry.seq, &event);
                    if result.is_ok() {
                        self.report.published_key_event(channel_id, entry.seq, &event);
                    }
                    Some(result)
                }
                EventKind::Motion(motion) => {
                    let zero_coords = entry.target_flags.contains(TargetFlags::ZERO_COORDS);
                    let (x_offset, y_offset, pointer_coords) =
                        if motion.is_pointer_event() && !zero_coords {
                            let scale = entry.scale_factor;
                            let coords = if scale == 1.0 {
                                motion.pointer_coords.clone()
                            } else {
                                motion.pointer_coords.iter().map(|c| c.scaled(scale)).collect()
                            };
                            (entry.x_offset * scale, entry.y_offset * scale, coords)
                        } else if zero_coords {
                            // The target must not learn where the pointer is.
                            let cleared = vec![PointerCoords::default(); motion.pointer_count()];
                            (0.0, 0.0, cleared)
                        } else {
                            (0.0, 0.0, motion.pointer_coords.clone())
                        };

                    let event = MotionEvent {
                        device_id: motion.device_id,
                        source: motion.source,
                        action: entry.resolved_action,
                        flags: entry.resolved_flags,
                        edge_flags: motion.edge_flags,
                        meta_state: motion.meta_state,
                        button_state: motion.button_state,
                        x_offset,
                        y_offset,
                        x_precision: motion.x_precision,
                        y_precision: motion.y_precision,
                        down_time: motion.down_time,
                        event_time: entry.event.event_time,
                        pointer_properties: motion.pointer_properties.clone(),
                        pointer_coords,
                    };
                    let result = connection.channel.publish_motion_event(entry.seq, &event);
                    if result.is_ok() {
                        self.report.published_motion_event(channel_id, entry.seq, &event);
                    }
                    Some(result)
                }
                EventKind::DeviceReset(_) => None,
            };

            let Some(result) = result else {
                // Device resets are never bound to a connection.
                error!("channel '{}' ~ cannot publish a device reset", connection.name());
                connection.outbound.pop_front();
                continue;
            };

            match result {
                Ok(()) => {
                    if let Some(entry) = connection.outbound.pop_front() {
                        connection.wait.push_back(entry);
                    }
                }
                Err(PublishError::WouldBlock) if !connection.wait.is_empty() => {
                    // The client is still catching up; its next finished
                    // signal resumes the cycle.
                    debug!(
                        "channel '{}' ~ could not publish event because the channel is full, \
                         waiting for the application to catch up",
                        connection.name()
                    );
                    connection.publisher_blocked = true;
                    return;
                }
                Err(err) => {
                    error!(
                        "channel '{}' ~ could not publish event due to an unexpected error: {}",
                        connection.name(),
                        err
                    );
                    self.abort_broken_dispatch_cycle(channel_id, true);
                    return;
                }
            }
        }
    }

    /// Handles a finished signal read from `channel_id`.
    pub(super) fn finish_dispatch_cycle(
        &mut self,
        now: Nanos,
        channel_id: ChannelId,
        seq: u32,
        handled: bool,
    ) {
        let Some(connection) = self.connections.get_mut(&channel_id) else {
            return;
        };
        debug!(
            "channel '{}' ~ finishDispatchCycle - seq={}, handled={}",
            connection.name(),
            seq,
            handled
        );

        connection.publisher_blocked = false;
        if matches!(
            connection.status,
            ConnectionStatus::Broken | ConnectionStatus::Zombie
        ) {
            return;
        }

        self.commands.push_back(Command::DispatchCycleFinished {
            channel_id,
            seq,
            handled,
            finish_time: now,
        });
    }

    /// Drains both queues and marks a normal connection broken.
    pub(super) fn abort_broken_dispatch_cycle(&mut self, channel_id: ChannelId, notify: bool) {
        let Some(connection) = self.connections.get_mut(&channel_id) else {
            return;
        };
        let drained = connection.drain_queues();
        // Nothing will be delivered to reconcile what the client last saw.
        connection.input_state.clear();
        debug!(
            "channel '{}' ~ abortBrokenDispatchCycle - notify={}, released {} entries",
            connection.name(),
            notify,
            drained
        );

        if connection.status == ConnectionStatus::Normal {
            connection.status = ConnectionStatus::Broken;
            if notify {
                self.commands
                    .push_back(Command::NotifyInputChannelBroken { channel_id });
            }
        }
    }
}

/// Adds one entry for `dispatch_mode` if the target requested that mode and
/// the connection's input state accepts the resolved action.
pub(super) fn enqueue_dispatch_entry(
    connection: &mut Connection,
    event: &EventRef,
    target: &InputTarget,
    dispatch_mode: u32,
) {
    if !target.flags.contains(dispatch_mode) {
        return;
    }
    let mut target_flags = target.flags;
    target_flags.remove(TargetFlags::DISPATCH_MASK);
    target_flags.insert(dispatch_mode);

    let (resolved_action, resolved_flags) = match &event.kind {
        EventKind::Key(key) => (key.action, key.flags.0),
        EventKind::Motion(motion) => {
            let mut action = match dispatch_mode {
                TargetFlags::DISPATCH_AS_OUTSIDE => motion_action::OUTSIDE,
                TargetFlags::DISPATCH_AS_HOVER_EXIT => motion_action::HOVER_EXIT,
                TargetFlags::DISPATCH_AS_HOVER_ENTER => motion_action::HOVER_ENTER,
                _ => motion.action,
            };
            if action == motion_action::HOVER_MOVE
                && !connection
                    .input_state
                    .is_hovering(motion.device_id, motion.source)
            {
                debug!(
                    "channel '{}' ~ rewriting HOVER_MOVE to HOVER_ENTER for an inconsistent hover stream",
                    connection.name()
                );
                action = motion_action::HOVER_ENTER;
            }

            let mut flags = motion.flags.0;
            if target_flags.contains(TargetFlags::WINDOW_IS_OBSCURED) {
                flags |= MotionFlags::WINDOW_IS_OBSCURED;
            }
            (action, flags)
        }
        EventKind::DeviceReset(_) => return,
    };

    if !connection
        .input_state
        .track(event, resolved_action, resolved_flags)
    {
        debug!(
            "channel '{}' ~ skipping inconsistent {} event",
            connection.name(),
            event.kind_label()
        );
        return;
    }

    let mut entry = DispatchEntry::new(Arc::clone(event), target_flags, target);
    entry.resolved_action = resolved_action;
    entry.resolved_flags = resolved_flags;

    connection.last_transform = Transform {
        x_offset: target.x_offset,
        y_offset: target.y_offset,
        scale_factor: target.scale_factor,
    };
    connection.outbound.push_back(entry);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use inputflow_core::domain::codes::{key_action, source};
    use inputflow_core::keymap::keycodes;
    use inputflow_core::protocol::open_channel_pair;
    use inputflow_core::{EventEntry, InputMessage, KeyFlags, PolicyFlags};

    use super::super::test_support::{
        enabled_dispatcher_with_clock, motion_entry, ScriptedChannel, ScriptedPublish,
    };
    use super::super::DispatcherSettings;
    use super::*;
    use crate::application::policy::PassThroughPolicy;
    use crate::application::time::TimeSource;

    fn key_entry(action: i32) -> EventRef {
        Arc::new(EventEntry::new(
            0,
            PolicyFlags(PolicyFlags::TRUSTED | PolicyFlags::PASS_TO_USER),
            EventKind::Key(KeyEntry {
                device_id: 1,
                source: source::KEYBOARD,
                action,
                flags: KeyFlags::default(),
                key_code: keycodes::A,
                scan_code: 30,
                meta_state: 0,
                repeat_count: 0,
                down_time: 0,
                synthetic_repeat: false,
                intercept_result: Default::default(),
                intercept_wakeup_time: 0,
            }),
        ))
    }

    #[test]
    fn test_enqueue_expands_dispatch_modes_in_order() {
        // Arrange
        let (server, _client) = open_channel_pair("app", 4096);
        let mut connection = Connection::new(Box::new(server), false);
        let id = connection.id();
        let event: EventRef = Arc::new(motion_entry(motion_action::HOVER_MOVE, 0, 1));
        let target = InputTarget::foreground(id).with_flags(
            TargetFlags::DISPATCH_AS_HOVER_EXIT | TargetFlags::DISPATCH_AS_OUTSIDE,
        );

        // Act
        for mode in TargetFlags::DISPATCH_ORDER {
            enqueue_dispatch_entry(&mut connection, &event, &target, mode);
        }

        // Assert: HOVER_EXIT for a connection that is not hovering is
        // inconsistent and skipped; OUTSIDE and the as-is HOVER_MOVE (rewritten
        // to HOVER_ENTER) remain.
        let actions: Vec<i32> = connection
            .outbound
            .iter()
            .map(|entry| entry.resolved_action)
            .collect();
        assert_eq!(actions, vec![motion_action::OUTSIDE, motion_action::HOVER_ENTER]);
    }

    #[test]
    fn test_obscured_target_sets_motion_flag() {
        let (server, _client) = open_channel_pair("app", 4096);
        let mut connection = Connection::new(Box::new(server), false);
        let event: EventRef = Arc::new(motion_entry(motion_action::DOWN, 0, 1));
        let target = InputTarget::foreground(connection.id())
            .with_flags(TargetFlags::WINDOW_IS_OBSCURED);

        enqueue_dispatch_entry(&mut connection, &event, &target, TargetFlags::DISPATCH_AS_IS);

        let entry = connection.outbound.front().expect("entry");
        assert_ne!(entry.resolved_flags & MotionFlags::WINDOW_IS_OBSCURED, 0);
    }

    #[test]
    fn test_inconsistent_motion_is_not_enqueued() {
        // Arrange: a MOVE with no open stroke.
        let (server, _client) = open_channel_pair("app", 4096);
        let mut connection = Connection::new(Box::new(server), false);
        let event: EventRef = Arc::new(motion_entry(motion_action::MOVE, 0, 1));
        let target = InputTarget::foreground(connection.id());

        // Act
        enqueue_dispatch_entry(&mut connection, &event, &target, TargetFlags::DISPATCH_AS_IS);

        // Assert
        assert!(connection.outbound.is_empty());
        assert_eq!(Arc::strong_count(&event), 1);
    }

    #[test]
    fn test_key_up_without_down_is_still_enqueued() {
        let (server, _client) = open_channel_pair("app", 4096);
        let mut connection = Connection::new(Box::new(server), false);
        let target = InputTarget::foreground(connection.id());

        enqueue_dispatch_entry(
            &mut connection,
            &key_entry(key_action::UP),
            &target,
            TargetFlags::DISPATCH_AS_IS,
        );

        assert_eq!(connection.outbound.len(), 1);
    }

    #[test]
    fn test_scaled_target_receives_scaled_coordinates() {
        // Arrange
        let (dispatcher, clock) =
            enabled_dispatcher_with_clock(Arc::new(PassThroughPolicy), DispatcherSettings::default());
        let (server, mut client) = open_channel_pair("app", 4096);
        let id = dispatcher
            .register_input_channel(Box::new(server), false)
            .expect("register");
        let event: EventRef = Arc::new(motion_entry(motion_action::DOWN, clock.now(), 1));
        let target = InputTarget::foreground(id).with_offset(10.0, 20.0).with_scale(2.0);

        // Act
        {
            let mut state = dispatcher.lock();
            let now = state.now();
            state.prepare_dispatch_cycle(now, id, &event, &target);
        }

        // Assert
        match client.consume().expect("message") {
            InputMessage::Motion { event, .. } => {
                assert_eq!(event.x_offset, 20.0);
                assert_eq!(event.y_offset, 40.0);
                assert_eq!(event.pointer_coords[0].x, 2.0 * 100.0);
            }
            other => panic!("expected a motion event, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_coords_target_sees_no_position() {
        let (dispatcher, clock) =
            enabled_dispatcher_with_clock(Arc::new(PassThroughPolicy), DispatcherSettings::default());
        let (server, mut client) = open_channel_pair("app", 4096);
        let id = dispatcher
            .register_input_channel(Box::new(server), false)
            .expect("register");
        let event: EventRef = Arc::new(motion_entry(motion_action::DOWN, clock.now(), 1));
        let target = InputTarget::foreground(id)
            .with_offset(10.0, 20.0)
            .with_flags(TargetFlags::ZERO_COORDS);

        {
            let mut state = dispatcher.lock();
            let now = state.now();
            state.prepare_dispatch_cycle(now, id, &event, &target);
        }

        match client.consume().expect("message") {
            InputMessage::Motion { event, .. } => {
                assert_eq!(event.x(0), Some(0.0));
                assert_eq!(event.y(0), Some(0.0));
            }
            other => panic!("expected a motion event, got {:?}", other),
        }
    }

    #[test]
    fn test_split_target_receives_only_its_pointers() {
        // Arrange: a two-pointer event, the target owns pointer 1 only.
        let (dispatcher, clock) =
            enabled_dispatcher_with_clock(Arc::new(PassThroughPolicy), DispatcherSettings::default());
        let (server, mut client) = open_channel_pair("app", 4096);
        let id = dispatcher
            .register_input_channel(Box::new(server), false)
            .expect("register");
        let event: EventRef = Arc::new(motion_entry(motion_action::DOWN, clock.now(), 2));
        let target = InputTarget::foreground(id).split(1 << 1);

        // Act
        {
            let mut state = dispatcher.lock();
            let now = state.now();
            state.prepare_dispatch_cycle(now, id, &event, &target);
        }

        // Assert
        match client.consume().expect("message") {
            InputMessage::Motion { event, .. } => {
                assert_eq!(event.pointer_count(), 1);
                assert_eq!(event.pointer_properties[0].id, 1);
            }
            other => panic!("expected a motion event, got {:?}", other),
        }
    }

    #[test]
    fn test_would_block_with_outstanding_entries_blocks_publisher() {
        // Arrange: the first publish succeeds, the second reports a full buffer.
        let (dispatcher, _clock) =
            enabled_dispatcher_with_clock(Arc::new(PassThroughPolicy), DispatcherSettings::default());
        let channel = ScriptedChannel::new(
            "slow",
            vec![ScriptedPublish::Accept, ScriptedPublish::WouldBlock],
        );
        let id = dispatcher
            .register_input_channel(Box::new(channel), false)
            .expect("register");
        dispatcher.set_focused_channel(Some(id));

        // Act
        {
            let mut state = dispatcher.lock();
            let now = state.now();
            let target = InputTarget::foreground(id);
            state.prepare_dispatch_cycle(now, id, &key_entry(key_action::DOWN), &target);
            state.prepare_dispatch_cycle(now, id, &key_entry(key_action::UP), &target);
        }

        // Assert
        assert_eq!(dispatcher.is_publisher_blocked(id), Some(true));
        assert_eq!(dispatcher.wait_queue_len(id), Some(1));
        assert_eq!(dispatcher.outbound_queue_len(id), Some(1));
        assert_eq!(dispatcher.connection_status(id), Some(ConnectionStatus::Normal));
    }

    #[test]
    fn test_dead_channel_breaks_connection() {
        // Arrange
        let (dispatcher, _clock) =
            enabled_dispatcher_with_clock(Arc::new(PassThroughPolicy), DispatcherSettings::default());
        let channel = ScriptedChannel::new("dead", vec![ScriptedPublish::DeadObject]);
        let id = dispatcher
            .register_input_channel(Box::new(channel), false)
            .expect("register");
        let event = key_entry(key_action::DOWN);

        // Act
        {
            let mut state = dispatcher.lock();
            let now = state.now();
            state.prepare_dispatch_cycle(now, id, &event, &InputTarget::foreground(id));
        }

        // Assert
        assert_eq!(dispatcher.connection_status(id), Some(ConnectionStatus::Broken));
        assert_eq!(dispatcher.outbound_queue_len(id), Some(0));
        assert_eq!(dispatcher.wait_queue_len(id), Some(0));
        assert_eq!(Arc::strong_count(&event), 1);
    }

    #[test]
    fn test_broken_connection_forgets_live_keys() {
        // Arrange
        let (dispatcher, _clock) =
            enabled_dispatcher_with_clock(Arc::new(PassThroughPolicy), DispatcherSettings::default());
        let channel = ScriptedChannel::new("dead", vec![ScriptedPublish::DeadObject]);
        let id = dispatcher
            .register_input_channel(Box::new(channel), false)
            .expect("register");

        // Act
        {
            let mut state = dispatcher.lock();
            let now = state.now();
            let event = key_entry(key_action::DOWN);
            state.prepare_dispatch_cycle(now, id, &event, &InputTarget::foreground(id));
        }

        // Assert
        assert_eq!(dispatcher.connection_status(id), Some(ConnectionStatus::Broken));
        assert_eq!(dispatcher.is_connection_neutral(id), Some(true));
    }
}
