//! Bringing connections back in sync after input they expected never comes.
//!
//! Each connection's input state knows which keys and strokes are open from
//! the client's point of view.  Cancellation turns the selected ones into
//! terminal events (canceled key UP, motion CANCEL or HOVER_EXIT) and
//! publishes them through the normal cycle; tracking those events closes the
//! mementos again.

use std::sync::Arc;

use inputflow_core::{CancelationOptions, ChannelId, EventRef, InputTarget, TargetFlags};
use tracing::debug;

use super::publish::enqueue_dispatch_entry;
use super::{ConnectionStatus, DispatcherState};

impl DispatcherState {
    pub(super) fn synthesize_cancelation_events_for_all_connections(
        &mut self,
        options: &CancelationOptions,
    ) {
        let ids: Vec<ChannelId> = self.connections.keys().copied().collect();
        for channel_id in ids {
            self.synthesize_cancelation_events_for_connection(channel_id, options);
        }
    }

    pub(super) fn synthesize_cancelation_events_for_monitors(
        &mut self,
        options: &CancelationOptions,
    ) {
        for channel_id in self.monitors.clone() {
            self.synthesize_cancelation_events_for_connection(channel_id, options);
        }
    }

    pub(super) fn synthesize_cancelation_events_for_connection(
        &mut self,
        channel_id: ChannelId,
        options: &CancelationOptions,
    ) {
        let now = self.now();
        let Some(connection) = self.connections.get_mut(&channel_id) else {
            return;
        };
        if connection.status == ConnectionStatus::Broken {
            return;
        }

        let events = connection
            .input_state
            .synthesize_cancelation_events(now, options);
        if events.is_empty() {
            return;
        }
        debug!(
            "channel '{}' ~ synthesized {} cancelation events to bring channel back in sync \
             with reality: {}, mode={:?}",
            connection.name(),
            events.len(),
            options.reason,
            options.mode
        );

        // Cancellations land in the coordinate space of the stroke they end.
        let transform = connection.last_transform;
        let target = InputTarget {
            channel_id,
            flags: TargetFlags(TargetFlags::DISPATCH_AS_IS),
            x_offset: transform.x_offset,
            y_offset: transform.y_offset,
            scale_factor: transform.scale_factor,
            pointer_ids: 0,
        };

        for mut event in events {
            event.dispatch_in_progress = true;
            debug!("cancel - {}", event);
            let event: EventRef = Arc::new(event);
            enqueue_dispatch_entry(connection, &event, &target, TargetFlags::DISPATCH_AS_IS);
        }

        self.start_dispatch_cycle(now, channel_id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use inputflow_core::domain::codes::{key_action, motion_action};
    use inputflow_core::keymap::keycodes;
    use inputflow_core::protocol::open_channel_pair;
    use inputflow_core::{CancelationMode, InputMessage, KeyFlags};

    use super::super::test_support::{enabled_dispatcher_with_clock, key_args, touch_args};
    use super::super::DispatcherSettings;
    use super::*;
    use crate::application::policy::PassThroughPolicy;
    use crate::application::time::TimeSource;

    fn pump(dispatcher: &super::super::InputDispatcher) {
        for _ in 0..8 {
            dispatcher.run_dispatch_step();
        }
    }

    #[test]
    fn test_cancel_all_returns_connection_to_neutral() {
        // Arrange: one held key and one open stroke.
        let (dispatcher, clock) =
            enabled_dispatcher_with_clock(Arc::new(PassThroughPolicy), DispatcherSettings::default());
        let (server, mut client) = open_channel_pair("app", 64 * 1024);
        let id = dispatcher
            .register_input_channel(Box::new(server), false)
            .expect("register");
        dispatcher.set_focused_channel(Some(id));
        dispatcher.notify_key(&key_args(key_action::DOWN, keycodes::A, clock.now()));
        dispatcher.notify_motion(
            &touch_args(motion_action::DOWN, clock.now()),
            &[InputTarget::foreground(id)],
        );
        pump(&dispatcher);
        assert_eq!(client.consume_all().len(), 2);
        assert_eq!(dispatcher.is_connection_neutral(id), Some(false));

        // Act
        {
            let mut state = dispatcher.lock();
            let options = CancelationOptions::new(CancelationMode::All, "test");
            state.synthesize_cancelation_events_for_connection(id, &options);
        }

        // Assert
        assert_eq!(dispatcher.is_connection_neutral(id), Some(true));
        let cancels = client.consume_all();
        assert_eq!(cancels.len(), 2);
        assert!(cancels.iter().any(|message| matches!(
            message,
            InputMessage::Key { event, .. }
                if event.action == key_action::UP && event.flags & KeyFlags::CANCELED != 0
        )));
        assert!(cancels.iter().any(|message| matches!(
            message,
            InputMessage::Motion { event, .. } if event.action == motion_action::CANCEL
        )));
    }

    #[test]
    fn test_pointer_scope_leaves_keys_alone() {
        // Arrange
        let (dispatcher, clock) =
            enabled_dispatcher_with_clock(Arc::new(PassThroughPolicy), DispatcherSettings::default());
        let (server, mut client) = open_channel_pair("app", 64 * 1024);
        let id = dispatcher
            .register_input_channel(Box::new(server), false)
            .expect("register");
        dispatcher.set_focused_channel(Some(id));
        dispatcher.notify_key(&key_args(key_action::DOWN, keycodes::A, clock.now()));
        pump(&dispatcher);
        client.consume_all();

        // Act
        {
            let mut state = dispatcher.lock();
            let options = CancelationOptions::new(CancelationMode::PointerEvents, "test");
            state.synthesize_cancelation_events_for_all_connections(&options);
        }

        // Assert
        assert!(client.consume_all().is_empty());
        assert_eq!(dispatcher.is_connection_neutral(id), Some(false));
    }

    #[test]
    fn test_cancellation_reuses_last_transform() {
        // Arrange: a stroke delivered through an offset target.
        let (dispatcher, clock) =
            enabled_dispatcher_with_clock(Arc::new(PassThroughPolicy), DispatcherSettings::default());
        let (server, mut client) = open_channel_pair("app", 64 * 1024);
        let id = dispatcher
            .register_input_channel(Box::new(server), false)
            .expect("register");
        dispatcher.notify_motion(
            &touch_args(motion_action::DOWN, clock.now()),
            &[InputTarget::foreground(id).with_offset(5.0, 7.0)],
        );
        pump(&dispatcher);
        client.consume_all();

        // Act
        {
            let mut state = dispatcher.lock();
            let options = CancelationOptions::new(CancelationMode::PointerEvents, "test");
            state.synthesize_cancelation_events_for_connection(id, &options);
        }

        // Assert
        match client.consume().expect("cancel") {
            InputMessage::Motion { event, .. } => {
                assert_eq!(event.action, motion_action::CANCEL);
                assert_eq!(event.x_offset, 5.0);
                assert_eq!(event.y_offset, 7.0);
            }
            other => panic!("expected a motion cancel, got {:?}", other),
        }
    }
}
