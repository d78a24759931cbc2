//! Human-readable snapshot of the dispatcher for diagnostics.

use std::fmt::Write;

use inputflow_core::{DispatchEntry, Nanos};

use super::{millis, DispatcherState, InputDispatcher};

impl InputDispatcher {
    /// Renders the dispatcher's state: mode, focus, queues, connections and
    /// configuration.
    pub fn dump(&self) -> String {
        let state = self.lock();
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = state.dump(&mut out);
        out
    }
}

impl DispatcherState {
    fn dump(&self, out: &mut String) -> std::fmt::Result {
        let now = self.now();

        writeln!(out, "Input Dispatcher State:")?;
        writeln!(out, "  DispatchEnabled: {}", self.dispatch_enabled)?;
        writeln!(out, "  DispatchFrozen: {}", self.dispatch_frozen)?;

        match self.focused.and_then(|id| self.connections.get(&id)) {
            Some(connection) => writeln!(
                out,
                "  FocusedChannel: '{}' ({})",
                connection.name(),
                connection.id()
            )?,
            None => writeln!(out, "  FocusedChannel: <null>")?,
        }

        if self.monitors.is_empty() {
            writeln!(out, "  MonitoringChannels: <none>")?;
        } else {
            writeln!(out, "  MonitoringChannels:")?;
            for (i, id) in self.monitors.iter().enumerate() {
                let name = self
                    .connections
                    .get(id)
                    .map_or("<unknown>", |connection| connection.name());
                writeln!(out, "    {}: '{}'", i, name)?;
            }
        }

        match &self.pending {
            Some(pending) => writeln!(
                out,
                "  PendingEvent: {}, age={:.1}ms",
                pending,
                millis(now.saturating_sub(pending.event_time))
            )?,
            None => writeln!(out, "  PendingEvent: <none>")?,
        }

        if self.inbound.is_empty() {
            writeln!(out, "  InboundQueue: <empty>")?;
        } else {
            writeln!(out, "  InboundQueue: length={}", self.inbound.len())?;
            for entry in &self.inbound {
                writeln!(
                    out,
                    "    {}, age={:.1}ms",
                    entry,
                    millis(now.saturating_sub(entry.event_time))
                )?;
            }
        }

        if self.connections.is_empty() {
            writeln!(out, "  Connections: <none>")?;
        } else {
            writeln!(out, "  Connections:")?;
            for (i, connection) in self.connections.values().enumerate() {
                writeln!(
                    out,
                    "    {}: channelName='{}', status={}, monitor={}, publisherBlocked={}",
                    i,
                    connection.name(),
                    connection.status,
                    connection.is_monitor,
                    connection.publisher_blocked
                )?;
                dump_queue(out, "OutboundQueue", connection.outbound.iter(), now, |entry| {
                    entry.event.event_time
                })?;
                dump_queue(out, "WaitQueue", connection.wait.iter(), now, |entry| {
                    entry.delivery_time
                })?;
            }
        }

        if self.is_app_switch_pending() {
            writeln!(
                out,
                "  AppSwitch: pending, due in {:.1}ms",
                millis(self.app_switch_due_time.saturating_sub(now))
            )?;
        } else {
            writeln!(out, "  AppSwitch: not pending")?;
        }
        writeln!(out, "  WaitCause: {:?}", self.wait.cause)?;

        let settings = &self.settings;
        writeln!(out, "  Configuration:")?;
        writeln!(out, "    AppSwitchTimeout: {:?}", settings.app_switch_timeout)?;
        writeln!(out, "    StaleEventTimeout: {:?}", settings.stale_event_timeout)?;
        writeln!(out, "    DispatchingTimeout: {:?}", settings.dispatching_timeout)?;
        writeln!(out, "    StreamAheadTimeout: {:?}", settings.stream_ahead_timeout)?;
        writeln!(out, "    KeyRepeatEnabled: {}", settings.key_repeat_enabled)?;
        writeln!(out, "    KeyRepeatTimeout: {:?}", settings.key_repeat_timeout)?;
        writeln!(out, "    KeyRepeatDelay: {:?}", settings.key_repeat_delay)?;
        Ok(())
    }
}

fn dump_queue<'a>(
    out: &mut String,
    label: &str,
    entries: impl ExactSizeIterator<Item = &'a DispatchEntry>,
    now: Nanos,
    since: impl Fn(&DispatchEntry) -> Nanos,
) -> std::fmt::Result {
    if entries.len() == 0 {
        return writeln!(out, "      {}: <empty>", label);
    }
    writeln!(out, "      {}: length={}", label, entries.len())?;
    for entry in entries {
        writeln!(
            out,
            "        seq={}, {}, targetFlags={}, resolvedAction={}, age={:.1}ms",
            entry.seq,
            entry.event,
            entry.target_flags,
            entry.resolved_action,
            millis(now.saturating_sub(since(entry)))
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use inputflow_core::domain::codes::key_action;
    use inputflow_core::keymap::keycodes;
    use inputflow_core::protocol::open_channel_pair;

    use super::super::test_support::{enabled_dispatcher_with_clock, key_args};
    use super::super::DispatcherSettings;
    use crate::application::policy::PassThroughPolicy;
    use crate::application::time::TimeSource;

    #[test]
    fn test_dump_of_idle_dispatcher() {
        let (dispatcher, _clock) =
            enabled_dispatcher_with_clock(Arc::new(PassThroughPolicy), DispatcherSettings::default());

        let dump = dispatcher.dump();

        assert!(dump.starts_with("Input Dispatcher State:"));
        assert!(dump.contains("DispatchEnabled: true"));
        assert!(dump.contains("FocusedChannel: <null>"));
        assert!(dump.contains("InboundQueue: <empty>"));
        assert!(dump.contains("Connections: <none>"));
        assert!(dump.contains("AppSwitch: not pending"));
    }

    #[test]
    fn test_dump_lists_connections_and_waiting_entries() {
        // Arrange
        let (dispatcher, clock) =
            enabled_dispatcher_with_clock(Arc::new(PassThroughPolicy), DispatcherSettings::default());
        let (server, _client) = open_channel_pair("editor", 4096);
        let id = dispatcher
            .register_input_channel(Box::new(server), false)
            .expect("register");
        dispatcher.set_focused_channel(Some(id));
        dispatcher.notify_key(&key_args(key_action::DOWN, keycodes::A, clock.now()));
        for _ in 0..4 {
            dispatcher.run_dispatch_step();
        }

        // Act
        let dump = dispatcher.dump();

        // Assert
        assert!(dump.contains("FocusedChannel: 'editor'"));
        assert!(dump.contains("channelName='editor', status=NORMAL"));
        assert!(dump.contains("WaitQueue: length=1"));
        assert!(dump.contains("OutboundQueue: <empty>"));
    }
}
