//! Per-connection record of live keys and pointer strokes.
//!
//! # Mementos (for beginners)
//!
//! A client that has seen a key go DOWN expects to eventually see it go UP.
//! If the dispatcher drops an event, or the device vanishes, or the client
//! loses focus, that promise would be broken and the client would believe the
//! key is still held.  To prevent this every connection keeps an
//! [`InputState`]: a small list of *mementos*, one for each key or stroke that
//! is currently "open" from the client's point of view.
//!
//! The mementos serve two purposes:
//!
//! - **Validation.**  A pointer MOVE with no open stroke is inconsistent and is
//!   not delivered.
//! - **Recovery.**  [`InputState::synthesize_cancelation_events`] turns every
//!   matching memento into a terminal event (a canceled key UP, a motion
//!   CANCEL or HOVER_EXIT).  Tracking that terminal event closes the memento,
//!   so the connection returns to a neutral state.

use std::collections::HashMap;

use tracing::debug;

use super::codes::{key_action, motion_action, source};
use super::event::{
    EventEntry, EventKind, KeyEntry, MotionEntry, Nanos, PointerCoords, PointerProperties,
};
use super::flags::{KeyFlags, MotionFlags, PolicyFlags};

/// An open key press.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyMemento {
    pub device_id: i32,
    pub source: u32,
    pub key_code: i32,
    pub scan_code: i32,
    pub meta_state: i32,
    pub flags: KeyFlags,
    pub down_time: Nanos,
    pub policy_flags: PolicyFlags,
}

/// An open pointer stroke or hover.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionMemento {
    pub device_id: i32,
    pub source: u32,
    pub flags: MotionFlags,
    pub x_precision: f32,
    pub y_precision: f32,
    pub down_time: Nanos,
    pub pointer_properties: Vec<PointerProperties>,
    pub pointer_coords: Vec<PointerCoords>,
    pub hovering: bool,
    pub policy_flags: PolicyFlags,
}

impl MotionMemento {
    fn set_pointers(&mut self, motion: &MotionEntry) {
        self.pointer_properties.clone_from(&motion.pointer_properties);
        self.pointer_coords.clone_from(&motion.pointer_coords);
    }
}

/// Which mementos a cancellation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelationMode {
    All,
    PointerEvents,
    NonPointerEvents,
    FallbackEvents,
}

/// Scope of one cancellation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelationOptions {
    pub mode: CancelationMode,
    pub reason: &'static str,
    pub device_id: Option<i32>,
    pub key_code: Option<i32>,
}

impl CancelationOptions {
    pub fn new(mode: CancelationMode, reason: &'static str) -> Self {
        Self {
            mode,
            reason,
            device_id: None,
            key_code: None,
        }
    }

    pub fn for_device(mut self, device_id: i32) -> Self {
        self.device_id = Some(device_id);
        self
    }

    pub fn for_key_code(mut self, key_code: i32) -> Self {
        self.key_code = Some(key_code);
        self
    }

    fn should_cancel_key(&self, memento: &KeyMemento) -> bool {
        if self.key_code.is_some_and(|code| code != memento.key_code) {
            return false;
        }
        if self.device_id.is_some_and(|id| id != memento.device_id) {
            return false;
        }
        match self.mode {
            CancelationMode::All | CancelationMode::NonPointerEvents => true,
            CancelationMode::FallbackEvents => memento.flags.contains(KeyFlags::FALLBACK),
            CancelationMode::PointerEvents => false,
        }
    }

    fn should_cancel_motion(&self, memento: &MotionMemento) -> bool {
        if self.device_id.is_some_and(|id| id != memento.device_id) {
            return false;
        }
        match self.mode {
            CancelationMode::All => true,
            CancelationMode::PointerEvents => source::is_pointer(memento.source),
            CancelationMode::NonPointerEvents => !source::is_pointer(memento.source),
            CancelationMode::FallbackEvents => false,
        }
    }
}

/// Live keys, strokes and fallback substitutions of one connection.
#[derive(Debug, Default)]
pub struct InputState {
    key_mementos: Vec<KeyMemento>,
    motion_mementos: Vec<MotionMemento>,
    /// Original key code → substitute key code.  A substitute of `0` records
    /// that the policy declined to substitute on the initial DOWN.
    fallback_keys: HashMap<i32, i32>,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` when no key or stroke is open.
    pub fn is_neutral(&self) -> bool {
        self.key_mementos.is_empty() && self.motion_mementos.is_empty()
    }

    pub fn is_hovering(&self, device_id: i32, source: u32) -> bool {
        self.motion_mementos
            .iter()
            .any(|m| m.device_id == device_id && m.source == source && m.hovering)
    }

    pub fn key_mementos(&self) -> &[KeyMemento] {
        &self.key_mementos
    }

    pub fn motion_mementos(&self) -> &[MotionMemento] {
        &self.motion_mementos
    }

    /// Records the effect of delivering `event` with the given resolved action.
    ///
    /// Returns `false` if the event is inconsistent with what this connection
    /// has already observed and must not be delivered to it.
    pub fn track(&mut self, event: &EventEntry, action: i32, flags: i32) -> bool {
        match &event.kind {
            EventKind::Key(key) => self.track_key(key, event.policy_flags, action, flags),
            EventKind::Motion(motion) => {
                self.track_motion(motion, event.policy_flags, action, flags)
            }
            EventKind::DeviceReset(_) => true,
        }
    }

    pub fn track_key(
        &mut self,
        key: &KeyEntry,
        policy_flags: PolicyFlags,
        action: i32,
        flags: i32,
    ) -> bool {
        match action {
            key_action::UP => {
                if key.flags.contains(KeyFlags::FALLBACK) {
                    self.fallback_keys
                        .retain(|_, fallback| *fallback != key.key_code);
                }
                if let Some(index) = self.find_key_memento(key) {
                    self.key_mementos.remove(index);
                }
                // An UP without a DOWN is still delivered: popups shown while a
                // key is held only ever observe the release.
                true
            }
            key_action::DOWN => {
                if let Some(index) = self.find_key_memento(key) {
                    self.key_mementos.remove(index);
                }
                self.key_mementos.push(KeyMemento {
                    device_id: key.device_id,
                    source: key.source,
                    key_code: key.key_code,
                    scan_code: key.scan_code,
                    meta_state: key.meta_state,
                    flags: KeyFlags(flags),
                    down_time: key.down_time,
                    policy_flags,
                });
                true
            }
            _ => true,
        }
    }

    pub fn track_motion(
        &mut self,
        motion: &MotionEntry,
        policy_flags: PolicyFlags,
        action: i32,
        flags: i32,
    ) -> bool {
        let masked = motion_action::masked(action);
        match masked {
            motion_action::UP | motion_action::CANCEL => {
                if let Some(index) = self.find_motion_memento(motion, false) {
                    self.motion_mementos.remove(index);
                    return true;
                }
                debug!(
                    "dropping inconsistent motion up or cancel event: deviceId={}, source=0x{:08x}",
                    motion.device_id, motion.source
                );
                false
            }
            motion_action::DOWN => {
                if let Some(index) = self.find_motion_memento(motion, false) {
                    self.motion_mementos.remove(index);
                }
                self.add_motion_memento(motion, policy_flags, flags, false);
                true
            }
            motion_action::POINTER_UP | motion_action::POINTER_DOWN | motion_action::MOVE => {
                if motion.source & source::CLASS_NAVIGATION != 0 {
                    // Trackballs move without a DOWN; there is nothing to track.
                    return true;
                }
                if let Some(index) = self.find_motion_memento(motion, false) {
                    self.motion_mementos[index].set_pointers(motion);
                    return true;
                }
                if masked == motion_action::MOVE && motion.source & source::CLASS_JOYSTICK != 0 {
                    // Joysticks report MOVE without a DOWN.
                    return true;
                }
                debug!(
                    "dropping inconsistent motion pointer up/down or move event: \
                     deviceId={}, source=0x{:08x}, action={}",
                    motion.device_id,
                    motion.source,
                    motion_action::label(action)
                );
                false
            }
            motion_action::HOVER_EXIT => {
                if let Some(index) = self.find_motion_memento(motion, true) {
                    self.motion_mementos.remove(index);
                    return true;
                }
                debug!(
                    "dropping inconsistent motion hover exit event: deviceId={}, source=0x{:08x}",
                    motion.device_id, motion.source
                );
                false
            }
            motion_action::HOVER_ENTER | motion_action::HOVER_MOVE => {
                if let Some(index) = self.find_motion_memento(motion, true) {
                    self.motion_mementos.remove(index);
                }
                self.add_motion_memento(motion, policy_flags, flags, true);
                true
            }
            _ => true,
        }
    }

    /// Builds one terminal event for every memento selected by `options`.
    ///
    /// The mementos themselves are left in place; they close when the
    /// returned events are tracked on their way to the connection.
    pub fn synthesize_cancelation_events(
        &self,
        current_time: Nanos,
        options: &CancelationOptions,
    ) -> Vec<EventEntry> {
        let keys = self
            .key_mementos
            .iter()
            .filter(|m| options.should_cancel_key(m))
            .map(|m| {
                EventEntry::new(
                    current_time,
                    m.policy_flags,
                    EventKind::Key(KeyEntry {
                        device_id: m.device_id,
                        source: m.source,
                        action: key_action::UP,
                        flags: m.flags.with(KeyFlags::CANCELED),
                        key_code: m.key_code,
                        scan_code: m.scan_code,
                        meta_state: m.meta_state,
                        repeat_count: 0,
                        down_time: m.down_time,
                        synthetic_repeat: false,
                        intercept_result: Default::default(),
                        intercept_wakeup_time: 0,
                    }),
                )
            });

        let motions = self
            .motion_mementos
            .iter()
            .filter(|m| options.should_cancel_motion(m))
            .map(|m| {
                let action = if m.hovering {
                    motion_action::HOVER_EXIT
                } else {
                    motion_action::CANCEL
                };
                EventEntry::new(
                    current_time,
                    m.policy_flags,
                    EventKind::Motion(MotionEntry {
                        device_id: m.device_id,
                        source: m.source,
                        action,
                        flags: m.flags,
                        meta_state: 0,
                        button_state: 0,
                        edge_flags: 0,
                        x_precision: m.x_precision,
                        y_precision: m.y_precision,
                        down_time: m.down_time,
                        pointer_properties: m.pointer_properties.clone(),
                        pointer_coords: m.pointer_coords.clone(),
                        targets: Vec::new(),
                    }),
                )
            });

        keys.chain(motions).collect()
    }

    /// Forgets everything without producing terminal events.
    pub fn clear(&mut self) {
        self.key_mementos.clear();
        self.motion_mementos.clear();
        self.fallback_keys.clear();
    }

    pub fn fallback_key(&self, original_key_code: i32) -> Option<i32> {
        self.fallback_keys.get(&original_key_code).copied()
    }

    pub fn set_fallback_key(&mut self, original_key_code: i32, fallback_key_code: i32) {
        self.fallback_keys.insert(original_key_code, fallback_key_code);
    }

    pub fn remove_fallback_key(&mut self, original_key_code: i32) {
        self.fallback_keys.remove(&original_key_code);
    }

    pub fn fallback_keys(&self) -> &HashMap<i32, i32> {
        &self.fallback_keys
    }

    fn find_key_memento(&self, key: &KeyEntry) -> Option<usize> {
        self.key_mementos.iter().position(|m| {
            m.device_id == key.device_id
                && m.source == key.source
                && m.key_code == key.key_code
                && m.scan_code == key.scan_code
        })
    }

    fn find_motion_memento(&self, motion: &MotionEntry, hovering: bool) -> Option<usize> {
        self.motion_mementos.iter().position(|m| {
            m.device_id == motion.device_id && m.source == motion.source && m.hovering == hovering
        })
    }

    fn add_motion_memento(
        &mut self,
        motion: &MotionEntry,
        policy_flags: PolicyFlags,
        flags: i32,
        hovering: bool,
    ) {
        self.motion_mementos.push(MotionMemento {
            device_id: motion.device_id,
            source: motion.source,
            flags: MotionFlags(flags),
            x_precision: motion.x_precision,
            y_precision: motion.y_precision,
            down_time: motion.down_time,
            pointer_properties: motion.pointer_properties.clone(),
            pointer_coords: motion.pointer_coords.clone(),
            hovering,
            policy_flags,
        });
    }
}
