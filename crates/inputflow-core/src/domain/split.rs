//! Splitting a multi-pointer motion event between targets.
//!
//! When a target only owns some of the pointers of a gesture, it receives a
//! copy of the event that carries just those pointers.  The action is
//! rewritten so that the copy is self-consistent: a `POINTER_DOWN` of the
//! target's only pointer becomes a plain `DOWN`, and a pointer change that
//! concerns someone else's pointer becomes a `MOVE`.

use tracing::warn;

use super::codes::motion_action;
use super::event::{EventEntry, EventKind, MotionEntry};

/// Returns a copy of `original` restricted to the pointers in `pointer_ids`.
///
/// Returns `None` when `original` is not a motion event or when the bit set
/// names pointers the event does not carry.
pub fn split_motion_event(original: &EventEntry, pointer_ids: u32) -> Option<EventEntry> {
    let motion = original.motion()?;

    let mut properties = Vec::with_capacity(motion.pointer_count());
    let mut coords = Vec::with_capacity(motion.pointer_count());
    for (props, c) in motion.pointer_properties.iter().zip(&motion.pointer_coords) {
        if (0..32).contains(&props.id) && pointer_ids & (1 << props.id) != 0 {
            properties.push(*props);
            coords.push(*c);
        }
    }

    if properties.is_empty() || properties.len() != pointer_ids.count_ones() as usize {
        // Happens when a window claims a pointer that was already released.
        warn!(
            "dropping split motion event: requested pointers 0x{:08x}, event carries {} of them",
            pointer_ids,
            properties.len()
        );
        return None;
    }

    let masked = motion_action::masked(motion.action);
    let action = match masked {
        motion_action::POINTER_DOWN | motion_action::POINTER_UP => {
            let index = motion_action::pointer_index(motion.action);
            let changed_id = motion.pointer_properties.get(index)?.id;
            match properties.iter().position(|p| p.id == changed_id) {
                Some(_) if properties.len() == 1 => {
                    if masked == motion_action::POINTER_DOWN {
                        motion_action::DOWN
                    } else {
                        motion_action::UP
                    }
                }
                Some(split_index) => motion_action::with_pointer_index(masked, split_index),
                None => motion_action::MOVE,
            }
        }
        _ => motion.action,
    };

    let split = MotionEntry {
        action,
        pointer_properties: properties,
        pointer_coords: coords,
        ..motion.clone()
    };
    Some(EventEntry::new(
        original.event_time,
        original.policy_flags,
        EventKind::Motion(split),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::codes::source;
    use crate::domain::event::{PointerCoords, PointerProperties};
    use crate::domain::flags::{MotionFlags, PolicyFlags};

    fn multi_touch(action: i32, ids: &[i32]) -> EventEntry {
        EventEntry::new(
            50,
            PolicyFlags::default(),
            EventKind::Motion(MotionEntry {
                device_id: 1,
                source: source::TOUCHSCREEN,
                action,
                flags: MotionFlags::default(),
                meta_state: 0,
                button_state: 0,
                edge_flags: 0,
                x_precision: 1.0,
                y_precision: 1.0,
                down_time: 10,
                pointer_properties: ids
                    .iter()
                    .map(|&id| PointerProperties { id, tool_type: 1 })
                    .collect(),
                pointer_coords: ids
                    .iter()
                    .map(|&id| PointerCoords::at(id as f32, id as f32))
                    .collect(),
                targets: Vec::new(),
            }),
        )
    }

    fn action_of(entry: &EventEntry) -> i32 {
        entry.motion().map(|m| m.action).unwrap_or(-1)
    }

    #[test]
    fn test_split_keeps_only_requested_pointers() {
        let event = multi_touch(motion_action::MOVE, &[0, 1, 2]);

        let split = split_motion_event(&event, 0b101).expect("split");

        let ids: Vec<i32> = split
            .motion()
            .map(|m| m.pointer_properties.iter().map(|p| p.id).collect())
            .unwrap_or_default();
        assert_eq!(ids, vec![0, 2]);
        assert_eq!(action_of(&split), motion_action::MOVE);
    }

    #[test]
    fn test_pointer_down_of_sole_pointer_becomes_down() {
        let action = motion_action::with_pointer_index(motion_action::POINTER_DOWN, 1);
        let event = multi_touch(action, &[0, 1]);

        let split = split_motion_event(&event, 0b10).expect("split");

        assert_eq!(action_of(&split), motion_action::DOWN);
    }

    #[test]
    fn test_pointer_up_of_other_pointer_becomes_move() {
        let action = motion_action::with_pointer_index(motion_action::POINTER_UP, 1);
        let event = multi_touch(action, &[0, 1]);

        let split = split_motion_event(&event, 0b01).expect("split");

        assert_eq!(action_of(&split), motion_action::MOVE);
    }

    #[test]
    fn test_pointer_index_is_remapped() {
        let action = motion_action::with_pointer_index(motion_action::POINTER_DOWN, 2);
        let event = multi_touch(action, &[0, 1, 2]);

        let split = split_motion_event(&event, 0b110).expect("split");

        assert_eq!(
            action_of(&split),
            motion_action::with_pointer_index(motion_action::POINTER_DOWN, 1)
        );
    }

    #[test]
    fn test_missing_pointer_yields_none() {
        let event = multi_touch(motion_action::MOVE, &[0]);

        assert!(split_motion_event(&event, 0b10).is_none());
        assert!(split_motion_event(&event, 0b11).is_none());
    }
}
