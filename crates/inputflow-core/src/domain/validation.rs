//! Structural validation performed at admission.
//!
//! Anything that fails here is rejected before it reaches the inbound queue.
//! The dispatcher logs the error and moves on; callers never see it.

use thiserror::Error;

use super::codes::{key_action, motion_action, MAX_POINTERS, MAX_POINTER_ID};
use super::event::{NotifyKeyArgs, NotifyMotionArgs};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid key action {0}")]
    InvalidKeyAction(i32),

    #[error("invalid motion action 0x{0:x}")]
    InvalidMotionAction(i32),

    #[error("pointer count {0} outside 1..={max}", max = MAX_POINTERS)]
    InvalidPointerCount(usize),

    #[error("pointer arrays disagree: {properties} properties, {coords} coords")]
    PointerArrayMismatch { properties: usize, coords: usize },

    #[error("pointer index {index} out of range for {count} pointers")]
    InvalidPointerIndex { index: usize, count: usize },

    #[error("pointer id {0} outside 0..={max}", max = MAX_POINTER_ID)]
    InvalidPointerId(i32),

    #[error("duplicate pointer id {0}")]
    DuplicatePointerId(i32),
}

pub fn validate_key_event(args: &NotifyKeyArgs) -> Result<(), ValidationError> {
    if key_action::is_valid(args.action) {
        Ok(())
    } else {
        Err(ValidationError::InvalidKeyAction(args.action))
    }
}

pub fn validate_motion_event(args: &NotifyMotionArgs) -> Result<(), ValidationError> {
    let count = args.pointer_properties.len();
    if count != args.pointer_coords.len() {
        return Err(ValidationError::PointerArrayMismatch {
            properties: count,
            coords: args.pointer_coords.len(),
        });
    }
    if count < 1 || count > MAX_POINTERS {
        return Err(ValidationError::InvalidPointerCount(count));
    }

    match motion_action::masked(args.action) {
        motion_action::DOWN
        | motion_action::UP
        | motion_action::CANCEL
        | motion_action::MOVE
        | motion_action::OUTSIDE
        | motion_action::HOVER_ENTER
        | motion_action::HOVER_MOVE
        | motion_action::HOVER_EXIT
        | motion_action::SCROLL => {}
        motion_action::POINTER_DOWN | motion_action::POINTER_UP => {
            let index = motion_action::pointer_index(args.action);
            if index >= count {
                return Err(ValidationError::InvalidPointerIndex { index, count });
            }
        }
        _ => return Err(ValidationError::InvalidMotionAction(args.action)),
    }

    let mut seen: u32 = 0;
    for props in &args.pointer_properties {
        if !(0..=MAX_POINTER_ID).contains(&props.id) {
            return Err(ValidationError::InvalidPointerId(props.id));
        }
        let bit = 1u32 << props.id;
        if seen & bit != 0 {
            return Err(ValidationError::DuplicatePointerId(props.id));
        }
        seen |= bit;
    }
    Ok(())
}
