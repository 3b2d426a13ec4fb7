//! # Plan Record
//!
//! The trajectory target published by the planner. The planner increments `frame_id` every time it
//! publishes a new sample, which is what consumers use to tell new data from a repeated read.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Serialize;

use super::{bool_to_flag, flag_to_bool};
use crate::shmem::ShmRecord;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of waypoints carried in each plan record.
pub const PLAN_NUM_WAYPOINTS: usize = 10;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Wire layout of the plan region.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PlanRecord {
    pub valid: u8,
    pub frame_id: u32,
    pub target_pos: f32,
    pub target_speed: f32,
    pub waypoints: [[u16; 2]; PLAN_NUM_WAYPOINTS],
    pub waypoints_valid: u8,
}

/// A plan sample as seen by the control loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct PlanSample {
    /// True if the planner considers this sample usable.
    pub valid: bool,

    /// Sequence counter, incremented by the planner on every publication.
    pub frame_id: u32,

    /// Lateral offset of the target from the vehicle centreline, nominally in [-1, 1] but not
    /// clamped by the planner.
    pub target_pos: f32,

    /// Target speed, nominally in [-1, 1] (full brake to full throttle).
    pub target_speed: f32,

    /// Waypoints in sensing frame pixel coordinates, nearest first.
    ///
    /// Units: pixels
    pub waypoints: [(u16, u16); PLAN_NUM_WAYPOINTS],

    /// True if `waypoints` holds data.
    pub waypoints_valid: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

// SAFETY: `#[repr(C)]`, no pointers, every bit pattern of every field is a valid value.
unsafe impl ShmRecord for PlanRecord {}

impl From<PlanRecord> for PlanSample {
    fn from(record: PlanRecord) -> Self {
        let mut waypoints = [(0u16, 0u16); PLAN_NUM_WAYPOINTS];
        for (dst, src) in waypoints.iter_mut().zip(record.waypoints.iter()) {
            *dst = (src[0], src[1]);
        }

        Self {
            valid: flag_to_bool(record.valid),
            frame_id: record.frame_id,
            target_pos: record.target_pos,
            target_speed: record.target_speed,
            waypoints,
            waypoints_valid: flag_to_bool(record.waypoints_valid),
        }
    }
}

impl From<&PlanSample> for PlanRecord {
    fn from(sample: &PlanSample) -> Self {
        let mut waypoints = [[0u16; 2]; PLAN_NUM_WAYPOINTS];
        for (dst, src) in waypoints.iter_mut().zip(sample.waypoints.iter()) {
            *dst = [src.0, src.1];
        }

        Self {
            valid: bool_to_flag(sample.valid),
            frame_id: sample.frame_id,
            target_pos: sample.target_pos,
            target_speed: sample.target_speed,
            waypoints,
            waypoints_valid: bool_to_flag(sample.waypoints_valid),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
