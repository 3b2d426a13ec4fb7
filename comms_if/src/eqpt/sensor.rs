//! # Sensor Record
//!
//! Vehicle telemetry published by the sensor process, at a higher rate than the plan.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Serialize;

use crate::shmem::ShmRecord;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A sensor sample. This is both the wire layout of the sensor region and the value seen by the
/// control loop, as none of its fields need conversion.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct SensorSample {
    /// Sequence counter, incremented by the sensor process on every publication.
    pub time_step: u32,

    /// Distance to the nearest obstacle seen by the left ultrasound sensor.
    ///
    /// Units: centimetres
    pub ultrasound_left: f64,

    /// Wheel speed measured by the hall effect sensor.
    ///
    /// Units: revolutions per minute
    pub hall_effect_rpm: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

// SAFETY: `#[repr(C)]`, no pointers, every bit pattern of every field is a valid value.
unsafe impl ShmRecord for SensorSample {}
