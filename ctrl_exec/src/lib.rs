//! # Control library.
//!
//! This library allows the executables and benchmarks in this crate to access the items making up
//! the control executable.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Controller aggregate - owns the channels and runs the control loop
pub mod controller;

/// Drive control module - converts plan and sensor samples into PWM demands
pub mod drive_ctrl;

/// Executable parameters
pub mod params;

/// Fail-safe shutdown - neutralises actuation on termination signals and fatal errors
pub mod shutdown;
