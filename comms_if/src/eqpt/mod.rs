//! # Equipment Interface
//!
//! This module defines the records which are exchanged with equipment processes through shared
//! memory. Each region holds exactly one record, whose `#[repr(C)]` layout is the wire contract.
//! Flags travel as single bytes so that a C producer writing a `uint8_t` can never create an
//! invalid value on this side.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod control;
pub mod plan;
pub mod sensor;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use control::*;
pub use plan::*;
pub use sensor::*;

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Convert a wire flag byte into a `bool`, any non-zero value being `true`.
pub(crate) fn flag_to_bool(flag: u8) -> bool {
    flag != 0
}

/// Convert a `bool` into a wire flag byte.
pub(crate) fn bool_to_flag(value: bool) -> u8 {
    value as u8
}
