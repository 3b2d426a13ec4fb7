//! Utility library for the vehicle control software
//!
//! Provides the pieces every executable shares: the session directory, logging, parameter
//! loading, archiving of records and the interface cyclic modules implement.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod archive;
pub mod host;
pub mod logger;
pub mod maths;
pub mod module;
pub mod params;
pub mod session;
