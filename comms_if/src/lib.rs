//! # Communications interface crate.
//!
//! Provides all common communications interfaces between the control executable and the processes
//! it cooperates with. All exchange happens through named shared memory regions, each guarded by a
//! named semaphore used as a mutex.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Record definitions for equipment (planner, sensors, actuators)
pub mod eqpt;

/// Shared memory module
pub mod shmem;

/// Termination signal masking
pub mod sig;
