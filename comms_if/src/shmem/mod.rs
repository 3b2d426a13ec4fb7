//! # Shared Memory Module
//!
//! This module provides abstractions over POSIX shared memory and named semaphores, the
//! mechanisms chosen for exchanging data between the vehicle's processes.
//!
//! A [`SyncChannel`] pairs a region holding one fixed-size record with a named semaphore used
//! purely as a mutex (initial value 1). Readers never wait for *new* data, only for exclusive
//! access; freshness is decided by the sequence counter inside each record.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod channel;
mod region;
mod sem;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::ffi::CString;

pub use channel::*;
pub use region::*;
pub use sem::*;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A record which can be placed in a shared memory region.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]`, must not contain pointers or references, and every bit
/// pattern must be a valid value of the type, since the other side of the region may be written
/// by any process.
pub unsafe trait ShmRecord: Copy + Default + 'static {}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Names of the objects making up a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelParams {
    /// Name of the shared memory region, e.g. `"/ctrl_shmem_plan"`
    pub shm_name: String,

    /// Name of the semaphore guarding the region, e.g. `"/ctrl_sem_plan"`
    pub sem_name: String,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// How a region is mapped into this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// The region is owned by another process and is only read here.
    ReadOnly,

    /// The region is owned by this process.
    ReadWrite,
}

/// Errors which can occur while opening or using a channel.
#[derive(thiserror::Error, Debug)]
pub enum IpcError {
    #[error("Invalid object name \"{0}\", names must start with '/' and contain no nul bytes")]
    InvalidName(String),

    #[error("Could not open shared memory region \"{name}\": {source}")]
    ShmOpen { name: String, source: std::io::Error },

    #[error("Could not size shared memory region \"{name}\": {source}")]
    ShmSize { name: String, source: std::io::Error },

    #[error("Shared memory region \"{name}\" is {found} bytes, expected at least {expected}")]
    ShmTooSmall {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("Could not map shared memory region \"{name}\": {source}")]
    ShmMap { name: String, source: std::io::Error },

    #[error("Could not unlink \"{name}\": {source}")]
    Unlink { name: String, source: std::io::Error },

    #[error("Shared memory region \"{0}\" is mapped read only")]
    ReadOnly(String),

    #[error("Could not open semaphore \"{name}\": {source}")]
    SemOpen { name: String, source: std::io::Error },

    #[error("Waiting on semaphore \"{name}\" failed: {source}")]
    Wait { name: String, source: std::io::Error },

    #[error("Posting semaphore \"{name}\" failed: {source}")]
    Post { name: String, source: std::io::Error },

    #[error("Could not mask termination signals: {0}")]
    SignalMask(std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Convert a POSIX object name into a C string.
pub(crate) fn c_name(name: &str) -> Result<CString, IpcError> {
    if !name.starts_with('/') {
        return Err(IpcError::InvalidName(name.into()));
    }

    CString::new(name).map_err(|_| IpcError::InvalidName(name.into()))
}
