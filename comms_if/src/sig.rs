//! # Termination Signal Masking
//!
//! The control executable's fail-safe handler runs on delivery of a termination signal and reads
//! the `held` flag of every channel lock. Lock bookkeeping therefore blocks these signals while a
//! semaphore operation and its flag update are in flight, so the handler never observes one
//! without the other.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{io, mem, ptr};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Signals which request termination of the process.
pub const TERM_SIGNALS: [libc::c_int; 4] =
    [libc::SIGINT, libc::SIGTERM, libc::SIGHUP, libc::SIGQUIT];

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Blocks the termination signals for as long as it is alive, restoring the previous mask on drop.
///
/// Signals raised while blocked stay pending and are delivered as soon as the mask is dropped.
pub struct TermSignalMask {
    previous: libc::sigset_t,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl TermSignalMask {
    /// Block the termination signals on the calling thread.
    pub fn block() -> io::Result<Self> {
        let set = term_sigset();

        // SAFETY: an all-zero sigset_t is a valid argument to be overwritten by pthread_sigmask.
        let mut previous: libc::sigset_t = unsafe { mem::zeroed() };

        // SAFETY: both sets are valid for the duration of the call.
        let ret = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, &mut previous) };
        if ret != 0 {
            return Err(io::Error::from_raw_os_error(ret));
        }

        Ok(Self { previous })
    }
}

impl Drop for TermSignalMask {
    fn drop(&mut self) {
        // SAFETY: `previous` was filled in by pthread_sigmask. Restoring a mask we read back
        // cannot fail with a valid `how`.
        unsafe {
            libc::pthread_sigmask(libc::SIG_SETMASK, &self.previous, ptr::null_mut());
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Build a signal set containing all [`TERM_SIGNALS`].
pub fn term_sigset() -> libc::sigset_t {
    // SAFETY: sigemptyset initialises the set before any sigaddset call reads it.
    unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        libc::sigemptyset(&mut set);
        for &sig in TERM_SIGNALS.iter() {
            libc::sigaddset(&mut set, sig);
        }
        set
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn is_blocked(sig: libc::c_int) -> bool {
        unsafe {
            let mut current: libc::sigset_t = mem::zeroed();
            libc::pthread_sigmask(libc::SIG_BLOCK, ptr::null(), &mut current);
            libc::sigismember(&current, sig) == 1
        }
    }

    #[test]
    fn test_mask_restored_on_drop() {
        assert!(!is_blocked(libc::SIGTERM));

        {
            let _mask = TermSignalMask::block().unwrap();
            for &sig in TERM_SIGNALS.iter() {
                assert!(is_blocked(sig));
            }
        }

        assert!(!is_blocked(libc::SIGTERM));
    }
}
