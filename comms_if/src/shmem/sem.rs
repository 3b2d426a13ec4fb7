//! # Named Semaphores

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{io, mem, ptr::NonNull, time::Duration};

use super::{c_name, IpcError};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const NANOS_PER_SECOND: libc::c_long = 1_000_000_000;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A named POSIX semaphore.
///
/// `wait`, `timed_wait` and `post` neither allocate nor log, and are safe to call from a signal
/// handler.
pub struct NamedSem {
    name: String,

    sem: NonNull<libc::sem_t>,
}

// SAFETY: POSIX semaphores may be used concurrently from any thread.
unsafe impl Send for NamedSem {}
unsafe impl Sync for NamedSem {}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl NamedSem {
    /// Open an existing semaphore.
    pub fn open(name: &str) -> Result<Self, IpcError> {
        let c_name = c_name(name)?;

        // SAFETY: c_name is a valid nul terminated string.
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };

        Self::from_raw(name, sem)
    }

    /// Create (or reuse) a semaphore with the given initial value.
    ///
    /// If the semaphore already exists its value is left untouched.
    pub fn create(name: &str, value: u32) -> Result<Self, IpcError> {
        let c_name = c_name(name)?;

        // SAFETY: c_name is a valid nul terminated string, the variadic mode and value arguments
        // are passed with the promoted types sem_open expects.
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT,
                0o666 as libc::c_uint,
                value as libc::c_uint,
            )
        };

        Self::from_raw(name, sem)
    }

    /// Remove the named semaphore. Open handles stay valid until dropped.
    pub fn unlink(name: &str) -> Result<(), IpcError> {
        let c_name = c_name(name)?;

        // SAFETY: c_name is a valid nul terminated string.
        if unsafe { libc::sem_unlink(c_name.as_ptr()) } == -1 {
            return Err(IpcError::Unlink {
                name: name.into(),
                source: io::Error::last_os_error(),
            });
        }

        Ok(())
    }

    /// Block until the semaphore can be decremented.
    pub fn wait(&self) -> io::Result<()> {
        loop {
            // SAFETY: sem is an open semaphore.
            if unsafe { libc::sem_wait(self.sem.as_ptr()) } == 0 {
                return Ok(());
            }

            let e = io::Error::last_os_error();
            if e.raw_os_error() != Some(libc::EINTR) {
                return Err(e);
            }
        }
    }

    /// Block until the semaphore can be decremented or `timeout` elapses.
    ///
    /// Returns `Ok(true)` if the semaphore was decremented and `Ok(false)` on timeout.
    pub fn timed_wait(&self, timeout: Duration) -> io::Result<bool> {
        let deadline = realtime_deadline(timeout)?;

        loop {
            // SAFETY: sem is an open semaphore and deadline a valid timespec.
            if unsafe { libc::sem_timedwait(self.sem.as_ptr(), &deadline) } == 0 {
                return Ok(true);
            }

            let e = io::Error::last_os_error();
            match e.raw_os_error() {
                Some(libc::ETIMEDOUT) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(e),
            }
        }
    }

    /// Increment the semaphore.
    pub fn post(&self) -> io::Result<()> {
        // SAFETY: sem is an open semaphore.
        if unsafe { libc::sem_post(self.sem.as_ptr()) } == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(())
    }

    /// Current value of the semaphore.
    pub fn value(&self) -> io::Result<i32> {
        let mut value: libc::c_int = 0;

        // SAFETY: sem is an open semaphore and value a valid out pointer.
        if unsafe { libc::sem_getvalue(self.sem.as_ptr(), &mut value) } == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(value)
    }

    /// Name of the semaphore.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn from_raw(name: &str, sem: *mut libc::sem_t) -> Result<Self, IpcError> {
        if sem == libc::SEM_FAILED {
            return Err(IpcError::SemOpen {
                name: name.into(),
                source: io::Error::last_os_error(),
            });
        }

        let sem = NonNull::new(sem).ok_or_else(|| IpcError::SemOpen {
            name: name.into(),
            source: io::Error::from(io::ErrorKind::InvalidData),
        })?;

        Ok(Self {
            name: name.into(),
            sem,
        })
    }
}

impl Drop for NamedSem {
    fn drop(&mut self) {
        // SAFETY: sem was returned by sem_open and is closed exactly once.
        unsafe {
            libc::sem_close(self.sem.as_ptr());
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Absolute `CLOCK_REALTIME` deadline `timeout` from now, as required by `sem_timedwait`.
fn realtime_deadline(timeout: Duration) -> io::Result<libc::timespec> {
    // SAFETY: timespec is plain data and is fully written by clock_gettime on success.
    let mut now: libc::timespec = unsafe { mem::zeroed() };
    if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } == -1 {
        return Err(io::Error::last_os_error());
    }

    let mut secs = now.tv_sec + timeout.as_secs() as libc::time_t;
    let mut nanos = now.tv_nsec + timeout.subsec_nanos() as libc::c_long;
    if nanos >= NANOS_PER_SECOND {
        secs += 1;
        nanos -= NANOS_PER_SECOND;
    }

    Ok(libc::timespec {
        tv_sec: secs,
        tv_nsec: nanos,
    })
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::shmem::test_util::unique_params;

    #[test]
    fn test_timed_wait() {
        let params = unique_params("sem");
        let sem = NamedSem::create(&params.sem_name, 1).unwrap();

        assert_eq!(sem.value().unwrap(), 1);
        assert!(sem.timed_wait(Duration::from_millis(10)).unwrap());
        assert_eq!(sem.value().unwrap(), 0);

        // Already taken, so this one times out
        assert!(!sem.timed_wait(Duration::from_millis(10)).unwrap());

        sem.post().unwrap();
        assert_eq!(sem.value().unwrap(), 1);

        NamedSem::unlink(&params.sem_name).unwrap();
    }

    #[test]
    fn test_create_keeps_existing_value() {
        let params = unique_params("sem_reuse");
        let first = NamedSem::create(&params.sem_name, 1).unwrap();
        first.wait().unwrap();

        let second = NamedSem::create(&params.sem_name, 1).unwrap();
        assert_eq!(second.value().unwrap(), 0);

        second.post().unwrap();
        NamedSem::unlink(&params.sem_name).unwrap();
    }
}
