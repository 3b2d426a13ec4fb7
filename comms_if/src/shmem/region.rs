//! # Shared Memory Regions

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{io, marker::PhantomData, mem, ptr, ptr::NonNull};

use super::{c_name, AccessMode, IpcError, ShmRecord};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A named POSIX shared memory region holding a single record of type `T`.
///
/// The mapping is released when the region is dropped. The region object itself persists until it
/// is unlinked with [`ShmRegion::unlink`].
pub struct ShmRegion<T: ShmRecord> {
    name: String,

    ptr: NonNull<T>,

    mode: AccessMode,

    _marker: PhantomData<T>,
}

// SAFETY: the mapping is process-wide and every access goes through volatile reads/writes of a
// plain-data record. Exclusion between users is provided by the channel's semaphore.
unsafe impl<T: ShmRecord> Send for ShmRegion<T> {}
unsafe impl<T: ShmRecord> Sync for ShmRegion<T> {}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<T: ShmRecord> ShmRegion<T> {
    /// Map an existing region created by another process.
    ///
    /// The region must be at least as large as `T`.
    pub fn open(name: &str, mode: AccessMode) -> Result<Self, IpcError> {
        let c_name = c_name(name)?;

        let oflag = match mode {
            AccessMode::ReadOnly => libc::O_RDONLY,
            AccessMode::ReadWrite => libc::O_RDWR,
        };

        // SAFETY: c_name is a valid nul terminated string.
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), oflag, 0) };
        if fd == -1 {
            return Err(IpcError::ShmOpen {
                name: name.into(),
                source: io::Error::last_os_error(),
            });
        }

        let region = Self::map_fd(name, fd, mode);

        // The mapping keeps the region alive, the descriptor is no longer needed.
        // SAFETY: fd was returned by shm_open above.
        unsafe { libc::close(fd) };

        region
    }

    /// Create (or reuse) a region sized for `T` and reset its contents to `T::default()`.
    ///
    /// This is the producer side of [`ShmRegion::open`], used by the process owning the region and
    /// by bench tools standing in for the other processes.
    pub fn create(name: &str) -> Result<Self, IpcError> {
        let c_name = c_name(name)?;

        // SAFETY: c_name is a valid nul terminated string.
        let fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR,
                0o666 as libc::mode_t,
            )
        };
        if fd == -1 {
            return Err(IpcError::ShmOpen {
                name: name.into(),
                source: io::Error::last_os_error(),
            });
        }

        // SAFETY: fd is a valid descriptor opened for writing.
        if unsafe { libc::ftruncate(fd, mem::size_of::<T>() as libc::off_t) } == -1 {
            let source = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(IpcError::ShmSize {
                name: name.into(),
                source,
            });
        }

        let region = Self::map_fd(name, fd, AccessMode::ReadWrite);
        unsafe { libc::close(fd) };

        let region = region?;
        region.write(&T::default())?;

        Ok(region)
    }

    /// Remove the named region. Existing mappings stay valid until dropped.
    pub fn unlink(name: &str) -> Result<(), IpcError> {
        let c_name = c_name(name)?;

        // SAFETY: c_name is a valid nul terminated string.
        if unsafe { libc::shm_unlink(c_name.as_ptr()) } == -1 {
            return Err(IpcError::Unlink {
                name: name.into(),
                source: io::Error::last_os_error(),
            });
        }

        Ok(())
    }

    /// Read a copy of the record.
    pub fn read(&self) -> T {
        // SAFETY: ptr is a live, aligned mapping of at least size_of::<T>() bytes and any bit
        // pattern is a valid T.
        unsafe { ptr::read_volatile(self.ptr.as_ptr()) }
    }

    /// Overwrite the record.
    ///
    /// On a writable region this performs a single volatile store and neither allocates nor
    /// blocks, so it may be used from a signal handler.
    pub fn write(&self, value: &T) -> Result<(), IpcError> {
        if self.mode == AccessMode::ReadOnly {
            return Err(IpcError::ReadOnly(self.name.clone()));
        }

        // SAFETY: the mapping is writable, live, aligned and large enough for a T.
        unsafe { ptr::write_volatile(self.ptr.as_ptr(), *value) };

        Ok(())
    }

    /// Name of the region.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// How the region is mapped.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    fn map_fd(name: &str, fd: libc::c_int, mode: AccessMode) -> Result<Self, IpcError> {
        let size = mem::size_of::<T>();

        // SAFETY: stat is plain data and is fully written by fstat on success.
        let mut stat: libc::stat = unsafe { mem::zeroed() };
        if unsafe { libc::fstat(fd, &mut stat) } == -1 {
            return Err(IpcError::ShmSize {
                name: name.into(),
                source: io::Error::last_os_error(),
            });
        }

        if (stat.st_size as usize) < size {
            return Err(IpcError::ShmTooSmall {
                name: name.into(),
                expected: size,
                found: stat.st_size as usize,
            });
        }

        let prot = match mode {
            AccessMode::ReadOnly => libc::PROT_READ,
            AccessMode::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        };

        // SAFETY: fd refers to a region of at least `size` bytes, opened with matching access.
        let addr = unsafe { libc::mmap(ptr::null_mut(), size, prot, libc::MAP_SHARED, fd, 0) };
        if addr == libc::MAP_FAILED {
            return Err(IpcError::ShmMap {
                name: name.into(),
                source: io::Error::last_os_error(),
            });
        }

        let ptr = NonNull::new(addr as *mut T).ok_or_else(|| IpcError::ShmMap {
            name: name.into(),
            source: io::Error::from(io::ErrorKind::InvalidData),
        })?;

        Ok(Self {
            name: name.into(),
            ptr,
            mode,
            _marker: PhantomData,
        })
    }
}

impl<T: ShmRecord> Drop for ShmRegion<T> {
    fn drop(&mut self) {
        // SAFETY: ptr and size are exactly those passed to mmap.
        unsafe {
            libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, mem::size_of::<T>());
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{eqpt::SensorSample, shmem::test_util::unique_params};

    #[test]
    fn test_create_open_read_write() {
        let params = unique_params("region");

        let owner = ShmRegion::<SensorSample>::create(&params.shm_name).unwrap();
        let reader = ShmRegion::<SensorSample>::open(&params.shm_name, AccessMode::ReadOnly)
            .unwrap();

        assert_eq!(reader.read(), SensorSample::default());

        let sample = SensorSample {
            time_step: 7,
            ultrasound_left: 42.5,
            hall_effect_rpm: 1200.0,
        };
        owner.write(&sample).unwrap();
        assert_eq!(reader.read(), sample);

        match reader.write(&sample) {
            Err(IpcError::ReadOnly(name)) => assert_eq!(name, params.shm_name),
            other => panic!("Expected a read only error, got {:?}", other.err()),
        }

        ShmRegion::<SensorSample>::unlink(&params.shm_name).unwrap();
    }

    #[test]
    fn test_open_missing_region() {
        let params = unique_params("missing");

        assert!(matches!(
            ShmRegion::<SensorSample>::open(&params.shm_name, AccessMode::ReadOnly),
            Err(IpcError::ShmOpen { .. })
        ));
    }

    #[test]
    fn test_invalid_name() {
        assert!(matches!(
            ShmRegion::<SensorSample>::create("no_leading_slash"),
            Err(IpcError::InvalidName(_))
        ));
    }
}
