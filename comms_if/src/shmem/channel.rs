//! # Synchronised Channels

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{error, warn};
use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use super::{AccessMode, ChannelParams, IpcError, NamedSem, ShmRecord, ShmRegion};
use crate::sig::TermSignalMask;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Length of a single lock wait slice. Termination signals are masked during a slice and
/// deliverable between slices, so this bounds how late a signal can be handled while waiting.
pub const LOCK_WAIT_SLICE: Duration = Duration::from_millis(10);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The lock of a channel, a named semaphore used as a mutex, plus a flag recording whether this
/// process currently holds it.
///
/// The `held` flag is the only state shared with the fail-safe signal handler. It is only changed
/// with termination signals masked, in the same critical section as the semaphore operation it
/// describes.
pub struct ChannelLock {
    sem: NamedSem,

    held: AtomicBool,
}

/// A shared memory region guarded by a named semaphore.
pub struct SyncChannel<T: ShmRecord> {
    region: Arc<ShmRegion<T>>,

    lock: Arc<ChannelLock>,

    /// Lock waits longer than this are reported, and again every further interval.
    warn_after: Option<Duration>,
}

/// Exclusive access to a channel's record.
///
/// The lock is released by [`ChannelGuard::release`], or on drop if that was never called.
pub struct ChannelGuard<'a, T: ShmRecord> {
    channel: &'a SyncChannel<T>,

    released: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ChannelLock {
    fn new(sem: NamedSem) -> Self {
        Self {
            sem,
            held: AtomicBool::new(false),
        }
    }

    /// Name of the underlying semaphore.
    pub fn name(&self) -> &str {
        self.sem.name()
    }

    /// True if this process holds the lock.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    /// Current value of the underlying semaphore, 1 when free and 0 when taken.
    pub fn sem_value(&self) -> io::Result<i32> {
        self.sem.value()
    }

    /// Wait for the lock with no upper bound.
    ///
    /// The wait is performed in [`LOCK_WAIT_SLICE`] slices with termination signals masked, so the
    /// held flag is set in the same masked section as the successful wait.
    fn acquire(&self, warn_after: Option<Duration>) -> Result<(), IpcError> {
        let start = Instant::now();
        let mut next_warning = warn_after;

        loop {
            let mask = TermSignalMask::block().map_err(IpcError::SignalMask)?;

            let acquired = self
                .sem
                .timed_wait(LOCK_WAIT_SLICE)
                .map_err(|source| IpcError::Wait {
                    name: self.name().into(),
                    source,
                })?;

            if acquired {
                self.held.store(true, Ordering::SeqCst);
                drop(mask);
                return Ok(());
            }

            // Let any pending termination signal in before the next slice
            drop(mask);

            if let (Some(limit), Some(interval)) = (next_warning, warn_after) {
                let waited = start.elapsed();
                if waited >= limit {
                    warn!(
                        "Waited {:.3} s for lock \"{}\", its holder may have stalled",
                        waited.as_secs_f64(),
                        self.name()
                    );
                    next_warning = Some(limit + interval);
                }
            }
        }
    }

    /// Release the lock.
    fn release(&self) -> Result<(), IpcError> {
        let _mask = TermSignalMask::block().map_err(IpcError::SignalMask)?;

        self.sem.post().map_err(|source| IpcError::Post {
            name: self.name().into(),
            source,
        })?;
        self.held.store(false, Ordering::SeqCst);

        Ok(())
    }

    /// Post the lock if this process holds it, clearing the held flag.
    ///
    /// Returns whether the lock was held. Safe to call from a signal handler.
    pub fn release_if_held(&self) -> io::Result<bool> {
        if self.held.swap(false, Ordering::SeqCst) {
            self.sem.post()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Wait at most `timeout` for the lock, setting the held flag on success.
    ///
    /// Returns whether the lock was acquired. Safe to call from a signal handler.
    pub fn acquire_within(&self, timeout: Duration) -> io::Result<bool> {
        let acquired = self.sem.timed_wait(timeout)?;
        if acquired {
            self.held.store(true, Ordering::SeqCst);
        }

        Ok(acquired)
    }
}

impl<T: ShmRecord> SyncChannel<T> {
    /// Open an existing channel created by another process.
    pub fn open(params: &ChannelParams, mode: AccessMode) -> Result<Self, IpcError> {
        let region = ShmRegion::open(&params.shm_name, mode)?;
        let sem = NamedSem::open(&params.sem_name)?;

        Ok(Self::from_parts(region, sem))
    }

    /// Create the region and semaphore of a channel, the semaphore starting unlocked.
    pub fn create(params: &ChannelParams) -> Result<Self, IpcError> {
        let region = ShmRegion::create(&params.shm_name)?;
        let sem = NamedSem::create(&params.sem_name, 1)?;

        Ok(Self::from_parts(region, sem))
    }

    /// Remove the region and semaphore of a channel.
    pub fn unlink(params: &ChannelParams) -> Result<(), IpcError> {
        let region_result = ShmRegion::<T>::unlink(&params.shm_name);
        NamedSem::unlink(&params.sem_name)?;
        region_result
    }

    /// Report lock waits longer than `warn_after`.
    pub fn with_lock_warning(mut self, warn_after: Option<Duration>) -> Self {
        self.warn_after = warn_after;
        self
    }

    /// Block until exclusive access to the record is obtained.
    pub fn acquire(&self) -> Result<ChannelGuard<'_, T>, IpcError> {
        self.lock.acquire(self.warn_after)?;

        Ok(ChannelGuard {
            channel: self,
            released: false,
        })
    }

    /// Name of the region.
    pub fn name(&self) -> &str {
        self.region.name()
    }

    /// True if this process holds the channel's lock.
    pub fn is_held(&self) -> bool {
        self.lock.is_held()
    }

    /// Shared handle to the channel's lock.
    pub fn lock(&self) -> &Arc<ChannelLock> {
        &self.lock
    }

    /// Shared handle to the channel's region.
    pub fn region(&self) -> &Arc<ShmRegion<T>> {
        &self.region
    }

    fn from_parts(region: ShmRegion<T>, sem: NamedSem) -> Self {
        Self {
            region: Arc::new(region),
            lock: Arc::new(ChannelLock::new(sem)),
            warn_after: None,
        }
    }
}

impl<'a, T: ShmRecord> ChannelGuard<'a, T> {
    /// Read a copy of the record.
    pub fn read(&self) -> T {
        self.channel.region.read()
    }

    /// Overwrite the record.
    pub fn write(&self, value: &T) -> Result<(), IpcError> {
        self.channel.region.write(value)
    }

    /// Release the lock, reporting any failure to post it.
    pub fn release(mut self) -> Result<(), IpcError> {
        self.released = true;
        self.channel.lock.release()
    }
}

impl<'a, T: ShmRecord> Drop for ChannelGuard<'a, T> {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.channel.lock.release() {
                error!("Could not release lock on drop: {}", e);
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        eqpt::{ControlCommand, ControlRecord, PlanRecord},
        shmem::test_util::unique_params,
    };
    use std::thread;

    #[test]
    fn test_round_trip_under_lock() {
        let params = unique_params("round_trip");
        let writer = SyncChannel::<ControlRecord>::create(&params).unwrap();
        let reader = SyncChannel::<ControlRecord>::open(&params, AccessMode::ReadOnly).unwrap();

        let mut cmd = ControlCommand::fail_safe();
        cmd.channels[0].pulse_frac = 0.625;
        cmd.channels[1].active = false;

        let guard = writer.acquire().unwrap();
        guard.write(&ControlRecord::from(&cmd)).unwrap();
        guard.release().unwrap();

        let guard = reader.acquire().unwrap();
        let read_back = ControlCommand::from(guard.read());
        guard.release().unwrap();

        assert_eq!(read_back, cmd);

        SyncChannel::<ControlRecord>::unlink(&params).unwrap();
    }

    #[test]
    fn test_held_flag_tracks_lock() {
        let params = unique_params("held");
        let channel = SyncChannel::<PlanRecord>::create(&params).unwrap();

        assert!(!channel.is_held());
        assert_eq!(channel.lock().sem_value().unwrap(), 1);

        let guard = channel.acquire().unwrap();
        assert!(channel.is_held());
        assert_eq!(channel.lock().sem_value().unwrap(), 0);
        guard.release().unwrap();

        assert!(!channel.is_held());
        assert_eq!(channel.lock().sem_value().unwrap(), 1);

        // Dropping without an explicit release must release too
        {
            let _guard = channel.acquire().unwrap();
            assert!(channel.is_held());
        }
        assert!(!channel.is_held());
        assert_eq!(channel.lock().sem_value().unwrap(), 1);

        SyncChannel::<PlanRecord>::unlink(&params).unwrap();
    }

    #[test]
    fn test_release_if_held() {
        let params = unique_params("release_if_held");
        let channel = SyncChannel::<PlanRecord>::create(&params).unwrap();

        assert!(!channel.lock().release_if_held().unwrap());
        assert_eq!(channel.lock().sem_value().unwrap(), 1);

        // Simulate an interrupted cycle which never reaches its release
        let guard = channel.acquire().unwrap();
        std::mem::forget(guard);

        assert!(channel.lock().release_if_held().unwrap());
        assert!(!channel.is_held());
        assert_eq!(channel.lock().sem_value().unwrap(), 1);

        SyncChannel::<PlanRecord>::unlink(&params).unwrap();
    }

    #[test]
    fn test_acquire_blocks_until_released() {
        let params = unique_params("blocking");
        let owner = SyncChannel::<PlanRecord>::create(&params).unwrap();

        let guard = owner.acquire().unwrap();

        let other_params = params.clone();
        let other = thread::spawn(move || {
            let channel = SyncChannel::<PlanRecord>::open(&other_params, AccessMode::ReadOnly)
                .unwrap()
                .with_lock_warning(Some(Duration::from_millis(20)));
            let start = Instant::now();
            let guard = channel.acquire().unwrap();
            let record = guard.read();
            guard.release().unwrap();
            (start.elapsed(), record.frame_id)
        });

        thread::sleep(Duration::from_millis(100));
        guard
            .write(&PlanRecord {
                frame_id: 12,
                ..Default::default()
            })
            .unwrap();
        guard.release().unwrap();

        let (waited, frame_id) = other.join().unwrap();
        assert!(waited >= Duration::from_millis(50));
        assert_eq!(frame_id, 12);

        SyncChannel::<PlanRecord>::unlink(&params).unwrap();
    }

    #[test]
    fn test_write_to_read_only_channel() {
        let params = unique_params("read_only");
        let _owner = SyncChannel::<PlanRecord>::create(&params).unwrap();
        let reader = SyncChannel::<PlanRecord>::open(&params, AccessMode::ReadOnly).unwrap();

        {
            let guard = reader.acquire().unwrap();
            assert!(matches!(
                guard.write(&PlanRecord::default()),
                Err(IpcError::ReadOnly(_))
            ));
        }

        // The failed write still released the lock on the way out
        assert!(!reader.is_held());
        assert_eq!(reader.lock().sem_value().unwrap(), 1);

        SyncChannel::<PlanRecord>::unlink(&params).unwrap();
    }
}
