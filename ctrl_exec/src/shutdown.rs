//! # Fail-safe Shutdown
//!
//! On a termination signal, or when the main loop fails, the controller must leave the vehicle
//! braking with its steering centred before exiting. This module holds everything that path
//! needs, in a form usable from a signal handler:
//!
//! 1. Release every lock this process holds.
//! 2. Acquire the control lock, blocking for as long as it takes.
//! 3. Write the fail-safe command.
//! 4. Release the control lock.
//!
//! The control lock wait is never abandoned. A fixed diagnostic is written to stderr for every
//! warning interval it lasts, so a stalled actuator process shows up in its output.
//!
//! Nothing on this path allocates, logs or takes a mutex.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use conquer_once::OnceCell;
use std::{io, mem, ptr, sync::Arc, time::Duration};
use thiserror::Error;

// Internal
use crate::controller::Controller;
use comms_if::{
    eqpt::{ControlCommand, ControlRecord},
    shmem::{AccessMode, ChannelLock, ShmRegion},
    sig::{term_sigset, TermSignalMask, TERM_SIGNALS},
};

// ------------------------------------------------------------------------------------------------
// STATICS
// ------------------------------------------------------------------------------------------------

static SHUTDOWN_CONTEXT: OnceCell<ShutdownContext> = OnceCell::uninit();

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const MSG_FAIL_SAFE: &[u8] = b"ctrl_exec: terminated, fail-safe command written\n";

const MSG_LOCK_WAIT: &[u8] = b"ctrl_exec: failing safe, still waiting for the control lock\n";

const MSG_NO_CONTEXT: &[u8] = b"ctrl_exec: terminated before the fail-safe was installed\n";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Handles to the locks and the control region, shared with the main loop.
pub struct ShutdownContext {
    /// Every channel lock, including the control lock
    locks: Vec<Arc<ChannelLock>>,

    control_region: Arc<ShmRegion<ControlRecord>>,

    control_lock: Arc<ChannelLock>,

    /// Interval between diagnostics while waiting for the control lock
    lock_warn_interval: Duration,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Failures of the fail-safe path. Messages are static so they can be reported from a signal
/// handler.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FailSafeError {
    #[error("{}", FailSafeError::NotInstalled.message())]
    NotInstalled,

    #[error("{}", FailSafeError::Acquire.message())]
    Acquire,

    #[error("{}", FailSafeError::Write.message())]
    Write,

    #[error("{}", FailSafeError::Post.message())]
    Post,
}

/// Errors setting up the fail-safe path.
#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("The fail-safe shutdown is already installed")]
    AlreadyInstalled,

    #[error("The control region \"{0}\" is not writable")]
    ControlNotWritable(String),

    #[error("Could not install the handler for signal {0}: {1}")]
    Sigaction(libc::c_int, io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ShutdownContext {
    /// Collect the handles the fail-safe path needs from the controller.
    pub fn new(
        controller: &Controller,
        lock_warn_interval: Duration,
    ) -> Result<Self, ShutdownError> {
        let control = controller.control();

        if control.region().mode() != AccessMode::ReadWrite {
            return Err(ShutdownError::ControlNotWritable(control.name().into()));
        }

        Ok(Self {
            locks: controller.locks(),
            control_region: control.region().clone(),
            control_lock: control.lock().clone(),
            lock_warn_interval,
        })
    }

    /// Bring the control channel to the fail-safe command.
    ///
    /// Blocks until the control lock is free. Returns the number of warning intervals spent
    /// waiting for it.
    ///
    /// Async-signal-safe. Termination signals should be blocked when calling this outside the
    /// handler, so the handler cannot run it a second time concurrently.
    pub fn fail_safe(&self) -> Result<u32, FailSafeError> {
        // A failed release is not fatal here, the lock is recovered on process exit
        for lock in self.locks.iter() {
            let _ = lock.release_if_held();
        }

        let mut waits: u32 = 0;
        loop {
            match self.control_lock.acquire_within(self.lock_warn_interval) {
                Ok(true) => break,
                Ok(false) => {
                    waits = waits.saturating_add(1);
                    write_stderr(MSG_LOCK_WAIT);
                }
                Err(_) => return Err(FailSafeError::Acquire),
            }
        }

        let record = ControlRecord::from(&ControlCommand::fail_safe());
        let written = self.control_region.write(&record).is_ok();
        let posted = self.control_lock.release_if_held().is_ok();

        if !written {
            Err(FailSafeError::Write)
        } else if !posted {
            Err(FailSafeError::Post)
        } else {
            Ok(waits)
        }
    }
}

impl FailSafeError {
    /// Static description of the error.
    pub fn message(&self) -> &'static str {
        match self {
            FailSafeError::NotInstalled => "the fail-safe shutdown was never installed",
            FailSafeError::Acquire => "could not wait on the control lock",
            FailSafeError::Write => "could not write the fail-safe command",
            FailSafeError::Post => "could not release the control lock",
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Install the fail-safe handler for every termination signal.
///
/// While the handler runs the other termination signals are blocked.
pub fn install(ctx: ShutdownContext) -> Result<(), ShutdownError> {
    SHUTDOWN_CONTEXT
        .try_init_once(|| ctx)
        .map_err(|_| ShutdownError::AlreadyInstalled)?;

    // SAFETY: sigaction is plain data, every field used is set below.
    let mut action: libc::sigaction = unsafe { mem::zeroed() };
    action.sa_sigaction = on_termination_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    action.sa_mask = term_sigset();
    action.sa_flags = 0;

    for &sig in TERM_SIGNALS.iter() {
        // SAFETY: action is fully initialised and the handler is async-signal-safe.
        if unsafe { libc::sigaction(sig, &action, ptr::null_mut()) } != 0 {
            return Err(ShutdownError::Sigaction(sig, io::Error::last_os_error()));
        }
    }

    Ok(())
}

/// Run the fail-safe path from normal code, with termination signals blocked.
pub fn fail_safe_now() -> Result<u32, FailSafeError> {
    // Without the mask a signal could run the handler part way through, which still leaves the
    // channel failed safe, so a masking failure is not a reason to skip the fail-safe
    let _mask = TermSignalMask::block().ok();

    match SHUTDOWN_CONTEXT.get() {
        Some(ctx) => ctx.fail_safe(),
        None => Err(FailSafeError::NotInstalled),
    }
}

extern "C" fn on_termination_signal(_sig: libc::c_int) {
    let code = match SHUTDOWN_CONTEXT.get() {
        Some(ctx) => match ctx.fail_safe() {
            Ok(_) => {
                write_stderr(MSG_FAIL_SAFE);
                0
            }
            Err(e) => {
                write_stderr(b"ctrl_exec: terminated, ");
                write_stderr(e.message().as_bytes());
                write_stderr(b"\n");
                1
            }
        },
        None => {
            write_stderr(MSG_NO_CONTEXT);
            1
        }
    };

    // SAFETY: _exit is async-signal-safe and does not return.
    unsafe { libc::_exit(code) }
}

/// Write directly to stderr, ignoring failures.
fn write_stderr(msg: &[u8]) {
    // SAFETY: msg is valid for msg.len() bytes.
    unsafe {
        libc::write(
            libc::STDERR_FILENO,
            msg.as_ptr() as *const libc::c_void,
            msg.len(),
        );
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::controller::test_util::TestChannels;
    use comms_if::{eqpt::PlanSample, shmem::SyncChannel};
    use std::thread;

    const WARN_INTERVAL: Duration = Duration::from_millis(20);

    fn assert_failed_safe(channels: &TestChannels, ctx: &ShutdownContext) {
        for lock in ctx.locks.iter() {
            assert!(!lock.is_held(), "lock \"{}\" still held", lock.name());
            assert_eq!(lock.sem_value().unwrap(), 1);
        }
        assert_eq!(channels.read_control(), ControlCommand::fail_safe());
    }

    fn drive_forwards(channels: &TestChannels, controller: &mut Controller) {
        channels.publish_plan(&PlanSample {
            valid: true,
            frame_id: 1,
            target_pos: 0.3,
            target_speed: 0.8,
            ..Default::default()
        });
        controller.cycle().unwrap();
        assert_ne!(channels.read_control(), ControlCommand::fail_safe());
    }

    #[test]
    fn test_between_cycles() {
        let channels = TestChannels::create(true);
        let mut controller = channels.controller();
        drive_forwards(&channels, &mut controller);

        let ctx = ShutdownContext::new(&controller, WARN_INTERVAL).unwrap();
        assert_eq!(ctx.fail_safe(), Ok(0));
        assert_failed_safe(&channels, &ctx);
    }

    #[test]
    fn test_interrupted_holding_input_lock() {
        let channels = TestChannels::create(true);
        let mut controller = channels.controller();
        drive_forwards(&channels, &mut controller);

        let ctx = ShutdownContext::new(&controller, WARN_INTERVAL).unwrap();

        // Interrupted while copying the inputs out
        let plan_lock = &ctx.locks[0];
        let sensor_lock = &ctx.locks[1];
        assert!(plan_lock.acquire_within(WARN_INTERVAL).unwrap());
        assert!(sensor_lock.acquire_within(WARN_INTERVAL).unwrap());
        assert!(plan_lock.is_held() && sensor_lock.is_held());

        assert_eq!(ctx.fail_safe(), Ok(0));
        assert_failed_safe(&channels, &ctx);
    }

    #[test]
    fn test_interrupted_holding_control_lock() {
        let channels = TestChannels::create(false);
        let mut controller = channels.controller();
        drive_forwards(&channels, &mut controller);

        // Interrupted between acquiring the control lock and releasing it
        let guard = controller.control().acquire().unwrap();
        std::mem::forget(guard);
        assert!(controller.control().is_held());

        let ctx = ShutdownContext::new(&controller, WARN_INTERVAL).unwrap();
        assert_eq!(ctx.fail_safe(), Ok(0));
        assert_failed_safe(&channels, &ctx);
    }

    #[test]
    fn test_waits_for_control_lock_held_elsewhere() {
        let channels = TestChannels::create(false);
        let mut controller = channels.controller();
        drive_forwards(&channels, &mut controller);
        let before = channels.read_control();

        // A consumer part way through reading the command
        let consumer =
            SyncChannel::<ControlRecord>::open(&channels.params.control, AccessMode::ReadOnly)
                .unwrap();
        let guard = consumer.acquire().unwrap();

        let ctx = Arc::new(ShutdownContext::new(&controller, WARN_INTERVAL).unwrap());
        let handler_ctx = ctx.clone();
        let handler = thread::spawn(move || handler_ctx.fail_safe());

        // Nothing is written or posted while the consumer holds the lock
        thread::sleep(WARN_INTERVAL * 5);
        assert_eq!(ControlCommand::from(guard.read()), before);
        assert_eq!(consumer.lock().sem_value().unwrap(), 0);
        guard.release().unwrap();

        let waits = handler.join().unwrap().unwrap();
        assert!(waits >= 1);

        assert!(!controller.control().is_held());
        assert_eq!(consumer.lock().sem_value().unwrap(), 1);
        assert_failed_safe(&channels, &ctx);
    }

    #[test]
    fn test_termination_signal_fails_safe() {
        let channels = TestChannels::create(true);
        let mut controller = channels.controller();
        drive_forwards(&channels, &mut controller);

        // Everything the child needs is allocated before forking
        let ctx = ShutdownContext::new(&controller, WARN_INTERVAL).unwrap();
        let plan_lock = ctx.locks[0].clone();

        // SAFETY: the child only performs lock operations and raises a signal before exiting.
        let pid = unsafe { libc::fork() };
        assert!(pid >= 0, "fork failed: {}", io::Error::last_os_error());

        if pid == 0 {
            // SAFETY: every call below is async-signal-safe and the child never returns.
            unsafe {
                // Killed by SIGALRM rather than hanging the parent
                libc::alarm(10);

                if install(ctx).is_err() {
                    libc::_exit(3);
                }

                // Interrupted in the middle of a cycle, holding the plan and control locks
                match plan_lock.acquire_within(WARN_INTERVAL) {
                    Ok(true) => (),
                    _ => libc::_exit(4),
                }
                match controller.control().acquire() {
                    Ok(guard) => mem::forget(guard),
                    Err(_) => libc::_exit(5),
                }

                libc::raise(libc::SIGTERM);
                libc::_exit(6);
            }
        }

        let mut status: libc::c_int = 0;
        // SAFETY: pid is a child of this process and status a valid out pointer.
        let waited = unsafe { libc::waitpid(pid, &mut status, 0) };
        assert_eq!(waited, pid);
        assert!(libc::WIFEXITED(status), "child did not exit, status {}", status);
        assert_eq!(libc::WEXITSTATUS(status), 0);

        assert_eq!(channels.read_control(), ControlCommand::fail_safe());
        assert_eq!(channels.plan.lock().sem_value().unwrap(), 1);
        assert_eq!(
            channels.sensor.as_ref().unwrap().lock().sem_value().unwrap(),
            1
        );
        assert_eq!(channels.control.lock().sem_value().unwrap(), 1);
    }

    #[test]
    fn test_read_only_control_rejected() {
        let channels = TestChannels::create(false);
        let controller = Controller::from_channels(
            SyncChannel::open(&channels.params.plan, AccessMode::ReadOnly).unwrap(),
            None,
            SyncChannel::open(&channels.params.control, AccessMode::ReadOnly).unwrap(),
            crate::drive_ctrl::DriveCtrl::default(),
            None,
        );

        assert!(matches!(
            ShutdownContext::new(&controller, WARN_INTERVAL),
            Err(ShutdownError::ControlNotWritable(_))
        ));
    }
}
