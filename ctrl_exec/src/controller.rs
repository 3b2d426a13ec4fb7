//! # Controller
//!
//! The controller owns the channels and the drive control module, and runs the main loop:
//!
//! 1. Copy the plan out of its channel.
//! 2. Copy the sensor sample out of its channel, if one is configured.
//! 3. Run drive control on the copies.
//! 4. Write the resulting command into the control channel.
//!
//! Every lock is held only for the copy in or out, never while drive control runs.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use log::{info, trace, warn};
use std::{
    convert::Infallible,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

// Internal
use crate::{
    drive_ctrl::{self, DriveCtrl, StatusReport},
    params::CtrlExecParams,
};
use comms_if::{
    eqpt::{ControlCommand, ControlRecord, PlanRecord, PlanSample, SensorSample},
    shmem::{AccessMode, ChannelLock, IpcError, SyncChannel},
};
use util::module::State;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct Controller {
    plan: SyncChannel<PlanRecord>,

    sensor: Option<SyncChannel<SensorSample>>,

    control: SyncChannel<ControlRecord>,

    drive_ctrl: DriveCtrl,

    /// Target period of one cycle, if the loop is rate limited
    cycle_period: Option<Duration>,

    num_cycles: u64,

    num_consec_cycle_overruns: u64,

    /// Report of the previous cycle, used to log state changes
    last_report: StatusReport,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Controller {
    /// Open the channels named in the parameters.
    ///
    /// The plan and sensor channels are opened read only, the control channel read-write. All of
    /// them must already have been created by their owners.
    pub fn open(params: &CtrlExecParams, drive_ctrl: DriveCtrl) -> Result<Self, IpcError> {
        let warn_after = params.lock_warn_after();

        let plan = SyncChannel::open(&params.plan, AccessMode::ReadOnly)?
            .with_lock_warning(warn_after);
        info!("Plan channel \"{}\" opened", plan.name());

        let sensor = match params.sensor {
            Some(ref p) => {
                let sensor = SyncChannel::open(p, AccessMode::ReadOnly)?
                    .with_lock_warning(warn_after);
                info!("Sensor channel \"{}\" opened", sensor.name());
                Some(sensor)
            }
            None => {
                info!("No sensor channel configured, the throttle follows the plan");
                None
            }
        };

        let control = SyncChannel::open(&params.control, AccessMode::ReadWrite)?
            .with_lock_warning(warn_after);
        info!("Control channel \"{}\" opened", control.name());

        Ok(Self::from_channels(
            plan,
            sensor,
            control,
            drive_ctrl,
            params.cycle_period(),
        ))
    }

    /// Build a controller from already open channels.
    pub fn from_channels(
        plan: SyncChannel<PlanRecord>,
        sensor: Option<SyncChannel<SensorSample>>,
        control: SyncChannel<ControlRecord>,
        drive_ctrl: DriveCtrl,
        cycle_period: Option<Duration>,
    ) -> Self {
        Self {
            plan,
            sensor,
            control,
            drive_ctrl,
            cycle_period,
            num_cycles: 0,
            num_consec_cycle_overruns: 0,
            last_report: StatusReport::default(),
        }
    }

    /// Run the main loop until an IPC failure occurs.
    pub fn run(&mut self) -> Result<Infallible, IpcError> {
        loop {
            let cycle_start_instant = Instant::now();

            self.cycle()?;

            // ---- CYCLE MANAGEMENT ----

            let cycle_period = match self.cycle_period {
                Some(p) => p,
                None => continue,
            };

            let cycle_dur = Instant::now() - cycle_start_instant;

            match cycle_period.checked_sub(cycle_dur) {
                Some(d) => {
                    self.num_consec_cycle_overruns = 0;
                    thread::sleep(d);
                }
                None => {
                    warn!(
                        "Cycle overran by {:.06} s",
                        cycle_dur.as_secs_f64() - cycle_period.as_secs_f64()
                    );
                    self.num_consec_cycle_overruns += 1;
                }
            }
        }
    }

    /// Perform a single cycle, returning the published command.
    pub fn cycle(&mut self) -> Result<(ControlCommand, StatusReport), IpcError> {
        // ---- INPUTS ----

        let guard = self.plan.acquire()?;
        let plan = PlanSample::from(guard.read());
        guard.release()?;

        let sensor = match self.sensor {
            Some(ref channel) => {
                let guard = channel.acquire()?;
                let sample = guard.read();
                guard.release()?;
                Some(sample)
            }
            None => None,
        };

        // ---- PROCESSING ----

        let input = drive_ctrl::InputData {
            now: Instant::now(),
            plan,
            sensor,
        };

        let (cmd, report) = match self.drive_ctrl.proc(&input) {
            Ok(r) => r,
            Err(e) => match e {},
        };

        trace!("Cycle {}: {:?}", self.num_cycles, report);

        // ---- OUTPUT ----

        let guard = self.control.acquire()?;
        guard.write(&ControlRecord::from(&cmd))?;
        guard.release()?;

        self.log_transitions(&report);
        self.last_report = report;
        self.num_cycles += 1;

        Ok((cmd, report))
    }

    /// Locks of every channel, control last.
    pub fn locks(&self) -> Vec<Arc<ChannelLock>> {
        let mut locks = vec![self.plan.lock().clone()];
        if let Some(ref sensor) = self.sensor {
            locks.push(sensor.lock().clone());
        }
        locks.push(self.control.lock().clone());

        locks
    }

    pub fn control(&self) -> &SyncChannel<ControlRecord> {
        &self.control
    }

    pub fn drive_ctrl(&self) -> &DriveCtrl {
        &self.drive_ctrl
    }

    pub fn num_cycles(&self) -> u64 {
        self.num_cycles
    }

    pub fn num_consec_cycle_overruns(&self) -> u64 {
        self.num_consec_cycle_overruns
    }

    fn log_transitions(&self, report: &StatusReport) {
        match (self.last_report.estop_active, report.estop_active) {
            (false, true) => warn!(
                "Emergency stop engaged, obstacle within {} cm",
                self.drive_ctrl.params().emergency_stop_dist_cm
            ),
            (true, false) => info!("Emergency stop released"),
            _ => (),
        }

        match (self.last_report.input_fault, report.input_fault) {
            (None, Some(f)) => warn!("Input fault {:?}, outputs forced to neutral", f),
            (Some(a), Some(b)) if a != b => {
                warn!("Input fault changed from {:?} to {:?}", a, b)
            }
            (Some(_), None) => info!("Input fault cleared"),
            _ => (),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TEST UTILITIES
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use comms_if::shmem::ChannelParams;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NUM_TEST_CHANNELS: AtomicUsize = AtomicUsize::new(0);

    fn unique_params(tag: &str) -> ChannelParams {
        let n = NUM_TEST_CHANNELS.fetch_add(1, Ordering::Relaxed);
        ChannelParams {
            shm_name: format!("/ctrl_exec_test_{}_{}_{}_shm", tag, std::process::id(), n),
            sem_name: format!("/ctrl_exec_test_{}_{}_{}_sem", tag, std::process::id(), n),
        }
    }

    /// The producer and consumer sides of a set of channels, unlinked on drop.
    pub struct TestChannels {
        pub params: CtrlExecParams,
        pub plan: SyncChannel<PlanRecord>,
        pub sensor: Option<SyncChannel<SensorSample>>,
        pub control: SyncChannel<ControlRecord>,
    }

    impl TestChannels {
        pub fn create(with_sensor: bool) -> Self {
            let params = CtrlExecParams {
                plan: unique_params("plan"),
                sensor: if with_sensor {
                    Some(unique_params("sensor"))
                } else {
                    None
                },
                control: unique_params("control"),
                cycle_period_s: None,
                lock_warn_after_s: None,
                shutdown_lock_warn_s: 0.1,
            };

            Self {
                plan: SyncChannel::create(&params.plan).unwrap(),
                sensor: params
                    .sensor
                    .as_ref()
                    .map(|p| SyncChannel::create(p).unwrap()),
                control: SyncChannel::create(&params.control).unwrap(),
                params,
            }
        }

        pub fn publish_plan(&self, plan: &PlanSample) {
            let guard = self.plan.acquire().unwrap();
            guard.write(&PlanRecord::from(plan)).unwrap();
            guard.release().unwrap();
        }

        pub fn publish_sensor(&self, sample: &SensorSample) {
            let channel = self.sensor.as_ref().unwrap();
            let guard = channel.acquire().unwrap();
            guard.write(sample).unwrap();
            guard.release().unwrap();
        }

        pub fn read_control(&self) -> ControlCommand {
            let guard = self.control.acquire().unwrap();
            let cmd = ControlCommand::from(guard.read());
            guard.release().unwrap();
            cmd
        }

        pub fn controller(&self) -> Controller {
            Controller::open(&self.params, DriveCtrl::default()).unwrap()
        }
    }

    impl Drop for TestChannels {
        fn drop(&mut self) {
            SyncChannel::<PlanRecord>::unlink(&self.params.plan).ok();
            if let Some(ref p) = self.params.sensor {
                SyncChannel::<SensorSample>::unlink(p).ok();
            }
            SyncChannel::<ControlRecord>::unlink(&self.params.control).ok();
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
