//! # Shared Memory Simulator
//!
//! Stands in for the planner, the sensor process and the actuator driver on a bench. Creates the
//! channels named in `ctrl_exec.toml`, publishes a plan whose target position sweeps sinusoidally
//! and a sensor stream whose wheel speed follows the published throttle, and logs the control
//! commands written by `ctrl_exec`. Everything is unlinked on exit.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use log::{debug, info, warn};
use std::{
    f64::consts::PI,
    mem, ptr,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};
use structopt::StructOpt;

// Internal
use comms_if::{
    eqpt::{ControlCommand, ControlRecord, PlanRecord, PlanSample, SensorSample},
    shmem::SyncChannel,
    sig::TERM_SIGNALS,
};
use ctrl_lib::params::CtrlExecParams;
use util::{
    logger::{logger_flush, logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// STATICS
// ------------------------------------------------------------------------------------------------

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Command line options
#[derive(Debug, StructOpt)]
#[structopt(name = "shmem_sim", about = "Bench stand-in for the processes around ctrl_exec")]
struct Opts {
    /// Plan publication rate
    #[structopt(long, default_value = "22")]
    plan_rate_hz: f64,

    /// Sensor publication rate
    #[structopt(long, default_value = "50")]
    sensor_rate_hz: f64,

    /// Amplitude of the target position sweep
    #[structopt(long, default_value = "0.5")]
    amplitude: f32,

    /// Period of the target position sweep
    #[structopt(long, default_value = "4.0")]
    sweep_period_s: f64,

    /// Target speed of every plan
    #[structopt(long, default_value = "0.3")]
    target_speed: f32,

    /// Distance reported by the ultrasound sensor
    #[structopt(long, default_value = "200.0")]
    obstacle_cm: f64,

    /// Wheel speed reached at full throttle
    #[structopt(long, default_value = "6000.0")]
    max_rpm: f64,

    /// Stop after this long, otherwise run until interrupted
    #[structopt(long)]
    duration_s: Option<f64>,
}

/// The channels, unlinked when dropped.
struct SimChannels {
    params: CtrlExecParams,
    plan: SyncChannel<PlanRecord>,
    sensor: Option<SyncChannel<SensorSample>>,
    control: SyncChannel<ControlRecord>,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    let session = Session::new("shmem_sim", "sessions")
        .wrap_err("Failed to create the session")?;

    logger_init(LevelFilter::Info, &session).wrap_err("Failed to initialise logging")?;

    info!("Shared Memory Simulator\n");
    info!("Options: {:#?}", opts);

    let params: CtrlExecParams =
        util::params::load("ctrl_exec.toml").wrap_err("Could not load ctrl_exec params")?;

    // ---- CHANNELS ----

    let channels = SimChannels::create(params).wrap_err("Failed to create the channels")?;

    install_stop_handler();

    info!("Channels created, publishing\n");

    // ---- MAIN LOOP ----

    let start = Instant::now();
    let plan_period = Duration::from_secs_f64(1.0 / opts.plan_rate_hz);
    let sensor_period = Duration::from_secs_f64(1.0 / opts.sensor_rate_hz);
    let report_period = Duration::from_secs(1);

    let mut next_plan = start;
    let mut next_sensor = start;
    let mut next_report = start + report_period;

    let mut frame_id = 0u32;
    let mut time_step = 0u32;
    let mut last_cmd = ControlCommand::default();

    let result = loop {
        if STOP_REQUESTED.load(Ordering::SeqCst) {
            info!("Stop requested");
            break Ok(());
        }

        let now = Instant::now();

        if let Some(d) = opts.duration_s {
            if (now - start).as_secs_f64() >= d {
                info!("Duration elapsed");
                break Ok(());
            }
        }

        if now >= next_plan {
            let elapsed_s = (now - start).as_secs_f64();
            let plan = PlanSample {
                valid: true,
                frame_id,
                target_pos: opts.amplitude
                    * (2.0 * PI * elapsed_s / opts.sweep_period_s).sin() as f32,
                target_speed: opts.target_speed,
                ..Default::default()
            };

            if let Err(e) = channels.publish_plan(&plan) {
                break Err(e);
            }
            frame_id = frame_id.wrapping_add(1);
            next_plan += plan_period;

            last_cmd = match channels.read_control() {
                Ok(c) => c,
                Err(e) => break Err(e),
            };
            debug!("Control: {:?}", last_cmd);
        }

        if now >= next_sensor {
            // Wheel speed follows the forward part of the throttle demand
            let throttle = (last_cmd.throttle().pulse_frac as f64 * 2.0 - 1.0).max(0.0);
            let sample = SensorSample {
                time_step,
                ultrasound_left: opts.obstacle_cm,
                hall_effect_rpm: throttle * opts.max_rpm,
            };

            if let Err(e) = channels.publish_sensor(&sample) {
                break Err(e);
            }
            time_step = time_step.wrapping_add(1);
            next_sensor += sensor_period;
        }

        if now >= next_report {
            info!(
                "Frame {}: steer pulse {:.3}, throttle pulse {:.3}",
                frame_id,
                last_cmd.steer().pulse_frac,
                last_cmd.throttle().pulse_frac
            );
            next_report += report_period;
        }

        let next = next_plan.min(next_sensor).min(next_report);
        if let Some(d) = next.checked_duration_since(Instant::now()) {
            thread::sleep(d);
        }
    };

    // ---- SHUTDOWN ----

    drop(channels);
    info!("Channels unlinked");
    logger_flush();

    result.wrap_err("Channel failure")
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimChannels {
    fn create(params: CtrlExecParams) -> Result<Self, comms_if::shmem::IpcError> {
        // A semaphore left taken by a killed run would be reused as is, so start from scratch
        SyncChannel::<PlanRecord>::unlink(&params.plan).ok();
        if let Some(ref p) = params.sensor {
            SyncChannel::<SensorSample>::unlink(p).ok();
        }
        SyncChannel::<ControlRecord>::unlink(&params.control).ok();

        let plan = SyncChannel::create(&params.plan)?;
        let sensor = match params.sensor {
            Some(ref p) => Some(SyncChannel::create(p)?),
            None => None,
        };
        let control = SyncChannel::create(&params.control)?;

        // ctrl_exec reads the control region as a command, start it failed safe
        let guard = control.acquire()?;
        guard.write(&ControlRecord::from(&ControlCommand::fail_safe()))?;
        guard.release()?;

        Ok(Self {
            params,
            plan,
            sensor,
            control,
        })
    }

    fn publish_plan(&self, plan: &PlanSample) -> Result<(), comms_if::shmem::IpcError> {
        let guard = self.plan.acquire()?;
        guard.write(&PlanRecord::from(plan))?;
        guard.release()
    }

    fn publish_sensor(&self, sample: &SensorSample) -> Result<(), comms_if::shmem::IpcError> {
        if let Some(ref channel) = self.sensor {
            let guard = channel.acquire()?;
            guard.write(sample)?;
            guard.release()?;
        }
        Ok(())
    }

    fn read_control(&self) -> Result<ControlCommand, comms_if::shmem::IpcError> {
        let guard = self.control.acquire()?;
        let cmd = ControlCommand::from(guard.read());
        guard.release()?;
        Ok(cmd)
    }
}

impl Drop for SimChannels {
    fn drop(&mut self) {
        if let Err(e) = SyncChannel::<PlanRecord>::unlink(&self.params.plan) {
            warn!("{}", e);
        }
        if let Some(ref p) = self.params.sensor {
            if let Err(e) = SyncChannel::<SensorSample>::unlink(p) {
                warn!("{}", e);
            }
        }
        if let Err(e) = SyncChannel::<ControlRecord>::unlink(&self.params.control) {
            warn!("{}", e);
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

extern "C" fn on_stop_signal(_sig: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
}

/// Request a clean stop on any termination signal.
fn install_stop_handler() {
    // SAFETY: sigaction is plain data, every field used is set below.
    let mut action: libc::sigaction = unsafe { mem::zeroed() };
    action.sa_sigaction = on_stop_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
    action.sa_flags = 0;

    for &sig in TERM_SIGNALS.iter() {
        // SAFETY: the handler only stores to an atomic.
        if unsafe { libc::sigaction(sig, &action, ptr::null_mut()) } != 0 {
            warn!("Could not install the stop handler for signal {}", sig);
        }
    }
}
