//! # Control Executable
//!
//! Reads the plan (and optionally the sensor data) published by other processes through shared
//! memory, drives the steering and throttle PID controllers, and publishes PWM demands for the
//! actuators.
//!
//! # Architecture
//!
//!     - Initialise the session, logger, parameters and drive control
//!     - Open the channels and install the fail-safe shutdown
//!     - Main loop:
//!         - Input acquisition from the plan and sensor channels
//!         - Drive control processing
//!         - Publication to the control channel
//!
//! Any IPC failure in the main loop is fatal: the fail-safe command is written and the
//! executable exits with an error. A termination signal runs the same fail-safe from the signal
//! handler.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Result};
use log::{error, info, warn};
use structopt::StructOpt;

// Internal
use ctrl_lib::{
    controller::Controller,
    drive_ctrl::{self, DeploymentTarget, DriveCtrl},
    params::CtrlExecParams,
    shutdown::{self, ShutdownContext},
};
use util::{
    host,
    logger::{logger_flush, logger_init_with_overrides, LevelFilter},
    module::State,
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Levels of the modules which log on every cycle, unless `--trace-cycles` is given.
const CYCLE_LOG_OVERRIDES: [(&str, LevelFilter); 2] = [
    ("ctrl_lib::controller", LevelFilter::Debug),
    ("ctrl_lib::drive_ctrl", LevelFilter::Debug),
];

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Command line options
#[derive(Debug, StructOpt)]
#[structopt(name = "ctrl_exec", about = "Vehicle steering and throttle control")]
struct Opts {
    /// Deployment target ("sim" or "hw"), overrides the one in drive_ctrl.toml
    #[structopt(long)]
    target: Option<DeploymentTarget>,

    /// Do not record the PID telemetry
    #[structopt(long)]
    no_telemetry: bool,

    /// Log a trace line for every cycle and PID step
    #[structopt(long)]
    trace_cycles: bool,
}

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("ctrl_exec", "sessions")
        .wrap_err("Failed to create the session")?;

    // Initialise logger
    let overrides: &[(&'static str, LevelFilter)] = if opts.trace_cycles {
        &[]
    } else {
        &CYCLE_LOG_OVERRIDES
    };
    logger_init_with_overrides(LevelFilter::Trace, overrides, &session)
        .wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Control Executable\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let exec_params: CtrlExecParams =
        util::params::load("ctrl_exec.toml").wrap_err("Could not load ctrl_exec params")?;
    exec_params
        .validate()
        .wrap_err("Invalid ctrl_exec params")?;

    let mut drive_params: drive_ctrl::Params =
        util::params::load("drive_ctrl.toml").wrap_err("Could not load drive_ctrl params")?;
    if let Some(target) = opts.target {
        drive_params.target = target;
    }
    if opts.no_telemetry {
        drive_params.record_telemetry = false;
    }
    drive_params
        .validate(exec_params.sensor.is_some())
        .wrap_err("Invalid drive_ctrl params")?;

    info!("Parameters loaded");
    info!("    Deployment target: {:?}", drive_params.target);
    info!("    Throttle mode: {:?}", drive_params.throttle_mode);
    info!("    Telemetry: {}", drive_params.record_telemetry);

    // ---- INITIALISE MODULES ----

    let mut drive_ctrl = DriveCtrl::default();
    drive_ctrl
        .init(drive_params, &session)
        .wrap_err("Failed to initialise DriveCtrl")?;
    info!("DriveCtrl init complete");

    // ---- INITIALISE CHANNELS ----

    let mut controller =
        Controller::open(&exec_params, drive_ctrl).wrap_err("Failed to open the channels")?;

    shutdown::install(
        ShutdownContext::new(&controller, exec_params.shutdown_lock_warn())
            .wrap_err("Failed to build the fail-safe context")?,
    )
    .wrap_err("Failed to install the fail-safe shutdown")?;
    info!("Fail-safe shutdown installed");

    // ---- MAIN LOOP ----

    info!("Beginning main loop\n");

    let err = match controller.run() {
        Ok(never) => match never {},
        Err(e) => e,
    };

    // ---- FATAL SHUTDOWN ----

    error!(
        "IPC failure after {} cycles, failing safe: {}",
        controller.num_cycles(),
        err
    );

    match shutdown::fail_safe_now() {
        Ok(0) => info!("Fail-safe command written"),
        Ok(waits) => warn!(
            "Fail-safe command written after {} waits for the control lock",
            waits
        ),
        Err(e) => error!("Fail-safe failed: {}", e),
    }

    logger_flush();

    Err(err).wrap_err("The control loop failed")
}
