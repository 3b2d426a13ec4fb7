//! Implementations for the DriveCtrl state structure

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::trace;
use serde::Serialize;
use std::{convert::Infallible, time::Instant};
use thiserror::Error;

// Internal
use super::{
    command_from_outputs, FreshnessTracker, Params, PidController, PidTerms, SafetyMonitor,
    TelemetryError, TelemetrySink, ThrottleMode, NEUTRAL_OUTPUT, STEER_TELEMETRY_FILE,
    THROTTLE_TELEMETRY_FILE,
};
use comms_if::eqpt::{ControlCommand, PlanSample, SensorSample};
use util::{module::State, session::Session};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Smallest time step passed to a PID controller.
///
/// Units: seconds
const MIN_STEP_DT_S: f32 = 1e-6;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Drive control module state
pub struct DriveCtrl {
    pub(crate) params: Params,

    steer_pid: PidController,
    throttle_pid: PidController,

    steer_freshness: FreshnessTracker<u32>,
    throttle_freshness: FreshnessTracker<u32>,

    last_steer_update: Instant,
    last_throttle_update: Instant,

    /// Last steering output, republished while the plan is stale.
    steer_output: f32,

    /// Last throttle output before the safety override, republished while the input is stale.
    throttle_output: f32,

    safety: SafetyMonitor,

    steer_telemetry: Option<TelemetrySink>,
    throttle_telemetry: Option<TelemetrySink>,
}

/// Input data to drive control.
#[derive(Debug, Clone, Copy)]
pub struct InputData {
    /// Time the inputs were read, used to measure the time between PID steps.
    pub now: Instant,

    /// Latest plan sample.
    pub plan: PlanSample,

    /// Latest sensor sample, or `None` if no sensor channel is configured.
    pub sensor: Option<SensorSample>,
}

/// Status report for DriveCtrl processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatusReport {
    /// True if the steering output was recomputed this cycle.
    pub steer_updated: bool,

    /// True if the throttle output was recomputed this cycle.
    pub throttle_updated: bool,

    /// True if the published throttle was overriden with full brake.
    pub estop_active: bool,

    /// The reason both outputs were published as neutral, if they were.
    pub input_fault: Option<InputFault>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Ways an input sample can be unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InputFault {
    /// The planner marked the plan as not valid.
    PlanNotValid,

    /// The target position or speed is NaN or infinite.
    NonFiniteTarget,

    /// A waypoint lies outside the sensing frame.
    WaypointOutOfFrame { index: usize },

    /// The measured wheel speed is NaN or infinite while the throttle uses it, or so large the
    /// throttle demand derived from it is.
    NonFiniteRpm,
}

#[derive(Debug, Error)]
pub enum DriveCtrlError {
    #[error("Cannot create the PID telemetry: {0}")]
    Telemetry(#[from] TelemetryError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl DriveCtrl {
    /// Create a new controller, measuring the first PID step from `start`.
    ///
    /// No telemetry is recorded by a controller built this way.
    pub fn new(params: Params, start: Instant) -> Self {
        let gains = *params.active_gains();

        Self {
            steer_pid: PidController::new(gains.steer),
            throttle_pid: PidController::new(gains.throttle),
            steer_freshness: FreshnessTracker::default(),
            throttle_freshness: FreshnessTracker::default(),
            last_steer_update: start,
            last_throttle_update: start,
            steer_output: NEUTRAL_OUTPUT,
            throttle_output: NEUTRAL_OUTPUT,
            safety: SafetyMonitor::new(params.emergency_stop_dist_cm),
            steer_telemetry: None,
            throttle_telemetry: None,
            params,
        }
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    /// Last steering output.
    pub fn steer_output(&self) -> f32 {
        self.steer_output
    }

    /// Last throttle output, before any safety override.
    pub fn throttle_output(&self) -> f32 {
        self.throttle_output
    }

    pub fn steer_telemetry(&self) -> Option<&TelemetrySink> {
        self.steer_telemetry.as_ref()
    }

    pub fn throttle_telemetry(&self) -> Option<&TelemetrySink> {
        self.throttle_telemetry.as_ref()
    }

    /// Sequence counter the throttle is updated on.
    fn throttle_counter(input: &InputData) -> u32 {
        match input.sensor {
            Some(ref s) => s.time_step,
            None => input.plan.frame_id,
        }
    }

    /// Check the inputs are usable, returning the first fault found.
    fn check_inputs(&self, input: &InputData) -> Option<InputFault> {
        let plan = &input.plan;

        if !plan.valid {
            return Some(InputFault::PlanNotValid);
        }

        if !(plan.target_pos.is_finite() && plan.target_speed.is_finite()) {
            return Some(InputFault::NonFiniteTarget);
        }

        if plan.waypoints_valid {
            if let Some(index) = plan.waypoints.iter().position(|&(x, y)| {
                x >= self.params.frame_width_px || y >= self.params.frame_height_px
            }) {
                return Some(InputFault::WaypointOutOfFrame { index });
            }
        }

        if self.params.throttle_mode == ThrottleMode::RpmFused {
            if let Some(ref sensor) = input.sensor {
                if !(sensor.hall_effect_rpm.is_finite() && self.throttle_demand(input).is_finite()) {
                    return Some(InputFault::NonFiniteRpm);
                }
            }
        }

        None
    }

    /// Get the demand passed to the throttle controller.
    fn throttle_demand(&self, input: &InputData) -> f32 {
        let target_speed = input.plan.target_speed;

        match (self.params.throttle_mode, input.sensor) {
            (ThrottleMode::RpmFused, Some(sensor)) => {
                let max_rpm = self.params.max_rpm;
                let target_rpm = (target_speed as f64 + 1.0) / 2.0 * max_rpm;
                ((target_rpm - sensor.hall_effect_rpm) / max_rpm) as f32
            }
            _ => target_speed,
        }
    }

    /// Seconds from `since` to `now`, never less than `MIN_STEP_DT_S`.
    fn step_dt(since: Instant, now: Instant) -> f32 {
        now.saturating_duration_since(since)
            .as_secs_f32()
            .max(MIN_STEP_DT_S)
    }

    fn record(sink: &mut Option<TelemetrySink>, terms: &PidTerms) {
        if let Some(s) = sink.as_mut() {
            s.record(terms);
        }
    }
}

impl Default for DriveCtrl {
    fn default() -> Self {
        Self::new(Params::default(), Instant::now())
    }
}

impl State for DriveCtrl {
    type InitData = Params;
    type InitError = DriveCtrlError;

    type InputData = InputData;
    type OutputData = ControlCommand;
    type StatusReport = StatusReport;
    type ProcError = Infallible;

    /// Initialise the DriveCtrl module.
    ///
    /// Any previous controller state is discarded and the first PID step is measured from now.
    fn init(&mut self, init_data: Self::InitData, session: &Session)
        -> Result<(), Self::InitError>
    {
        let record_telemetry = init_data.record_telemetry;

        *self = Self::new(init_data, Instant::now());

        if record_telemetry {
            self.steer_telemetry = Some(TelemetrySink::create(
                session.file_path(STEER_TELEMETRY_FILE),
            )?);
            self.throttle_telemetry = Some(TelemetrySink::create(
                session.file_path(THROTTLE_TELEMETRY_FILE),
            )?);
        }

        Ok(())
    }

    /// Perform cyclic processing of drive control.
    fn proc(&mut self, input: &Self::InputData)
        -> Result<(Self::OutputData, Self::StatusReport), Self::ProcError>
    {
        let mut report = StatusReport::default();

        let frame_id = input.plan.frame_id;
        let throttle_counter = Self::throttle_counter(input);

        match self.check_inputs(input) {
            Some(fault) => {
                // Only the faulty stream's sample is consumed and its axis reset, the other axis
                // resumes its stored output once the fault clears
                let plan_fault = fault != InputFault::NonFiniteRpm;
                let throttle_on_plan = input.sensor.is_none();

                if plan_fault {
                    self.steer_output = NEUTRAL_OUTPUT;
                    self.steer_freshness.mark_seen(frame_id);
                    self.last_steer_update = input.now;
                }
                if !plan_fault || throttle_on_plan {
                    self.throttle_output = NEUTRAL_OUTPUT;
                    self.throttle_freshness.mark_seen(throttle_counter);
                    self.last_throttle_update = input.now;
                }

                report.input_fault = Some(fault);
            }
            None => {
                if self.steer_freshness.is_fresh(frame_id) {
                    let dt = Self::step_dt(self.last_steer_update, input.now);

                    // The target position is the measured offset of the path from centre, which
                    // the steering drives to zero
                    let terms = self.steer_pid.step(0.0, input.plan.target_pos, dt);
                    Self::record(&mut self.steer_telemetry, &terms);

                    trace!("Steer step: dt = {:.6} s, {:?}", dt, terms);

                    self.steer_output = terms.output;
                    self.steer_freshness.mark_seen(frame_id);
                    self.last_steer_update = input.now;
                    report.steer_updated = true;
                }

                if self.throttle_freshness.is_fresh(throttle_counter) {
                    let dt = Self::step_dt(self.last_throttle_update, input.now);
                    let demand = self.throttle_demand(input);

                    let terms = self.throttle_pid.step(demand, 0.0, dt);
                    Self::record(&mut self.throttle_telemetry, &terms);

                    trace!("Throttle step: dt = {:.6} s, {:?}", dt, terms);

                    self.throttle_output = terms.output;
                    self.throttle_freshness.mark_seen(throttle_counter);
                    self.last_throttle_update = input.now;
                    report.throttle_updated = true;
                }
            }
        }

        let (steer, throttle) = match report.input_fault {
            Some(_) => (NEUTRAL_OUTPUT, NEUTRAL_OUTPUT),
            None => (self.steer_output, self.throttle_output),
        };

        let (throttle, estop_active) = self.safety.apply(input.sensor.as_ref(), throttle);
        report.estop_active = estop_active;

        let cmd = command_from_outputs(steer, throttle, self.params.max_throttle_pulse);

        Ok((cmd, report))
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
