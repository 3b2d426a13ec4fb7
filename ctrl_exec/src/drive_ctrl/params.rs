//! Parameters structure for DriveCtrl

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::Deserialize;
use std::str::FromStr;
use thiserror::Error;

// Internal
use super::pid::PidGains;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Parameters for drive control.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Params {

    // ---- GAINS ----

    /// Deployment the controller is running on, selects which gain set is used.
    pub target: DeploymentTarget,

    /// Gains for every deployment target.
    pub gains: DeploymentGains,

    // ---- THROTTLE ----

    /// How the throttle demand is derived from the plan.
    pub throttle_mode: ThrottleMode,

    /// Wheel speed corresponding to a full throttle demand, used in `RpmFused` mode.
    ///
    /// Units: revolutions per minute
    pub max_rpm: f64,

    /// Highest throttle duty fraction that will be published.
    pub max_throttle_pulse: f32,

    // ---- SAFETY ----

    /// Obstacle distance below which the throttle is overriden with full brake.
    ///
    /// Units: centimetres
    pub emergency_stop_dist_cm: f64,

    // ---- INPUT VALIDATION ----

    /// Width of the sensing frame the plan's waypoints are given in.
    ///
    /// Units: pixels
    pub frame_width_px: u16,

    /// Height of the sensing frame the plan's waypoints are given in.
    ///
    /// Units: pixels
    pub frame_height_px: u16,

    // ---- TELEMETRY ----

    /// If true the terms of every PID step are written into the session.
    pub record_telemetry: bool,
}

/// Gains of both controlled axes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Deserialize)]
pub struct AxisGains {
    pub steer: PidGains,
    pub throttle: PidGains,
}

/// Gain sets for each deployment target.
#[derive(Debug, Default, Clone, Copy, PartialEq, Deserialize)]
pub struct DeploymentGains {
    pub sim: AxisGains,
    pub hw: AxisGains,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// The deployment the controller is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentTarget {
    /// The vehicle simulator
    Sim,

    /// The physical vehicle
    Hw,
}

/// Source of the throttle PID's input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleMode {
    /// The plan's target speed is used as the demand directly.
    Direct,

    /// The demand is the normalised difference between the target and measured wheel speeds.
    RpmFused,
}

/// Reasons a set of parameters is rejected.
#[derive(Debug, Error, PartialEq)]
pub enum ParamsError {
    #[error("max_rpm must be positive and finite in rpm_fused mode, found {0}")]
    InvalidMaxRpm(f64),

    #[error("rpm_fused throttle mode needs a sensor channel")]
    FusedWithoutSensor,

    #[error("max_throttle_pulse must be in (0, 1], found {0}")]
    InvalidThrottleCeiling(f32),

    #[error("emergency_stop_dist_cm must be non-negative and finite, found {0}")]
    InvalidStopDist(f64),

    #[error("The {axis} gains of the {target:?} target are not all finite")]
    NonFiniteGains {
        target: DeploymentTarget,
        axis: &'static str,
    },

    #[error("Unknown deployment target \"{0}\", expected \"sim\" or \"hw\"")]
    UnknownTarget(String),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Default for Params {
    fn default() -> Self {
        Self {
            target: DeploymentTarget::Sim,
            gains: DeploymentGains {
                sim: AxisGains {
                    steer: PidGains {
                        k_p: 0.99,
                        k_i: 0.10,
                        k_d: 0.07,
                    },
                    throttle: PidGains {
                        k_p: 0.70,
                        k_i: 0.20,
                        k_d: 0.05,
                    },
                },
                hw: AxisGains {
                    steer: PidGains {
                        k_p: 0.50,
                        k_i: 0.20,
                        k_d: 0.00,
                    },
                    throttle: PidGains {
                        k_p: 0.50,
                        k_i: 0.10,
                        k_d: 0.00,
                    },
                },
            },
            throttle_mode: ThrottleMode::Direct,
            max_rpm: 6000.0,
            max_throttle_pulse: 0.7,
            emergency_stop_dist_cm: 30.0,
            frame_width_px: 640,
            frame_height_px: 480,
            record_telemetry: false,
        }
    }
}

impl Params {
    /// Get the gains of the selected deployment target.
    pub fn active_gains(&self) -> &AxisGains {
        match self.target {
            DeploymentTarget::Sim => &self.gains.sim,
            DeploymentTarget::Hw => &self.gains.hw,
        }
    }

    /// Check the parameters are usable.
    ///
    /// `sensor_configured` is whether the executable has a sensor channel to read.
    pub fn validate(&self, sensor_configured: bool) -> Result<(), ParamsError> {
        if self.throttle_mode == ThrottleMode::RpmFused {
            if !sensor_configured {
                return Err(ParamsError::FusedWithoutSensor);
            }
            if !(self.max_rpm.is_finite() && self.max_rpm > 0.0) {
                return Err(ParamsError::InvalidMaxRpm(self.max_rpm));
            }
        }

        if !(self.max_throttle_pulse > 0.0 && self.max_throttle_pulse <= 1.0) {
            return Err(ParamsError::InvalidThrottleCeiling(self.max_throttle_pulse));
        }

        if !(self.emergency_stop_dist_cm.is_finite() && self.emergency_stop_dist_cm >= 0.0) {
            return Err(ParamsError::InvalidStopDist(self.emergency_stop_dist_cm));
        }

        for &(target, gains) in [
            (DeploymentTarget::Sim, &self.gains.sim),
            (DeploymentTarget::Hw, &self.gains.hw),
        ]
        .iter()
        {
            for &(axis, g) in [("steer", &gains.steer), ("throttle", &gains.throttle)].iter() {
                if !(g.k_p.is_finite() && g.k_i.is_finite() && g.k_d.is_finite()) {
                    return Err(ParamsError::NonFiniteGains { target, axis });
                }
            }
        }

        Ok(())
    }
}

impl FromStr for DeploymentTarget {
    type Err = ParamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sim" => Ok(DeploymentTarget::Sim),
            "hw" => Ok(DeploymentTarget::Hw),
            _ => Err(ParamsError::UnknownTarget(s.into())),
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        let params = Params::default();
        assert_eq!(params.validate(false), Ok(()));
        assert_eq!(params.active_gains().steer.k_p, 0.99);
    }

    #[test]
    fn test_target_selects_gains() {
        let mut params = Params::default();
        params.target = "hw".parse().unwrap();
        assert_eq!(params.active_gains(), &params.gains.hw);
        assert_eq!(params.active_gains().throttle.k_i, 0.10);

        assert!(matches!(
            "rover".parse::<DeploymentTarget>(),
            Err(ParamsError::UnknownTarget(_))
        ));
    }

    #[test]
    fn test_invalid() {
        let mut params = Params::default();
        params.throttle_mode = ThrottleMode::RpmFused;
        assert_eq!(params.validate(false), Err(ParamsError::FusedWithoutSensor));
        assert_eq!(params.validate(true), Ok(()));

        params.max_rpm = 0.0;
        assert_eq!(params.validate(true), Err(ParamsError::InvalidMaxRpm(0.0)));

        let mut params = Params::default();
        params.max_throttle_pulse = 1.2;
        assert!(params.validate(true).is_err());

        let mut params = Params::default();
        params.emergency_stop_dist_cm = -1.0;
        assert!(params.validate(true).is_err());

        let mut params = Params::default();
        params.gains.hw.steer.k_d = f32::NAN;
        assert_eq!(
            params.validate(true),
            Err(ParamsError::NonFiniteGains {
                target: DeploymentTarget::Hw,
                axis: "steer"
            })
        );
    }

    #[test]
    fn test_deserialise() {
        let params: Params = toml::from_str(
            r#"
            target = "hw"
            throttle_mode = "rpm_fused"
            max_rpm = 4000.0
            max_throttle_pulse = 0.6
            emergency_stop_dist_cm = 25.0
            frame_width_px = 320
            frame_height_px = 240
            record_telemetry = true

            [gains.sim.steer]
            k_p = 0.99
            k_i = 0.1
            k_d = 0.07

            [gains.sim.throttle]
            k_p = 0.7
            k_i = 0.2
            k_d = 0.05

            [gains.hw.steer]
            k_p = 0.5
            k_i = 0.2
            k_d = 0.0

            [gains.hw.throttle]
            k_p = 0.5
            k_i = 0.1
            k_d = 0.0
            "#,
        )
        .unwrap();

        assert_eq!(params.target, DeploymentTarget::Hw);
        assert_eq!(params.throttle_mode, ThrottleMode::RpmFused);
        assert_eq!(params.frame_width_px, 320);
        assert_eq!(params.active_gains().steer.k_i, 0.2);
    }
}
