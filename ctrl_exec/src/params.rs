//! # Control Executable Parameters
//!
//! This module provide parameters for the control executable.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::shmem::ChannelParams;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Longest accepted duration parameter.
///
/// Units: seconds
pub const MAX_DURATION_S: f64 = 3600.0;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CtrlExecParams {
    /// Channel the plan is read from
    pub plan: ChannelParams,

    /// Channel the sensor data is read from, if the vehicle has one
    pub sensor: Option<ChannelParams>,

    /// Channel the control command is written to
    pub control: ChannelParams,

    /// Target period of the main loop. If not set the loop runs as fast as the locks allow.
    ///
    /// Units: seconds
    pub cycle_period_s: Option<f64>,

    /// Lock waits longer than this are reported.
    ///
    /// Units: seconds
    pub lock_warn_after_s: Option<f64>,

    /// Interval between diagnostics while failing safe waits for the control lock.
    ///
    /// Units: seconds
    pub shutdown_lock_warn_s: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParamsError {
    #[error("{0} must be positive and at most {} s, found {1}", MAX_DURATION_S)]
    InvalidDuration(&'static str, f64),

    #[error("The {0} and {1} channels share the name \"{2}\"")]
    SharedName(&'static str, &'static str, String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CtrlExecParams {
    /// Check the parameters are usable.
    pub fn validate(&self) -> Result<(), ParamsError> {
        let durations = [
            ("cycle_period_s", self.cycle_period_s),
            ("lock_warn_after_s", self.lock_warn_after_s),
            ("shutdown_lock_warn_s", Some(self.shutdown_lock_warn_s)),
        ];
        for &(name, value) in durations.iter() {
            if let Some(v) = value {
                if !(v > 0.0 && v <= MAX_DURATION_S) {
                    return Err(ParamsError::InvalidDuration(name, v));
                }
            }
        }

        let mut channels = vec![("plan", &self.plan), ("control", &self.control)];
        if let Some(ref sensor) = self.sensor {
            channels.push(("sensor", sensor));
        }

        for (i, &(name_a, a)) in channels.iter().enumerate() {
            for &(name_b, b) in channels[i + 1..].iter() {
                if a.shm_name == b.shm_name {
                    return Err(ParamsError::SharedName(name_a, name_b, a.shm_name.clone()));
                }
                if a.sem_name == b.sem_name {
                    return Err(ParamsError::SharedName(name_a, name_b, a.sem_name.clone()));
                }
            }
        }

        Ok(())
    }

    pub fn cycle_period(&self) -> Option<Duration> {
        self.cycle_period_s.map(Duration::from_secs_f64)
    }

    pub fn lock_warn_after(&self) -> Option<Duration> {
        self.lock_warn_after_s.map(Duration::from_secs_f64)
    }

    pub fn shutdown_lock_warn(&self) -> Duration {
        Duration::from_secs_f64(self.shutdown_lock_warn_s)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn channel(tag: &str) -> ChannelParams {
        ChannelParams {
            shm_name: format!("/ctrl_shmem_{}", tag),
            sem_name: format!("/ctrl_sem_{}", tag),
        }
    }

    fn params() -> CtrlExecParams {
        CtrlExecParams {
            plan: channel("plan"),
            sensor: Some(channel("sensor")),
            control: channel("control"),
            cycle_period_s: Some(0.01),
            lock_warn_after_s: None,
            shutdown_lock_warn_s: 0.5,
        }
    }

    #[test]
    fn test_validate() {
        assert_eq!(params().validate(), Ok(()));

        let mut p = params();
        p.shutdown_lock_warn_s = 0.0;
        assert!(matches!(
            p.validate(),
            Err(ParamsError::InvalidDuration("shutdown_lock_warn_s", _))
        ));

        let mut p = params();
        p.lock_warn_after_s = Some(f64::NAN);
        assert!(p.validate().is_err());

        // Too long to convert to a Duration
        let mut p = params();
        p.cycle_period_s = Some(1e300);
        assert!(matches!(
            p.validate(),
            Err(ParamsError::InvalidDuration("cycle_period_s", _))
        ));

        let mut p = params();
        p.shutdown_lock_warn_s = f64::INFINITY;
        assert!(p.validate().is_err());

        let mut p = params();
        p.lock_warn_after_s = Some(MAX_DURATION_S);
        assert_eq!(p.validate(), Ok(()));
        assert_eq!(
            p.lock_warn_after(),
            Some(Duration::from_secs(MAX_DURATION_S as u64))
        );

        let mut p = params();
        p.sensor = Some(ChannelParams {
            shm_name: "/ctrl_shmem_sensor".into(),
            sem_name: "/ctrl_sem_control".into(),
        });
        assert_eq!(
            p.validate(),
            Err(ParamsError::SharedName(
                "control",
                "sensor",
                "/ctrl_sem_control".into()
            ))
        );
    }

    #[test]
    fn test_durations() {
        let p = params();
        assert_eq!(p.cycle_period(), Some(Duration::from_millis(10)));
        assert_eq!(p.lock_warn_after(), None);
        assert_eq!(p.shutdown_lock_warn(), Duration::from_millis(500));
    }
}
