//! Emergency stop on obstacle proximity

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
use comms_if::eqpt::SensorSample;
use super::FULL_BRAKE_OUTPUT;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Overrides the throttle with full brake when an obstacle is too close.
///
/// The monitor is stateless: it is evaluated every cycle on the latest sensor sample whether or
/// not that sample is fresh, and never touches the steering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyMonitor {
    /// Distance below which the vehicle is stopped.
    ///
    /// Units: centimetres
    stop_dist_cm: f64,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl SafetyMonitor {
    pub fn new(stop_dist_cm: f64) -> Self {
        Self { stop_dist_cm }
    }

    pub fn stop_dist_cm(&self) -> f64 {
        self.stop_dist_cm
    }

    /// Returns true if the sample shows an obstacle inside the stopping distance.
    ///
    /// A distance which cannot be compared (NaN) counts as a breach. Without a sensor channel
    /// there is nothing to breach.
    pub fn is_breached(&self, sensor: Option<&SensorSample>) -> bool {
        match sensor {
            Some(s) => !(s.ultrasound_left >= self.stop_dist_cm),
            None => false,
        }
    }

    /// Get the throttle output to publish, and whether the override is active.
    pub fn apply(&self, sensor: Option<&SensorSample>, throttle: f32) -> (f32, bool) {
        if self.is_breached(sensor) {
            (FULL_BRAKE_OUTPUT, true)
        } else {
            (throttle, false)
        }
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------
