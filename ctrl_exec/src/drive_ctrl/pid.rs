//! # PID controllers
//!
//! Single axis PID controllers with integral anti-windup and a clamped output. Elapsed time is
//! supplied by the caller, which only steps a controller when its input has changed.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use serde::{Deserialize, Serialize};

// Internal
use util::maths::clamp;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Limit on the magnitude of the integral accumulator.
pub const PID_INTEGRAL_MAX: f32 = 0.2;

/// Limit on the magnitude of the controller output.
pub const PID_OUTPUT_MAX: f32 = 1.0;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Gains of a PID controller.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    /// Proportional gain
    pub k_p: f32,

    /// Integral gain
    pub k_i: f32,

    /// Derivative gain
    pub k_d: f32,
}

/// Persistent state of a single PID axis.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct PidAxisState {
    /// The integral accumulation, always within `[-PID_INTEGRAL_MAX, PID_INTEGRAL_MAX]`
    pub integral: f32,

    /// Error passed in on the previous step
    pub previous_error: f32,
}

/// The individual contributions of one PID step.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct PidTerms {
    /// `k_p * error`
    pub proportional: f32,

    /// `k_i * integral`
    pub integral: f32,

    /// `k_d * derivative`
    pub derivative: f32,

    /// Sum of the terms clamped to `[-1, 1]`
    pub output: f32,
}

/// A PID controller
#[derive(Debug, Default, Clone, Serialize)]
pub struct PidController {
    gains: PidGains,

    state: PidAxisState,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl PidController {
    /// Create a new controller with the given gains and zeroed state.
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            state: PidAxisState::default(),
        }
    }

    /// Step the controller.
    ///
    /// `dt` is the time in seconds since the previous step and must be positive.
    pub fn step(&mut self, desired: f32, current: f32, dt: f32) -> PidTerms {
        pid_step_terms(
            &self.gains,
            desired,
            current,
            dt,
            &mut self.state.integral,
            &mut self.state.previous_error,
        )
    }

    /// Clear the integral and previous error.
    ///
    /// The control loop never does this itself, state persists for the whole run.
    pub fn reset(&mut self) {
        self.state = PidAxisState::default();
    }

    pub fn gains(&self) -> &PidGains {
        &self.gains
    }

    pub fn state(&self) -> &PidAxisState {
        &self.state
    }
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Perform one PID step, returning the clamped control value.
///
/// `integral` and `previous_error` are updated in place. `dt` must be positive, a zero or
/// negative `dt` gives a meaningless result.
#[allow(clippy::too_many_arguments)]
pub fn pid_step(
    k_p: f32,
    k_i: f32,
    k_d: f32,
    desired: f32,
    current: f32,
    dt: f32,
    integral: &mut f32,
    previous_error: &mut f32,
) -> f32 {
    pid_step_terms(
        &PidGains { k_p, k_i, k_d },
        desired,
        current,
        dt,
        integral,
        previous_error,
    )
    .output
}

/// Perform one PID step, returning every term of the output.
pub fn pid_step_terms(
    gains: &PidGains,
    desired: f32,
    current: f32,
    dt: f32,
    integral: &mut f32,
    previous_error: &mut f32,
) -> PidTerms {
    // Saturating every intermediate keeps infinities, and so NaN, out of the sum for any finite
    // inputs, however large the span or small the dt
    let error = saturate(desired - current);

    // Anti-windup, bounds the integral contribution to k_i * PID_INTEGRAL_MAX
    *integral = clamp(
        &(*integral + error * dt),
        &-PID_INTEGRAL_MAX,
        &PID_INTEGRAL_MAX,
    );

    let proportional = saturate(gains.k_p * error);
    let integral_term = gains.k_i * *integral;
    let derivative_term = if gains.k_d == 0.0 {
        0.0
    } else {
        let derivative = saturate(saturate(error - *previous_error) / dt);
        saturate(gains.k_d * derivative)
    };

    let output = clamp(
        &(proportional + integral_term + derivative_term),
        &-PID_OUTPUT_MAX,
        &PID_OUTPUT_MAX,
    );

    *previous_error = error;

    PidTerms {
        proportional,
        integral: integral_term,
        derivative: derivative_term,
        output,
    }
}

/// Limit a value to the finite range of `f32`.
fn saturate(value: f32) -> f32 {
    clamp(&value, &f32::MIN, &f32::MAX)
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    const SIM_STEER: PidGains = PidGains {
        k_p: 0.99,
        k_i: 0.10,
        k_d: 0.07,
    };

    #[test]
    fn test_first_step_saturates() {
        let dt = 1.0 / 22.0;
        let mut integral = 0.0;
        let mut previous_error = 0.0;

        // An error of -0.5 from zeroed state
        let terms = pid_step_terms(&SIM_STEER, 0.0, 0.5, dt, &mut integral, &mut previous_error);

        assert_eq!(previous_error, -0.5);
        assert!((integral - (-0.5 * dt)).abs() < 1e-6);
        assert!((integral + 0.0227).abs() < 1e-4);
        assert!((terms.proportional + 0.495).abs() < 1e-6);
        assert!((terms.derivative + 0.77).abs() < 1e-4);

        let raw = terms.proportional + terms.integral + terms.derivative;
        assert!((raw + 1.267).abs() < 1e-3);
        assert_eq!(terms.output, -1.0);
    }

    #[test]
    fn test_free_function_matches_controller() {
        let dt = 0.05;
        let mut ctrl = PidController::new(SIM_STEER);
        let mut integral = 0.0;
        let mut previous_error = 0.0;

        for &(desired, current) in [(0.1, 0.0), (0.2, 0.05), (-0.3, 0.1)].iter() {
            let expected = pid_step(
                SIM_STEER.k_p,
                SIM_STEER.k_i,
                SIM_STEER.k_d,
                desired,
                current,
                dt,
                &mut integral,
                &mut previous_error,
            );
            assert_eq!(ctrl.step(desired, current, dt).output, expected);
        }

        assert_eq!(ctrl.state().integral, integral);
        assert_eq!(ctrl.state().previous_error, previous_error);
    }

    #[test]
    fn test_output_always_bounded() {
        let gains = PidGains {
            k_p: 5.0,
            k_i: 3.0,
            k_d: 2.0,
        };
        let values = [-1e6f32, -10.0, -1.0, -0.3, 0.0, 0.7, 1.0, 25.0, 1e6];
        let dts = [1e-4f32, 0.01, 1.0 / 22.0, 0.5, 10.0];

        for &desired in values.iter() {
            for &current in values.iter() {
                for &dt in dts.iter() {
                    let mut ctrl = PidController::new(gains);
                    for _ in 0..3 {
                        let out = ctrl.step(desired, current, dt).output;
                        assert!(
                            (-1.0..=1.0).contains(&out),
                            "output {} out of range for ({}, {}, {})",
                            out, desired, current, dt
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_output_finite_at_extremes() {
        let spans = [
            (f32::MAX, -f32::MAX),
            (-f32::MAX, f32::MAX),
            (f32::MAX, 0.0),
            (0.0, -f32::MAX),
            (f32::MIN_POSITIVE, 0.0),
        ];
        let dts = [1e-39f32, f32::MIN_POSITIVE, 1e-6, 1.0, f32::MAX];
        let gain_sets = [
            SIM_STEER,
            PidGains {
                k_p: 0.5,
                k_i: 0.2,
                k_d: 0.0,
            },
            PidGains {
                k_p: 1e30,
                k_i: 0.0,
                k_d: 1e30,
            },
        ];

        for gains in gain_sets.iter() {
            for &(desired, current) in spans.iter() {
                for &dt in dts.iter() {
                    let mut ctrl = PidController::new(*gains);

                    // Alternate the sign of the error so the derivative spans the whole range
                    for i in 0..4 {
                        let (d, c) = if i % 2 == 0 {
                            (desired, current)
                        } else {
                            (current, desired)
                        };
                        let terms = ctrl.step(d, c, dt);
                        assert!(
                            (-1.0..=1.0).contains(&terms.output),
                            "output {} for {:?} at ({}, {}, {})",
                            terms.output, gains, d, c, dt
                        );
                        assert!(terms.proportional.is_finite());
                        assert!(terms.integral.is_finite());
                        assert!(terms.derivative.is_finite());
                        assert!(ctrl.state().previous_error.is_finite());
                    }
                }
            }
        }

        // No derivative gain, a subnormal dt
        let mut integral = 0.0;
        let mut previous_error = 0.0;
        let out = pid_step(0.5, 0.2, 0.0, 0.5, 0.0, 1e-39, &mut integral, &mut previous_error);
        assert!((out - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_integral_windup_bounded() {
        let gains = PidGains {
            k_p: 0.0,
            k_i: 0.7,
            k_d: 0.0,
        };

        for &error in [1.0f32, -1.0, 40.0, -0.01].iter() {
            let mut ctrl = PidController::new(gains);
            for _ in 0..10_000 {
                let terms = ctrl.step(error, 0.0, 0.1);
                assert!(terms.integral.abs() <= gains.k_i * PID_INTEGRAL_MAX + 1e-6);
                assert!(ctrl.state().integral.abs() <= PID_INTEGRAL_MAX);
            }
            assert_eq!(ctrl.state().integral.abs(), PID_INTEGRAL_MAX);
        }
    }

    #[test]
    fn test_reset() {
        let mut ctrl = PidController::new(SIM_STEER);
        ctrl.step(1.0, 0.0, 0.1);
        assert_ne!(*ctrl.state(), PidAxisState::default());

        ctrl.reset();
        assert_eq!(*ctrl.state(), PidAxisState::default());
        assert_eq!(*ctrl.gains(), SIM_STEER);
    }
}
