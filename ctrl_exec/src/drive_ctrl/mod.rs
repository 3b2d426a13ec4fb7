//! Drive control module
//!
//! Converts the latest plan and sensor samples into steering and throttle demands. Each axis is
//! driven by its own PID controller which is only stepped when that axis's input sequence counter
//! changes, the last output being republished in between.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

mod freshness;
mod params;
mod pid;
mod safety;
mod state;
mod telemetry;

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// Internal
pub use freshness::*;
pub use params::*;
pub use pid::*;
pub use safety::*;
pub use state::*;
pub use telemetry::*;

use comms_if::eqpt::{
    ControlCommand, PwmChannel, CENTRED_PULSE_FRAC, NUM_PWM_CHANNELS, STEER_CHANNEL,
    THROTTLE_CHANNEL,
};
use util::maths::{clamp, lin_map};

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Output of an axis forced to neutral.
pub const NEUTRAL_OUTPUT: f32 = 0.0;

/// Throttle output demanding full brake.
pub const FULL_BRAKE_OUTPUT: f32 = -1.0;

/// Name of the steering telemetry file in the session directory.
pub const STEER_TELEMETRY_FILE: &str = "pid_steer.tsv";

/// Name of the throttle telemetry file in the session directory.
pub const THROTTLE_TELEMETRY_FILE: &str = "pid_throttle.tsv";

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Map a controller output in `[-1, 1]` to a PWM duty fraction in `[0, 1]`.
///
/// A non-finite output maps to the centred pulse.
pub fn output_to_pulse(output: f32) -> f32 {
    if !output.is_finite() {
        return CENTRED_PULSE_FRAC;
    }

    clamp(&lin_map((-1.0, 1.0), (0.0, 1.0), output), &0.0, &1.0)
}

/// Build the command for the given axis outputs.
///
/// The throttle pulse is limited to `max_throttle_pulse`. Both channels are always active.
pub fn command_from_outputs(steer: f32, throttle: f32, max_throttle_pulse: f32) -> ControlCommand {
    let mut channels = [PwmChannel::default(); NUM_PWM_CHANNELS];

    channels[STEER_CHANNEL] = PwmChannel {
        active: true,
        pulse_frac: output_to_pulse(steer),
    };
    channels[THROTTLE_CHANNEL] = PwmChannel {
        active: true,
        pulse_frac: output_to_pulse(throttle).min(max_throttle_pulse),
    };

    ControlCommand {
        valid: true,
        channels,
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_output_to_pulse() {
        assert_eq!(output_to_pulse(-1.0), 0.0);
        assert_eq!(output_to_pulse(0.0), 0.5);
        assert_eq!(output_to_pulse(1.0), 1.0);
        assert_eq!(output_to_pulse(3.0), 1.0);
        assert_eq!(output_to_pulse(f32::NAN), CENTRED_PULSE_FRAC);
    }

    #[test]
    fn test_command_from_outputs() {
        let cmd = command_from_outputs(-1.0, 1.0, 0.7);

        assert!(cmd.valid);
        assert!(cmd.is_well_formed());
        assert!(cmd.steer().active && cmd.throttle().active);
        assert_eq!(cmd.steer().pulse_frac, 0.0);
        assert_eq!(cmd.throttle().pulse_frac, 0.7);

        // Full brake matches the fail-safe throttle
        let cmd = command_from_outputs(0.0, FULL_BRAKE_OUTPUT, 0.7);
        assert_eq!(cmd, ControlCommand::fail_safe());
    }
}
