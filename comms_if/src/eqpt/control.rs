//! # Control Record
//!
//! PWM demands written by the control executable and consumed by the actuator process. This is the
//! only state the actuator reads, so every value written here must be a valid duty fraction.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Serialize;

use super::{bool_to_flag, flag_to_bool};
use crate::shmem::ShmRecord;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of PWM channels in the control record.
pub const NUM_PWM_CHANNELS: usize = 2;

/// Index of the throttle channel.
pub const THROTTLE_CHANNEL: usize = 0;

/// Index of the steering channel.
pub const STEER_CHANNEL: usize = 1;

/// Duty fraction which centres the steering.
pub const CENTRED_PULSE_FRAC: f32 = 0.5;

/// Duty fraction which demands full brake on the throttle channel.
pub const FULL_BRAKE_PULSE_FRAC: f32 = 0.0;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Wire layout of a single PWM channel.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct PwmChannelRecord {
    pub active: u8,
    pub pulse_frac: f32,
}

/// Wire layout of the control region.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ControlRecord {
    pub valid: u8,
    pub channels: [PwmChannelRecord; NUM_PWM_CHANNELS],
}

/// Demand for a single PWM channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct PwmChannel {
    /// If false the actuator stops driving this channel.
    pub active: bool,

    /// Duty cycle fraction, in [0, 1].
    pub pulse_frac: f32,
}

/// Demands for all PWM channels, as written by the control executable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct ControlCommand {
    pub valid: bool,
    pub channels: [PwmChannel; NUM_PWM_CHANNELS],
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

// SAFETY: `#[repr(C)]`, no pointers, every bit pattern of every field is a valid value.
unsafe impl ShmRecord for ControlRecord {}

impl ControlCommand {
    /// The command written when the controller shuts down.
    ///
    /// Both channels stay active with an explicit value: an inactive channel leaves the
    /// actuator's last physical output latched, which is exactly the state this command must
    /// clear. The throttle demands full brake and the steering is centred.
    pub fn fail_safe() -> Self {
        let mut channels = [PwmChannel {
            active: true,
            pulse_frac: CENTRED_PULSE_FRAC,
        }; NUM_PWM_CHANNELS];
        channels[THROTTLE_CHANNEL].pulse_frac = FULL_BRAKE_PULSE_FRAC;

        Self {
            valid: true,
            channels,
        }
    }

    /// Get the throttle channel demand.
    pub fn throttle(&self) -> &PwmChannel {
        &self.channels[THROTTLE_CHANNEL]
    }

    /// Get the steering channel demand.
    pub fn steer(&self) -> &PwmChannel {
        &self.channels[STEER_CHANNEL]
    }

    /// Returns true if every channel holds a finite duty fraction in [0, 1].
    pub fn is_well_formed(&self) -> bool {
        self.channels
            .iter()
            .all(|c| c.pulse_frac.is_finite() && (0.0..=1.0).contains(&c.pulse_frac))
    }
}

impl From<&ControlCommand> for ControlRecord {
    fn from(cmd: &ControlCommand) -> Self {
        let mut channels = [PwmChannelRecord::default(); NUM_PWM_CHANNELS];
        for (dst, src) in channels.iter_mut().zip(cmd.channels.iter()) {
            *dst = PwmChannelRecord {
                active: bool_to_flag(src.active),
                pulse_frac: src.pulse_frac,
            };
        }

        Self {
            valid: bool_to_flag(cmd.valid),
            channels,
        }
    }
}

impl From<ControlRecord> for ControlCommand {
    fn from(record: ControlRecord) -> Self {
        let mut channels = [PwmChannel::default(); NUM_PWM_CHANNELS];
        for (dst, src) in channels.iter_mut().zip(record.channels.iter()) {
            *dst = PwmChannel {
                active: flag_to_bool(src.active),
                pulse_frac: src.pulse_frac,
            };
        }

        Self {
            valid: flag_to_bool(record.valid),
            channels,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fail_safe_command() {
        let cmd = ControlCommand::fail_safe();

        assert!(cmd.valid);
        assert!(cmd.throttle().active);
        assert_eq!(cmd.throttle().pulse_frac, FULL_BRAKE_PULSE_FRAC);
        assert!(cmd.steer().active);
        assert_eq!(cmd.steer().pulse_frac, CENTRED_PULSE_FRAC);
        assert!(cmd.is_well_formed());
    }

    #[test]
    fn test_well_formed() {
        let mut cmd = ControlCommand::fail_safe();
        cmd.channels[STEER_CHANNEL].pulse_frac = 1.2;
        assert!(!cmd.is_well_formed());

        cmd.channels[STEER_CHANNEL].pulse_frac = f32::NAN;
        assert!(!cmd.is_well_formed());
    }
}
