//! PID telemetry recording
//!
//! Each recorded axis writes one tab separated line per PID step:
//!
//! ```text
//! step    k_p * error    k_i * integral    k_d * derivative    clamped output
//! ```

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use log::warn;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// Internal
use super::pid::PidTerms;
use util::archive::{ArchiveError, Archiver};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Writes the terms of every step of one PID controller to a file.
pub struct TelemetrySink {
    /// `None` once a write has failed.
    archiver: Option<Archiver>,

    path: PathBuf,

    step: u64,
}

/// A single telemetry line.
#[derive(Serialize)]
struct TelemetryRow {
    step: u64,
    proportional: f32,
    integral: f32,
    derivative: f32,
    output: f32,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("Cannot open the telemetry file {0:?}: {1}")]
    OpenError(PathBuf, ArchiveError),
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl TelemetrySink {
    /// Create a sink writing to `path`, truncating the file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, TelemetryError> {
        let path = path.as_ref().to_path_buf();
        let archiver = Archiver::from_path(&path, b'\t')
            .map_err(|e| TelemetryError::OpenError(path.clone(), e))?;

        Ok(Self {
            archiver: Some(archiver),
            path,
            step: 0,
        })
    }

    /// Record the terms of one step.
    ///
    /// Telemetry is not allowed to stop the vehicle, so a failed write is logged and disables the
    /// sink.
    pub fn record(&mut self, terms: &PidTerms) {
        let archiver = match self.archiver.as_mut() {
            Some(a) => a,
            None => return,
        };

        let row = TelemetryRow {
            step: self.step,
            proportional: terms.proportional,
            integral: terms.integral,
            derivative: terms.derivative,
            output: terms.output,
        };

        match archiver.serialise(row) {
            Ok(_) => self.step += 1,
            Err(e) => {
                warn!(
                    "Telemetry to {:?} disabled after a failed write: {}",
                    self.path, e
                );
                self.archiver = None;
            }
        }
    }

    /// Number of steps written so far.
    pub fn steps_recorded(&self) -> u64 {
        self.step
    }

    pub fn is_enabled(&self) -> bool {
        self.archiver.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_rows() {
        let path = std::env::temp_dir()
            .join(format!("drive_ctrl_telemetry_{}.tsv", std::process::id()));

        let mut sink = TelemetrySink::create(&path).unwrap();
        sink.record(&PidTerms {
            proportional: -0.5,
            integral: -0.25,
            derivative: 0.125,
            output: -0.625,
        });
        sink.record(&PidTerms {
            proportional: 0.5,
            integral: 0.0,
            derivative: 1.5,
            output: 1.0,
        });
        assert_eq!(sink.steps_recorded(), 2);
        assert!(sink.is_enabled());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "0\t-0.5\t-0.25\t0.125\t-0.625\n1\t0.5\t0.0\t1.5\t1.0\n"
        );

        // A new sink starts from an empty file
        let sink = TelemetrySink::create(&path).unwrap();
        assert_eq!(sink.steps_recorded(), 0);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_bad_path() {
        let path = std::env::temp_dir()
            .join("drive_ctrl_no_such_dir")
            .join("pid.tsv");
        assert!(TelemetrySink::create(&path).is_err());
    }
}
