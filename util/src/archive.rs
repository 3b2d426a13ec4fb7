//! Struct archiving functionality
//!
//! Archives are delimited text files with one serialised record per line,
//! usually written in the session directory. They are truncated when opened so
//! each run starts from an empty file.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use std::path::Path;
use std::fs::File;
use csv::{Terminator, WriterBuilder};
pub use csv::Writer;
use serde::Serialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// An object used to write archive files.
pub struct Archiver {
    writer: Writer<File>
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors which can occur while archiving.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Cannot create the archive file: {0}")]
    CreateError(std::io::Error),

    #[error("Cannot write the archive record: {0}")]
    WriteError(csv::Error),

    #[error("Cannot flush the archive file: {0}")]
    FlushError(std::io::Error)
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Archiver {
    /// Create a new archiver at the given path, truncating any existing file.
    ///
    /// Records are written without a header line, fields separated by
    /// `delimiter` and records by `\n`.
    pub fn from_path<P: AsRef<Path>>(
        path: P, delimiter: u8
    ) -> Result<Self, ArchiveError> {
        let file = File::create(path.as_ref())
            .map_err(ArchiveError::CreateError)?;

        let writer = WriterBuilder::new()
            .has_headers(false)
            .delimiter(delimiter)
            .terminator(Terminator::Any(b'\n'))
            .from_writer(file);

        Ok(Self {
            writer
        })
    }

    /// Serialise a record into the archive.
    ///
    /// The record is flushed immediately so the file is complete even if the
    /// process is killed.
    pub fn serialise<T: Serialize>(
        &mut self, record: T
    ) -> Result<(), ArchiveError> {
        self.writer.serialize(record)
            .map_err(ArchiveError::WriteError)?;
        self.writer.flush()
            .map_err(ArchiveError::FlushError)
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Serialize)]
    struct Row {
        step: u64,
        value: f32
    }

    #[test]
    fn test_tab_separated_records() {
        let path = std::env::temp_dir()
            .join(format!("util_archive_test_{}.tsv", std::process::id()));
        std::fs::write(&path, "stale contents\n").unwrap();

        let mut archiver = Archiver::from_path(&path, b'\t').unwrap();
        archiver.serialise(Row { step: 0, value: 0.5 }).unwrap();
        archiver.serialise(Row { step: 1, value: -1.0 }).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "0\t0.5\n1\t-1.0\n");

        std::fs::remove_file(&path).unwrap();
    }
}
