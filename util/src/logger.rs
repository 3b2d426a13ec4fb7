//! Logging setup
//!
//! All executables log through the `log` facade into a fern dispatcher which writes every line to
//! stdout and to the session's log file. Lines are stamped with the seconds elapsed since the
//! session epoch rather than wall clock time so that logs of one run line up with its telemetry.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use colored::{ColoredString, Colorize};
use log::{self, info, Record};
use std::fmt;
use thiserror::Error;

// Internal imports
use crate::session::{self, Session};

// Re-exports
pub use log::LevelFilter;

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors associated with initialising the logger.
#[derive(Debug, Error)]
pub enum LoggerInitError {
    #[error("Expected a log level of at least `INFO`, found `{0}`")]
    InvalidMinLogLevel(log::LevelFilter),

    #[error("Error initialising the log file: {0}")]
    LogFileInitError(std::io::Error),

    #[error("An error occured while setting up the logger: {0}")]
    FernInitError(log::SetLoggerError),
}

// ---------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ---------------------------------------------------------------------------

/// Initialise the logger for this execution.
///
/// `min_level` must be `Info` or more verbose, warnings and errors are never filtered out.
///
/// # Safety
///
/// - This function must only be called once to prevent corrupting logs.
pub fn logger_init(min_level: LevelFilter, session: &Session) -> Result<(), LoggerInitError> {
    logger_init_with_overrides(min_level, &[], session)
}

/// Initialise the logger with a different level for some targets.
///
/// Overrides are `(target, level)` pairs, for example quietening a module which traces every
/// cycle. An override may not hide warnings either.
pub fn logger_init_with_overrides(
    min_level: LevelFilter,
    overrides: &[(&'static str, LevelFilter)],
    session: &Session,
) -> Result<(), LoggerInitError> {
    if min_level < log::Level::Info {
        return Err(LoggerInitError::InvalidMinLogLevel(min_level));
    }
    for &(_, level) in overrides {
        if level < log::Level::Warn {
            return Err(LoggerInitError::InvalidMinLogLevel(level));
        }
    }

    let log_file = fern::log_file(&session.log_file_path)
        .map_err(LoggerInitError::LogFileInitError)?;

    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| out.finish(format_args!("{}", Line(message, record))))
        .level(min_level);

    for &(target, level) in overrides {
        dispatch = dispatch.level_for(target, level);
    }

    dispatch
        .chain(std::io::stdout())
        .chain(log_file)
        .apply()
        .map_err(LoggerInitError::FernInitError)?;

    info!("Logging initialised");
    info!("    Session epoch: {}", session::get_epoch());
    info!("    Log level: {:?}", min_level);
    for &(target, level) in overrides {
        info!("    Log level for {}: {:?}", target, level);
    }
    info!("    Log file path: {:?}", session.log_file_path);

    Ok(())
}

/// Flush any buffered log output.
///
/// Must be called before exiting on an error path, exit does not run destructors.
pub fn logger_flush() {
    log::logger().flush();
}

// ---------------------------------------------------------------------------
// PRIVATE ITEMS
// ---------------------------------------------------------------------------

/// A formatted log line.
struct Line<'a, 'b>(&'a fmt::Arguments<'b>, &'a Record<'b>);

impl<'a, 'b> fmt::Display for Line<'a, 'b> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Line(message, record) = self;

        write!(
            f,
            "[{:10.6} {}] ",
            session::get_elapsed_seconds(),
            level_tag(record.level())
        )?;

        // Debug and trace lines are only useful with the module they came from
        if record.level() > log::Level::Info {
            write!(f, "{}: ", record.target())?;
        }

        write!(f, "{}", message)
    }
}

/// Get the coloured tag of a log level
fn level_tag(level: log::Level) -> ColoredString {
    match level {
        log::Level::Trace => "TRC".dimmed().italic(),
        log::Level::Debug => "DBG".dimmed(),
        log::Level::Info => "INF".normal(),
        log::Level::Warn => "WRN".yellow(),
        log::Level::Error => "ERR".red().bold(),
    }
}
