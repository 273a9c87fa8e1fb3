//! Logging for the linkctl CLI.
//!
//! Logs go to stderr so command output on stdout stays machine-readable
//! (`status`/`watch` print JSON values there). Level comes from the `-v`
//! flag rather than the build profile; a one-shot diagnostic tool gets its
//! verbosity per invocation, not per binary.

use crate::error::LinkctlError;

use common::ErrorLocation;

use std::io::stderr;
use std::sync::Once;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use fern::Dispatch;
use fern::colors::Color::{Blue, Green, Magenta, Red, Yellow};
use fern::colors::ColoredLevelConfig;
use humantime::format_rfc3339;
use log::{LevelFilter, warn};

/// Thread-safe initialization guard.
static INIT_LOGGER_ONCE: Once = Once::new();

/// Tracks if logger initialization was already attempted.
static LOGGER_ALREADY_CALLED: AtomicBool = AtomicBool::new(false);

/// Map the `-v` occurrence count to a log level.
pub fn level_for_verbosity(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Initialize the stderr logger at `level`.
///
/// Safe to call multiple times - subsequent calls log a warning and return Ok.
/// The actual initialization runs exactly once.
///
/// # Errors
///
/// Returns an error if the dispatch configuration fails.
pub fn initialize(level: LevelFilter) -> Result<(), LinkctlError> {
    if LOGGER_ALREADY_CALLED.swap(true, Ordering::SeqCst) {
        warn!("Logger already initialized");
        return Ok(());
    }

    let mut result = Ok(());

    INIT_LOGGER_ONCE.call_once(|| {
        result = initialize_internal(level);
    });

    result
}

#[track_caller]
fn initialize_internal(level: LevelFilter) -> Result<(), LinkctlError> {
    let color_configuration = ColoredLevelConfig::new()
        .debug(Blue)
        .info(Green)
        .warn(Yellow)
        .error(Red)
        .trace(Magenta);

    Dispatch::new()
        .level(level)
        .format(move |out, message, record| {
            out.finish(format_args!(
                "[{date} - {level}] {message}",
                date = format_rfc3339(SystemTime::now()),
                level = color_configuration.color(record.level()),
                message = message,
            ))
        })
        .chain(stderr())
        .apply()
        .map_err(|e| LinkctlError::Linkctl {
            message: format!("Failed to initialize logger: {e}"),
            location: ErrorLocation::from(std::panic::Location::caller()),
        })
}
