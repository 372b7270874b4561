//! Log file output
//!
//! Besides the console, the relay keeps a daily-rolling log file under
//! `logs/` in the same directory as its preferences. Files are named
//! `main.<date>.log`.

use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use crate::preferences::app_data_dir;
use crate::{RelayError, Result};

pub const LOG_DIR: &str = "logs";
pub const LOG_FILE_PREFIX: &str = "main";
pub const LOG_FILE_SUFFIX: &str = "log";

/// `logs/` next to the preferences file
pub fn default_log_dir() -> PathBuf {
    app_data_dir().join(LOG_DIR)
}

/// Open a daily-rolling log file in `dir`, creating the directory if needed.
///
/// Writes go through a background worker; keep the guard alive for as long as
/// logging should reach the file, dropping it flushes what is buffered.
pub fn open_log_file(dir: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir).map_err(|e| RelayError::file_error(dir.to_path_buf(), e))?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix(LOG_FILE_SUFFIX)
        .build(dir)
        .map_err(|e| RelayError::file_error(dir.to_path_buf(), std::io::Error::other(e)))?;

    Ok(tracing_appender::non_blocking(appender))
}
