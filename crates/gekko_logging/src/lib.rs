#![deny(missing_docs)]
//! Shared logging utilities for the gekko workspace.
//!
//! This crate provides the `gekko_*` logging macros used across the codebase,
//! the terminal/file logger setup used by the command line front end, and a
//! minimal test initializer for the global logger.

use std::fs;
use std::path::{Path, PathBuf};

use file_rotate::compression::Compression;
use file_rotate::suffix::AppendCount;
use file_rotate::{ContentLimit, FileRotate};
use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

#[doc(hidden)]
pub use log as __log;

/// Size at which the log file is rotated.
pub const DEFAULT_MAX_LOG_BYTES: usize = 5 * 1000 * 1000;

/// Rotated log files kept next to the active one.
const ROTATED_LOGS_KEPT: usize = 5;

/// Logs a trace-level message using the global logging facade.
#[macro_export]
macro_rules! gekko_trace {
    ($($arg:tt)*) => {{
        $crate::__log::trace!($($arg)*);
    }};
}

/// Logs a debug-level message using the global logging facade.
#[macro_export]
macro_rules! gekko_debug {
    ($($arg:tt)*) => {{
        $crate::__log::debug!($($arg)*);
    }};
}

/// Logs an info-level message using the global logging facade.
#[macro_export]
macro_rules! gekko_info {
    ($($arg:tt)*) => {{
        $crate::__log::info!($($arg)*);
    }};
}

/// Logs a warn-level message using the global logging facade.
#[macro_export]
macro_rules! gekko_warn {
    ($($arg:tt)*) => {{
        $crate::__log::warn!($($arg)*);
    }};
}

/// Logs an error-level message using the global logging facade.
#[macro_export]
macro_rules! gekko_error {
    ($($arg:tt)*) => {{
        $crate::__log::error!($($arg)*);
    }};
}

/// Where and how verbosely log records are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    /// Level for the terminal logger.
    pub terminal_level: LevelFilter,
    /// Optional log file. Records are appended; the parent directory is created.
    pub file: Option<PathBuf>,
    /// Level for the file logger.
    pub file_level: LevelFilter,
    /// The log file is rotated and the old one gzipped once it reaches this size.
    pub max_file_bytes: usize,
}

impl LogOptions {
    /// Terminal at `Info` (or `Debug` when `verbose`), no log file.
    pub fn terminal(verbose: bool) -> Self {
        Self {
            terminal_level: if verbose {
                LevelFilter::Debug
            } else {
                LevelFilter::Info
            },
            file: None,
            file_level: LevelFilter::Debug,
            max_file_bytes: DEFAULT_MAX_LOG_BYTES,
        }
    }

    /// Adds a log file to these options.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }
}

impl Default for LogOptions {
    fn default() -> Self {
        Self::terminal(false)
    }
}

/// Installs the global logger described by `options`.
///
/// A log file that cannot be opened is reported on stderr and skipped; the
/// terminal logger is still installed. Fails only when a global logger has
/// already been set.
pub fn initialize(options: &LogOptions) -> Result<(), log::SetLoggerError> {
    let config = build_config();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        options.terminal_level,
        config.clone(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];
    if let Some(path) = options.file.as_deref() {
        if let Some(file_logger) =
            create_file_logger(path, options.max_file_bytes, options.file_level, config)
        {
            loggers.push(file_logger);
        }
    }

    CombinedLogger::init(loggers)
}

/// Initializes a simple terminal logger for use in tests.
///
/// This safely no-ops if another logger has already been initialized.
pub fn initialize_for_tests() {
    // Use debug level in debug builds, info in release builds.
    let level = if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    // Ignore the error if a logger was already set by another test.
    let _ = CombinedLogger::init(vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )]);
}

fn build_config() -> Config {
    ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_target_level(LevelFilter::Error)
        .build()
}

fn create_file_logger(
    path: &Path,
    max_bytes: usize,
    level: LevelFilter,
    config: Config,
) -> Option<Box<WriteLogger<FileRotate<AppendCount>>>> {
    match open_log_file(path, max_bytes) {
        Ok(file) => Some(WriteLogger::new(level, config, file)),
        Err(err) => {
            eprintln!("Warning: Could not open log file at {:?}: {}", path, err);
            None
        }
    }
}

fn open_log_file(path: &Path, max_bytes: usize) -> std::io::Result<FileRotate<AppendCount>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(FileRotate::new(
        path,
        AppendCount::new(ROTATED_LOGS_KEPT),
        ContentLimit::Bytes(max_bytes),
        Compression::OnRotate(0),
        #[cfg(unix)]
        None,
    ))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn verbose_terminal_logs_debug() {
        assert_eq!(LogOptions::terminal(true).terminal_level, LevelFilter::Debug);
        assert_eq!(LogOptions::terminal(false).terminal_level, LevelFilter::Info);
        assert_eq!(LogOptions::default().file, None);
        assert_eq!(LogOptions::default().max_file_bytes, DEFAULT_MAX_LOG_BYTES);
    }

    #[test]
    fn log_file_is_created_with_missing_parents() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("state").join("logs").join("gekko.log");
        let mut log = open_log_file(&path, DEFAULT_MAX_LOG_BYTES).unwrap();
        writeln!(log, "first run").unwrap();
        log.flush().unwrap();
        drop(log);

        let mut log = open_log_file(&path, DEFAULT_MAX_LOG_BYTES).unwrap();
        writeln!(log, "second run").unwrap();
        log.flush().unwrap();
        drop(log);

        assert!(fs::read_to_string(&path).unwrap().ends_with("second run\n"));
    }

    #[test]
    fn oversized_log_is_rotated() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("gekko.log");
        let mut log = open_log_file(&path, 64).unwrap();
        for n in 0..6 {
            writeln!(log, "record {n} padded out to well past a few bytes").unwrap();
        }
        log.flush().unwrap();
        drop(log);

        let rotated: Vec<String> = fs::read_dir(temp.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("gekko.log."))
            .collect();
        assert!(!rotated.is_empty(), "no rotated log next to {path:?}");
        assert!(fs::metadata(&path).unwrap().len() <= 64);
    }
}
