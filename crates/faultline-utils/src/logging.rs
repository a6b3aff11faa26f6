//! # Logging Utilities
//!
//! Logging setup for faultline tools using `tracing`.
//!
//! Two channels exist in a process that captures crashes:
//!
//! - `tracing`, for everything that runs in a normal context (setup,
//!   enabling monitors, reading reports back). This module configures it.
//! - the fault-path logger in `faultline_core::log`, which writes straight to
//!   a descriptor while a crash is being handled. Its level is kept in step
//!   with the one chosen here.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use faultline_utils::init_logging;
//!
//! // Reads RUST_LOG and the FAULTLINE_LOG_* variables
//! let _guard = init_logging().expect("Failed to initialize logging");
//!
//! tracing::info!("Application started");
//! ```
//!
//! Keep the returned [`LoggingGuard`] alive for as long as logs should reach
//! a file; dropping it flushes and stops the background writer.
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: level filter (e.g. `RUST_LOG=debug`, `RUST_LOG=faultline_core=trace`)
//! - `FAULTLINE_LOG_FORMAT`: `json` or `pretty` (default: `pretty`)
//! - `FAULTLINE_LOG_FILE`: also write logs to this file, rotated daily
//!
//! Console output goes to stderr, so a tool's own output on stdout stays
//! clean.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, io};

use chrono::Local;
use faultline_core::log as fault_log;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Directory under `$HOME` that holds default log files
pub const LOG_DIR_NAME: &str = ".faultline";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat
{
    /// Pretty-printed, human-readable format (default for development)
    #[default]
    Pretty,
    /// JSON format (default for production)
    Json,
}

impl FromStr for LogFormat
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.to_lowercase().as_str() {
            "pretty" | "dev" | "development" => Ok(LogFormat::Pretty),
            "json" | "prod" | "production" => Ok(LogFormat::Json),
            _ => Err(format!("Unknown log format: {s}. Use 'pretty' or 'json'")),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel
{
    /// Error level
    Error,
    /// Warning level
    Warn,
    /// Info level (default)
    Info,
    /// Debug level
    Debug,
    /// Trace level (most verbose)
    Trace,
}

impl From<LogLevel> for Level
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

impl From<LogLevel> for fault_log::LogLevel
{
    fn from(level: LogLevel) -> Self
    {
        match level {
            LogLevel::Error => fault_log::LogLevel::Error,
            LogLevel::Warn => fault_log::LogLevel::Warn,
            LogLevel::Info => fault_log::LogLevel::Info,
            LogLevel::Debug => fault_log::LogLevel::Debug,
            LogLevel::Trace => fault_log::LogLevel::Trace,
        }
    }
}

impl From<fault_log::LogLevel> for LogLevel
{
    fn from(level: fault_log::LogLevel) -> Self
    {
        match level {
            fault_log::LogLevel::Error => LogLevel::Error,
            fault_log::LogLevel::Warn => LogLevel::Warn,
            fault_log::LogLevel::Info => LogLevel::Info,
            fault_log::LogLevel::Debug => LogLevel::Debug,
            fault_log::LogLevel::Trace => LogLevel::Trace,
        }
    }
}

/// Accepts the same names as `FAULTLINE_LOG_LEVEL`
impl FromStr for LogLevel
{
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        fault_log::LogLevel::parse(s)
            .map(LogLevel::from)
            .ok_or_else(|| format!("unknown log level {s:?}; expected error, warn, info, debug or trace"))
    }
}

/// Keeps file logging running
///
/// Logs written to a file go through a background thread. Dropping the
/// guard flushes what is queued and stops that thread.
#[must_use = "dropping the guard stops file logging"]
#[derive(Debug, Default)]
pub struct LoggingGuard
{
    file: Option<WorkerGuard>,
}

impl LoggingGuard
{
    /// Whether logs are also going to a file
    pub fn has_file(&self) -> bool
    {
        self.file.is_some()
    }
}

/// Initialize logging from the environment
///
/// Reads configuration from environment variables:
/// - `RUST_LOG`: Log level filter (e.g., `debug`, `faultline_core=debug`)
/// - `FAULTLINE_LOG_FORMAT`: Output format (`json` or `pretty`, default: `pretty`)
/// - `FAULTLINE_LOG_FILE`: Optional path to log file
///
/// ## Example
///
/// ```rust,no_run
/// use faultline_utils::init_logging;
///
/// let _guard = init_logging().expect("Failed to initialize logging");
/// tracing::info!("Application started");
/// ```
///
/// ## Errors
///
/// Returns an error if:
/// - Logging is already initialized
/// - `FAULTLINE_LOG_FORMAT` holds an unknown format
/// - File logging fails (if `FAULTLINE_LOG_FILE` is set)
pub fn init_logging() -> Result<LoggingGuard, LoggingError>
{
    let format = match env::var("FAULTLINE_LOG_FORMAT") {
        Ok(value) => LogFormat::from_str(&value).map_err(LoggingError::InvalidFormat)?,
        Err(_) => LogFormat::default(),
    };

    // RUST_LOG may be a full filter directive; only a bare level sets the
    // fault-path level.
    let level = env::var("RUST_LOG")
        .ok()
        .and_then(|value| value.parse::<LogLevel>().ok())
        .unwrap_or(LogLevel::Info);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::from(level).to_string()));
    init_console(format, level, filter)
}

/// Initialize logging with explicit level and format
///
/// `FAULTLINE_LOG_FILE` is still honored.
///
/// ## Example
///
/// ```rust,no_run
/// use faultline_utils::{LogFormat, LogLevel, init_logging_with_level};
///
/// let _guard = init_logging_with_level(LogLevel::Debug, LogFormat::Pretty)
///     .expect("Failed to initialize logging");
/// ```
///
/// ## Errors
///
/// Returns an error if logging is already initialized or file logging fails.
pub fn init_logging_with_level(level: LogLevel, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    init_console(format, level, EnvFilter::new(Level::from(level).to_string()))
}

/// Initialize logging to `log_file` only, nothing on the console
///
/// Used by crash drills, where the fault-path logger owns stderr and
/// interleaved `tracing` output would make it unreadable.
///
/// ## Arguments
///
/// * `level` - Optional log level. If `None`, uses `RUST_LOG` or defaults to `INFO`.
///
/// ## Errors
///
/// Returns an error if logging is already initialized or the file's
/// directory cannot be created.
pub fn init_file_logging(log_file: &Path, level: Option<LogLevel>, format: LogFormat) -> Result<LoggingGuard, LoggingError>
{
    // Priority:
    // 1. An explicit level (from a --log-level flag)
    // 2. RUST_LOG, which may hold module-specific filters
    // 3. INFO
    let filter = if let Some(level) = level {
        EnvFilter::new(Level::from(level).to_string())
    } else if let Ok(rust_log) = env::var("RUST_LOG") {
        EnvFilter::try_new(&rust_log).unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()))
    } else {
        EnvFilter::new(Level::INFO.to_string())
    };

    let (directory, file_name) = split_log_path(log_file)?;
    std::fs::create_dir_all(&directory)?;
    // The default file name already carries the date, so never rotate.
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));

    fault_log::set_level(level.unwrap_or(LogLevel::Info).into());
    Registry::default()
        .with(vec![build_layer(format, writer, false, filter)])
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;
    Ok(LoggingGuard { file: Some(guard) })
}

/// Dated log file path for `app`
///
/// `~/.faultline/YYYY-MM-DD-<app>.log`, or the same name in the temporary
/// directory when `HOME` is not set.
pub fn default_log_file(app: &str) -> PathBuf
{
    let today = Local::now().format("%Y-%m-%d");
    let directory = env::var_os("HOME").map_or_else(env::temp_dir, |home| PathBuf::from(home).join(LOG_DIR_NAME));
    directory.join(format!("{today}-{app}.log"))
}

fn split_log_path(path: &Path) -> Result<(PathBuf, PathBuf), LoggingError>
{
    let file_name = path
        .file_name()
        .ok_or_else(|| LoggingError::InvalidPath(path.display().to_string()))?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((directory, PathBuf::from(file_name)))
}

fn init_console(format: LogFormat, level: LogLevel, filter: EnvFilter) -> Result<LoggingGuard, LoggingError>
{
    let mut layers = vec![build_layer(format, io::stderr, true, filter.clone())];

    let mut guard = LoggingGuard::default();
    if let Some(log_file) = env::var_os("FAULTLINE_LOG_FILE").map(PathBuf::from) {
        let (directory, file_name) = split_log_path(&log_file)?;
        std::fs::create_dir_all(&directory)?;
        let (writer, worker) = tracing_appender::non_blocking(tracing_appender::rolling::daily(directory, file_name));
        layers.push(build_layer(format, writer, false, filter));
        guard.file = Some(worker);
    }

    fault_log::set_level(level.into());
    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|err| LoggingError::InitializationFailed(err.to_string()))?;
    Ok(guard)
}

fn build_layer<W>(format: LogFormat, writer: W, ansi: bool, filter: EnvFilter) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(ansi)
            .with_filter(filter)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(writer)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .with_file(true)
            .with_line_number(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_current_span(true)
            .with_span_list(true)
            .with_filter(filter)
            .boxed(),
    }
}

/// Logging initialization error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError
{
    /// Invalid log format
    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    /// A log file path without a file name
    #[error("Invalid log file path: {0}")]
    InvalidPath(String),

    /// Failed to initialize logging
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// File logging error
    #[error("File logging error: {0}")]
    FileError(#[from] io::Error),
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_log_format_aliases()
    {
        let cases = [
            ("Pretty", LogFormat::Pretty),
            ("dev", LogFormat::Pretty),
            ("JSON", LogFormat::Json),
            ("production", LogFormat::Json),
        ];
        for (name, expected) in cases {
            assert_eq!(name.parse::<LogFormat>(), Ok(expected), "{name}");
        }
        assert!("logfmt".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_log_level_shares_fault_path_names()
    {
        assert_eq!(" Warning ".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert_eq!("TRACE".parse::<LogLevel>(), Ok(LogLevel::Trace));
        let err = "verbose".parse::<LogLevel>().unwrap_err();
        assert!(err.contains("\"verbose\""));
    }

    #[test]
    fn test_log_level_conversions()
    {
        assert_eq!(Level::from(LogLevel::Error), Level::ERROR);
        assert_eq!(Level::from(LogLevel::Debug), Level::DEBUG);
        for level in [LogLevel::Error, LogLevel::Warn, LogLevel::Info, LogLevel::Debug, LogLevel::Trace] {
            assert_eq!(LogLevel::from(fault_log::LogLevel::from(level)), level);
        }
    }

    #[test]
    fn test_default_log_file_name()
    {
        let path = default_log_file("faultline");
        let name = path.file_name().and_then(|name| name.to_str()).unwrap();
        assert!(name.ends_with("-faultline.log"));
        assert!(name.starts_with(&Local::now().format("%Y-").to_string()));
    }

    #[test]
    fn test_split_log_path()
    {
        let (directory, file) = split_log_path(Path::new("/var/log/faultline.log")).unwrap();
        assert_eq!(directory, PathBuf::from("/var/log"));
        assert_eq!(file, PathBuf::from("faultline.log"));

        let (directory, _) = split_log_path(Path::new("faultline.log")).unwrap();
        assert_eq!(directory, PathBuf::from("."));

        assert!(matches!(split_log_path(Path::new("/")), Err(LoggingError::InvalidPath(_))));
    }
}
