//! # Capture Configuration
//!
//! One place to describe which monitors run and how they behave, then apply
//! it with [`install`].
//!
//! ## Environment Variables
//!
//! [`CaptureConfig::from_env`] starts from the defaults and reads:
//!
//! - `FAULTLINE_MONITORS`: comma separated list (`signal`, `panic`, `user`,
//!   `all`, `none`)
//! - `FAULTLINE_SIGTERM`: `1`/`true` to also trap SIGTERM
//! - `FAULTLINE_MAX_DEPTH`: frame limit of signal backtraces
//!
//! ## Example
//!
//! ```rust,no_run
//! use faultline_core::config::{install, CaptureConfig};
//! use faultline_core::monitors::{CrashEvent, MonitorSet};
//!
//! fn on_event(event: &mut CrashEvent<'_>)
//! {
//!     let _ = event.event_id;
//! }
//!
//! let config = CaptureConfig::default().with_monitors(MonitorSet::SIGNAL).on_event(on_event);
//! let active = install(&config).expect("capture setup");
//! assert!(active.contains(MonitorSet::SIGNAL));
//! ```

use std::env;

use tracing::{debug, info, warn};

use crate::context::reserve_thread;
use crate::error::{FaultlineError, Result};
use crate::log::{self, LogLevel};
use crate::monitors::{self, EventCallback, MonitorSet, SIGNAL_MONITOR};
use crate::types::ThreadId;
use crate::unwind::DEFAULT_MAX_DEPTH;

/// Everything [`install`] applies
#[derive(Debug, Clone)]
pub struct CaptureConfig
{
    /// Monitors to enable; all others are disabled
    pub monitors: MonitorSet,
    /// Trap SIGTERM as well
    pub sigterm: bool,
    /// Frame limit of signal backtraces
    pub max_stack_depth: usize,
    /// Threads never suspended during capture
    pub reserved_threads: Vec<ThreadId>,
    /// Minimum level of fault-path log lines
    pub log_level: LogLevel,
    /// Receives every event
    pub on_event: Option<EventCallback>,
}

impl Default for CaptureConfig
{
    fn default() -> Self
    {
        Self {
            monitors: MonitorSet::all(),
            sigterm: false,
            max_stack_depth: DEFAULT_MAX_DEPTH,
            reserved_threads: Vec::new(),
            log_level: LogLevel::Warn,
            on_event: None,
        }
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool>
{
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(FaultlineError::InvalidArgument(format!("{key}: expected a boolean, got {value:?}"))),
    }
}

impl CaptureConfig
{
    /// Defaults overridden by `FAULTLINE_*` environment variables
    ///
    /// ## Errors
    ///
    /// Returns [`FaultlineError::InvalidArgument`] naming the variable that
    /// could not be parsed.
    pub fn from_env() -> Result<Self>
    {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self>
    {
        let mut config = Self::default();
        if let Some(value) = lookup("FAULTLINE_MONITORS") {
            config.monitors = MonitorSet::parse(&value)
                .map_err(|name| FaultlineError::InvalidArgument(format!("FAULTLINE_MONITORS: unknown monitor {name:?}")))?;
        }
        if let Some(value) = lookup("FAULTLINE_SIGTERM") {
            config.sigterm = parse_bool("FAULTLINE_SIGTERM", &value)?;
        }
        if let Some(value) = lookup("FAULTLINE_MAX_DEPTH") {
            config.max_stack_depth = value
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|&depth| depth > 0)
                .ok_or_else(|| FaultlineError::InvalidArgument(format!("FAULTLINE_MAX_DEPTH: expected a positive number, got {value:?}")))?;
        }
        Ok(config)
    }

    #[must_use]
    pub fn with_monitors(mut self, monitors: MonitorSet) -> Self
    {
        self.monitors = monitors;
        self
    }

    #[must_use]
    pub fn with_sigterm(mut self, enabled: bool) -> Self
    {
        self.sigterm = enabled;
        self
    }

    #[must_use]
    pub fn with_max_stack_depth(mut self, depth: usize) -> Self
    {
        self.max_stack_depth = depth;
        self
    }

    #[must_use]
    pub fn reserve_thread(mut self, thread: ThreadId) -> Self
    {
        self.reserved_threads.push(thread);
        self
    }

    #[must_use]
    pub fn with_log_level(mut self, level: LogLevel) -> Self
    {
        self.log_level = level;
        self
    }

    #[must_use]
    pub fn on_event(mut self, callback: EventCallback) -> Self
    {
        self.on_event = Some(callback);
        self
    }
}

/// Apply `config` and enable the requested monitors
///
/// The callback and settings are in place before any monitor is enabled.
/// Returns the monitors that really ended up enabled.
///
/// ## Errors
///
/// Fails if a thread cannot be reserved. A monitor that fails to enable is
/// logged and left out of the returned set instead.
pub fn install(config: &CaptureConfig) -> Result<MonitorSet>
{
    log::set_level(config.log_level);
    monitors::set_sigterm_monitoring_enabled(config.sigterm);
    SIGNAL_MONITOR.set_max_stack_depth(config.max_stack_depth);
    monitors::set_event_callback(config.on_event);
    for &thread in &config.reserved_threads {
        reserve_thread(thread)?;
    }

    let active = monitors::set_active_monitors(config.monitors);
    if active == config.monitors {
        info!("Crash capture active: {:?}", active);
    } else {
        warn!("Requested monitors {:?}, enabled {:?}", config.monitors, active);
    }
    debug!("SIGTERM monitoring {}, max depth {}", config.sigterm, config.max_stack_depth);
    Ok(active)
}

#[cfg(test)]
mod tests
{
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String>
    {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_variables()
    {
        let config = CaptureConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.monitors, MonitorSet::all());
        assert!(!config.sigterm);
        assert_eq!(config.max_stack_depth, DEFAULT_MAX_DEPTH);
    }

    #[test]
    fn test_reads_variables()
    {
        let config = CaptureConfig::from_lookup(lookup(&[
            ("FAULTLINE_MONITORS", "signal,user"),
            ("FAULTLINE_SIGTERM", "true"),
            ("FAULTLINE_MAX_DEPTH", "64"),
        ]))
        .unwrap();
        assert_eq!(config.monitors, MonitorSet::SIGNAL | MonitorSet::USER_REPORTED);
        assert!(config.sigterm);
        assert_eq!(config.max_stack_depth, 64);
    }

    #[test]
    fn test_rejects_bad_values()
    {
        assert!(CaptureConfig::from_lookup(lookup(&[("FAULTLINE_MONITORS", "mach")])).is_err());
        assert!(CaptureConfig::from_lookup(lookup(&[("FAULTLINE_SIGTERM", "maybe")])).is_err());
        assert!(CaptureConfig::from_lookup(lookup(&[("FAULTLINE_MAX_DEPTH", "0")])).is_err());
    }

    #[test]
    fn test_builder()
    {
        let config = CaptureConfig::default()
            .with_monitors(MonitorSet::PANIC)
            .with_sigterm(true)
            .with_max_stack_depth(10)
            .with_log_level(LogLevel::Debug)
            .reserve_thread(ThreadId::from(42));
        assert_eq!(config.monitors, MonitorSet::PANIC);
        assert_eq!(config.reserved_threads, vec![ThreadId::from(42)]);
        assert_eq!(config.log_level, LogLevel::Debug);
    }
}
