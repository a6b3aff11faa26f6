//! # Monitors
//!
//! A monitor detects one class of failure and turns it into a
//! [`CrashEvent`]. Three exist, each a process-wide singleton:
//!
//! | Id             | Catches                         | Flags                |
//! |----------------|---------------------------------|----------------------|
//! | `Signal`       | fatal POSIX signals             | `FATAL \| ASYNC_SAFE` |
//! | `Panic`        | Rust panics                     | `FATAL`              |
//! | `UserReported` | exceptions the app reports      | none                 |
//!
//! ## Lifecycle
//!
//! [`Monitor::set_enabled`] is idempotent and all-or-nothing: if installing
//! any OS hook fails, the hooks installed so far are restored and the
//! monitor stays disabled.
//!
//! ## Event pipeline
//!
//! Every monitor ends up in [`handle_event`], which:
//!
//! 1. lets each enabled monitor [`annotate`](Monitor::annotate) the event
//! 2. calls the callback registered with [`set_event_callback`]
//! 3. disables every monitor if the event is fatal, so that re-raising the
//!    fault reaches the handlers that were there before
//!
//! ## Fault-path rules
//!
//! State shared with handlers is atomics only. The callback runs inside the
//! signal handler for signal events and must restrict itself to
//! async-signal-safe work (the `io` module provides the primitives).

mod event;
pub mod panic;
pub mod signal;
pub mod user;

use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use bitflags::bitflags;
pub use event::{CrashEvent, EventId, SignalInfo, UserException, EVENT_ID_LENGTH};
pub use panic::PANIC_MONITOR;
pub use signal::{set_sigterm_monitoring_enabled, sigterm_monitoring_enabled, SIGNAL_MONITOR};
use tracing::{debug, warn};
pub use user::{report_user_exception, UserReport, USER_MONITOR};

use crate::error::Result;
use crate::log::LogLevel;
use crate::safe_log;

bitflags! {
    /// Capabilities of a monitor
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MonitorFlags: u32
    {
        /// The failure it catches ends the process
        const FATAL = 1 << 0;
        /// It runs in a signal handler
        const ASYNC_SAFE = 1 << 1;
    }
}

bitflags! {
    /// A selection of monitors, as used by [`set_active_monitors`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MonitorSet: u32
    {
        const SIGNAL = 1 << 0;
        const PANIC = 1 << 1;
        const USER_REPORTED = 1 << 2;
    }
}

impl MonitorSet
{
    /// Parse a comma separated list such as `"signal,panic"`
    ///
    /// `all` and `none` are accepted. Unknown names are returned as the error.
    pub fn parse(list: &str) -> std::result::Result<Self, String>
    {
        let mut set = MonitorSet::empty();
        for name in list.split(',').map(str::trim).filter(|name| !name.is_empty()) {
            set |= match name.to_ascii_lowercase().as_str() {
                "signal" => MonitorSet::SIGNAL,
                "panic" => MonitorSet::PANIC,
                "user" | "user_reported" | "userreported" => MonitorSet::USER_REPORTED,
                "all" => MonitorSet::all(),
                "none" => MonitorSet::empty(),
                _ => return Err(name.to_string()),
            };
        }
        Ok(set)
    }
}

/// Common interface of all monitors
pub trait Monitor: Sync
{
    /// Stable identifier, copied into every event the monitor produces
    fn id(&self) -> &'static str;

    fn flags(&self) -> MonitorFlags
    {
        MonitorFlags::empty()
    }

    /// Install or remove the monitor's hooks
    ///
    /// Does nothing if the monitor is already in the requested state.
    ///
    /// ## Errors
    ///
    /// Returns the installation error after restoring everything installed
    /// by this call. The monitor is left disabled.
    fn set_enabled(&self, enabled: bool) -> Result<()>;

    fn is_enabled(&self) -> bool;

    /// Inspect or rewrite an event, possibly produced by another monitor
    fn annotate(&self, _event: &mut CrashEvent<'_>) {}
}

static MONITORS: [(MonitorSet, &dyn Monitor); 3] = [
    (MonitorSet::SIGNAL, &SIGNAL_MONITOR),
    (MonitorSet::PANIC, &PANIC_MONITOR),
    (MonitorSet::USER_REPORTED, &USER_MONITOR),
];

/// Every monitor, in dispatch order
pub fn monitors() -> impl Iterator<Item = &'static dyn Monitor>
{
    MONITORS.iter().map(|&(_, monitor)| monitor)
}

/// Look up a monitor by id
pub fn monitor(id: &str) -> Option<&'static dyn Monitor>
{
    monitors().find(|monitor| monitor.id() == id)
}

/// Enable the monitors in `requested` and disable all others
///
/// Failures are logged and skipped. Returns the set that really ended up
/// enabled.
pub fn set_active_monitors(requested: MonitorSet) -> MonitorSet
{
    for &(member, monitor) in &MONITORS {
        let enable = requested.contains(member);
        if let Err(error) = monitor.set_enabled(enable) {
            warn!("Could not {} monitor {}: {}", if enable { "enable" } else { "disable" }, monitor.id(), error.fault_display());
        }
    }
    let active = active_monitors();
    debug!("Active monitors: {:?}", active);
    active
}

/// Set of monitors currently enabled
pub fn active_monitors() -> MonitorSet
{
    MONITORS
        .iter()
        .filter(|(_, monitor)| monitor.is_enabled())
        .fold(MonitorSet::empty(), |set, &(member, _)| set | member)
}

/// Disable every monitor
///
/// Safe to call from the fault path.
pub fn disable_all()
{
    for monitor in monitors() {
        if let Err(error) = monitor.set_enabled(false) {
            safe_log!(LogLevel::Error, "could not disable monitor {}: {}", monitor.id(), error.fault_display());
        }
    }
}

/// Receives every completed event
pub type EventCallback = fn(&mut CrashEvent<'_>);

static EVENT_CALLBACK: AtomicPtr<()> = AtomicPtr::new(std::ptr::null_mut());

/// Register the function that consumes events, replacing any previous one
pub fn set_event_callback(callback: Option<EventCallback>)
{
    let raw = callback.map_or(std::ptr::null_mut(), |callback| callback as *mut ());
    EVENT_CALLBACK.store(raw, Ordering::SeqCst);
}

fn event_callback() -> Option<EventCallback>
{
    let raw = EVENT_CALLBACK.load(Ordering::SeqCst);
    if raw.is_null() {
        return None;
    }
    // SAFETY: only set_event_callback stores into the slot, always from an
    // EventCallback.
    Some(unsafe { std::mem::transmute::<*mut (), EventCallback>(raw) })
}

static HANDLING_FATAL_EXCEPTION: AtomicBool = AtomicBool::new(false);
static CRASHED_DURING_HANDLING: AtomicBool = AtomicBool::new(false);
static REQUIRES_ASYNC_SAFETY: AtomicBool = AtomicBool::new(false);
static UNHANDLED_FATAL_SIGNAL: AtomicBool = AtomicBool::new(false);

/// Record that a fatal failure is being handled
///
/// A second call while the first is still in flight means the capture code
/// itself failed: every monitor is disabled so the process can die normally,
/// and `true` is returned. The caller copies that into
/// [`CrashEvent::crashed_during_crash_handling`].
pub fn notify_fatal_exception_captured(is_async_safe_environment: bool) -> bool
{
    if is_async_safe_environment {
        REQUIRES_ASYNC_SAFETY.store(true, Ordering::SeqCst);
    }
    if HANDLING_FATAL_EXCEPTION.swap(true, Ordering::SeqCst) {
        CRASHED_DURING_HANDLING.store(true, Ordering::SeqCst);
        safe_log!(LogLevel::Error, "crashed while handling a crash; disabling all monitors");
        disable_all();
        return true;
    }
    false
}

/// Whether a fatal failure is being handled right now
pub fn is_handling_fatal_exception() -> bool
{
    HANDLING_FATAL_EXCEPTION.load(Ordering::SeqCst)
}

/// Whether the event in flight came from a signal handler
pub fn requires_async_safety() -> bool
{
    REQUIRES_ASYNC_SAFETY.load(Ordering::SeqCst)
}

/// Record that a fatal signal arrived while its monitor was not handling it
pub fn notify_unhandled_fatal_signal()
{
    UNHANDLED_FATAL_SIGNAL.store(true, Ordering::SeqCst);
}

pub fn unhandled_fatal_signal_observed() -> bool
{
    UNHANDLED_FATAL_SIGNAL.load(Ordering::SeqCst)
}

/// Annotate, deliver and finish an event
pub fn handle_event(event: &mut CrashEvent<'_>)
{
    event.crashed_during_crash_handling |= CRASHED_DURING_HANDLING.load(Ordering::SeqCst);

    for monitor in monitors() {
        if monitor.is_enabled() {
            monitor.annotate(event);
        }
    }

    match event_callback() {
        Some(callback) => callback(event),
        None => safe_log!(LogLevel::Warn, "no event callback registered; dropping event {}", event.event_id),
    }

    if event.is_fatal {
        disable_all();
    }
}
