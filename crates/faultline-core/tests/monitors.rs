//! Tests for the monitor registry and the user-report event pipeline
//!
//! Monitors are process-wide, so every test takes `LOCK` first.

use std::sync::{Mutex, MutexGuard};

use faultline_core::monitors::{
    active_monitors, monitor, report_user_exception, set_active_monitors, set_event_callback, CrashEvent,
    MonitorFlags, MonitorSet, UserReport,
};

static LOCK: Mutex<()> = Mutex::new(());

/// What the callback saw, copied out of the event
#[derive(Debug, Clone, Default, PartialEq)]
struct Seen
{
    monitor_id: String,
    reason: Option<String>,
    name: Option<String>,
    language: Option<String>,
    trace: Vec<String>,
    signum: i32,
    is_user_reported: bool,
    is_crashed_context: bool,
    depth: usize,
}

static SEEN: Mutex<Vec<Seen>> = Mutex::new(Vec::new());

fn record(event: &mut CrashEvent<'_>)
{
    let mut depth = 0;
    while event.stack_cursor.advance() {
        depth += 1;
    }
    let exception = event.user_exception;
    let seen = Seen {
        monitor_id: event.monitor_id.to_string(),
        reason: event.crash_reason.map(str::to_string),
        name: exception.map(|e| e.name.to_string()),
        language: exception.and_then(|e| e.language).map(str::to_string),
        trace: exception.map(|e| e.custom_stack_trace.iter().map(|s| s.to_string()).collect()).unwrap_or_default(),
        signum: event.signal.signum,
        is_user_reported: event.is_user_reported,
        is_crashed_context: event.machine_context.is_crashed_context(),
        depth,
    };
    SEEN.lock().unwrap().push(seen);
}

fn setup() -> MutexGuard<'static, ()>
{
    let guard = LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    SEEN.lock().unwrap().clear();
    set_event_callback(Some(record));
    guard
}

fn take_seen() -> Vec<Seen>
{
    std::mem::take(&mut *SEEN.lock().unwrap())
}

fn script_error()
{
    report_user_exception(&UserReport {
        name: "ScriptError",
        reason: Some("attempt to index a nil value"),
        language: Some("lua"),
        line_of_code: Some("local x = t.field"),
        stack_trace: &["main.lua:10", "init.lua:3"],
        ..Default::default()
    });
}

#[test]
fn test_monitor_lookup()
{
    let signal = monitor("Signal").expect("signal monitor is registered");
    assert_eq!(signal.flags(), MonitorFlags::FATAL | MonitorFlags::ASYNC_SAFE);
    assert_eq!(monitor("Panic").map(|m| m.flags()), Some(MonitorFlags::FATAL));
    assert_eq!(monitor("UserReported").map(|m| m.flags()), Some(MonitorFlags::empty()));
    assert!(monitor("MachException").is_none());
}

#[test]
fn test_set_active_monitors_reports_result()
{
    let _guard = setup();
    assert_eq!(set_active_monitors(MonitorSet::USER_REPORTED), MonitorSet::USER_REPORTED);
    assert_eq!(active_monitors(), MonitorSet::USER_REPORTED);
    assert!(monitor("UserReported").is_some_and(|m| m.is_enabled()));

    assert_eq!(set_active_monitors(MonitorSet::empty()), MonitorSet::empty());
    assert!(!monitor("UserReported").is_some_and(|m| m.is_enabled()));
}

#[test]
fn test_user_report_dropped_while_disabled()
{
    let _guard = setup();
    set_active_monitors(MonitorSet::empty());
    script_error();
    assert!(take_seen().is_empty());
}

#[test]
fn test_user_report_reaches_callback()
{
    let _guard = setup();
    set_active_monitors(MonitorSet::USER_REPORTED);
    script_error();

    let seen = take_seen();
    assert_eq!(seen.len(), 1);
    let event = &seen[0];
    assert_eq!(event.monitor_id, "UserReported");
    assert_eq!(event.reason.as_deref(), Some("attempt to index a nil value"));
    assert_eq!(event.name.as_deref(), Some("ScriptError"));
    assert_eq!(event.language.as_deref(), Some("lua"));
    assert_eq!(event.trace, vec!["main.lua:10".to_string(), "init.lua:3".to_string()]);
    assert_eq!(event.signum, 0);
    assert!(event.is_user_reported);
    assert!(event.is_crashed_context);
    assert!(event.depth > 0);

    // A user report is not fatal, so the monitor stays enabled.
    assert_eq!(active_monitors(), MonitorSet::USER_REPORTED);
    script_error();
    assert_eq!(take_seen().len(), 1);

    set_active_monitors(MonitorSet::empty());
}

#[test]
fn test_signal_monitor_annotates_user_report()
{
    let _guard = setup();
    let active = set_active_monitors(MonitorSet::SIGNAL | MonitorSet::USER_REPORTED);
    assert_eq!(active, MonitorSet::SIGNAL | MonitorSet::USER_REPORTED);
    script_error();
    set_active_monitors(MonitorSet::empty());

    let seen = take_seen();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].signum, libc::SIGABRT);
    assert_eq!(seen[0].monitor_id, "UserReported");
}
