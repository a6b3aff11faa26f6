//! Tests for the panic monitor
//!
//! Monitors are process-wide, so this file holds a single test. A fault
//! raised after a caught panic is covered in `signal_monitor.rs`.

use std::panic;
use std::sync::Mutex;

use faultline_core::monitors::panic::{PANIC_EXCEPTION_NAME, PANIC_MONITOR_ID};
use faultline_core::monitors::{
    active_monitors, is_handling_fatal_exception, set_active_monitors, set_event_callback, CrashEvent, MonitorSet,
};

#[derive(Debug, Default)]
struct Seen
{
    monitor_id: String,
    reason: Option<String>,
    name: Option<String>,
    language: Option<String>,
    location: Option<String>,
    is_user_reported: bool,
    is_fatal: bool,
    crashed_during_crash_handling: bool,
    has_frames: bool,
}

static SEEN: Mutex<Option<Seen>> = Mutex::new(None);

fn record(event: &mut CrashEvent<'_>)
{
    let exception = event.user_exception;
    let seen = Seen {
        monitor_id: event.monitor_id.to_string(),
        reason: event.crash_reason.map(str::to_string),
        name: exception.map(|e| e.name.to_string()),
        language: exception.and_then(|e| e.language).map(str::to_string),
        location: exception.and_then(|e| e.line_of_code).map(str::to_string),
        is_user_reported: event.is_user_reported,
        is_fatal: event.is_fatal,
        crashed_during_crash_handling: event.crashed_during_crash_handling,
        has_frames: event.stack_cursor.advance(),
    };
    if let Ok(mut slot) = SEEN.lock() {
        *slot = Some(seen);
    }
}

#[test]
fn test_caught_panic_leaves_monitors_enabled()
{
    set_event_callback(Some(record));
    assert_eq!(set_active_monitors(MonitorSet::PANIC), MonitorSet::PANIC);
    assert!(!is_handling_fatal_exception());

    let result = panic::catch_unwind(|| {
        panic!("index {} out of range", 7);
    });
    assert!(result.is_err());

    let seen = SEEN.lock().unwrap().take().expect("the panic should reach the callback");
    assert_eq!(seen.monitor_id, PANIC_MONITOR_ID);
    assert_eq!(seen.reason.as_deref(), Some("index 7 out of range"));
    assert_eq!(seen.name.as_deref(), Some(PANIC_EXCEPTION_NAME));
    assert_eq!(seen.language.as_deref(), Some("rust"));
    assert!(seen.location.is_some_and(|location| location.contains("panic_monitor.rs")));
    assert!(!seen.is_user_reported);
    assert!(!seen.is_fatal);
    assert!(!seen.crashed_during_crash_handling);
    assert!(seen.has_frames);

    // The panic unwound and was caught, so capture stays armed.
    assert!(!is_handling_fatal_exception());
    assert_eq!(active_monitors(), MonitorSet::PANIC);

    let _ = panic::catch_unwind(|| panic!("second"));
    let second = SEEN.lock().unwrap().take().expect("the second panic should be captured too");
    assert_eq!(second.reason.as_deref(), Some("second"));
    assert!(!second.crashed_during_crash_handling);

    set_active_monitors(MonitorSet::empty());
}
