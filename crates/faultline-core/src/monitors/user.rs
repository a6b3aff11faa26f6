//! User-reported exceptions.
//!
//! Lets the application report a failure it caught itself (a script error,
//! an exception from another language runtime) through the same pipeline as
//! real crashes. The calling thread's registers are not captured since no
//! fault happened; the backtrace is taken from the call site instead.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use super::{handle_event, notify_fatal_exception_captured, CrashEvent, EventId, Monitor, UserException};
use crate::context::{capture_for_thread, resume_environment, suspend_environment, MachineContext};
use crate::error::Result;
use crate::platform;
use crate::unwind::StackCursor;

pub const USER_MONITOR_ID: &str = "UserReported";

/// Frames dropped from the top of a user-report backtrace
///
/// Only `report_user_exception` itself.
pub const USER_REPORT_SKIPPED_FRAMES: usize = 1;

/// Frame limit of user-report backtraces
pub const USER_REPORT_MAX_DEPTH: usize = 100;

/// An exception reported by the application
#[derive(Debug, Clone, Copy, Default)]
pub struct UserReport<'a>
{
    /// Exception name or type
    pub name: &'a str,
    pub reason: Option<&'a str>,
    /// Language the exception comes from, e.g. `"lua"`
    pub language: Option<&'a str>,
    pub line_of_code: Option<&'a str>,
    /// Backtrace in the reporting language
    pub stack_trace: &'a [&'a str],
    /// Suspend the other threads while capturing
    pub log_all_threads: bool,
    /// Abort the process after the report is delivered
    pub terminate_program: bool,
}

/// Monitor for reports made through [`report_user_exception`]
pub struct UserMonitor
{
    enabled: AtomicBool,
}

pub static USER_MONITOR: UserMonitor = UserMonitor {
    enabled: AtomicBool::new(false),
};

impl Monitor for UserMonitor
{
    fn id(&self) -> &'static str
    {
        USER_MONITOR_ID
    }

    fn set_enabled(&self, enabled: bool) -> Result<()>
    {
        self.enabled.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn is_enabled(&self) -> bool
    {
        self.enabled.load(Ordering::SeqCst)
    }
}

/// Report an exception through the event pipeline
///
/// Dropped with a warning while the monitor is disabled. Returns normally
/// unless `terminate_program` is set, in which case the process aborts once
/// the event has been delivered.
#[inline(never)]
pub fn report_user_exception(report: &UserReport<'_>)
{
    if !USER_MONITOR.is_enabled() {
        warn!("User-reported exception monitor is disabled; dropping report {:?}", report.name);
        return;
    }

    let event_id = EventId::generate();
    debug!("Reporting user exception {} as event {}", report.name, event_id);

    let mut suspended = report.log_all_threads.then(suspend_environment);
    let crashed_during_handling = report.terminate_program && notify_fatal_exception_captured(false);

    let mut context = MachineContext::new();
    capture_for_thread(platform::current_thread(), true, &mut context);
    let mut cursor = StackCursor::from_current_thread(USER_REPORT_SKIPPED_FRAMES, USER_REPORT_MAX_DEPTH);

    let mut event = CrashEvent::new(USER_MONITOR_ID, event_id, &context, &mut cursor);
    event.crash_reason = report.reason;
    event.user_exception = Some(UserException {
        name: report.name,
        language: report.language,
        line_of_code: report.line_of_code,
        custom_stack_trace: report.stack_trace,
    });
    event.is_user_reported = true;
    event.is_fatal = false;
    event.crashed_during_crash_handling = crashed_during_handling;
    handle_event(&mut event);

    if let Some(suspended) = suspended.as_mut() {
        resume_environment(suspended);
    }
    if report.terminate_program {
        std::process::abort();
    }
}
