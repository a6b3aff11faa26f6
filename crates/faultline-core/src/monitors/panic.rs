//! # Panic Monitor
//!
//! Reports Rust panics. Enabling installs a panic hook in front of the one
//! already registered; the previous hook still runs after every capture.
//!
//! An unwinding panic can be caught, so its event is not fatal: monitors
//! stay enabled and a later fault is still captured. Panics are fatal when
//! built with `panic = "abort"`, or when one happens while another failure
//! is being handled.
//!
//! ## Hook lifetime
//!
//! `std::panic::set_hook` cannot be called from a panicking thread, and the
//! hook registry takes a lock. Disabling therefore removes the hook only
//! from ordinary code. When disabled from the fault path (a panic, or a
//! signal handler tearing everything down) the hook stays in place and just
//! forwards to the previous one.

use std::panic::{self, PanicHookInfo};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use tracing::debug;

use super::{handle_event, is_handling_fatal_exception, notify_fatal_exception_captured, CrashEvent, EventId, Monitor, MonitorFlags, UserException};
use crate::context::{capture_for_thread, resume_environment, suspend_environment, MachineContext};
use crate::error::{FaultlineError, Result};
use crate::platform;
use crate::unwind::{StackCursor, MAX_CAPTURED_FRAMES};

pub const PANIC_MONITOR_ID: &str = "Panic";

/// Exception name attached to panic events
pub const PANIC_EXCEPTION_NAME: &str = "rust_panic";

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Sync + Send + 'static>;

static HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);
static PREVIOUS_HOOK: AtomicPtr<PanicHook> = AtomicPtr::new(ptr::null_mut());

/// Monitor for Rust panics
pub struct PanicMonitor
{
    enabled: AtomicBool,
}

pub static PANIC_MONITOR: PanicMonitor = PanicMonitor {
    enabled: AtomicBool::new(false),
};

fn can_touch_hook() -> bool
{
    !std::thread::panicking() && !is_handling_fatal_exception()
}

fn install_hook() -> Result<()>
{
    if HOOK_INSTALLED.load(Ordering::SeqCst) {
        return Ok(());
    }
    if !can_touch_hook() {
        return Err(FaultlineError::HookInstallFailed {
            hook: "panic hook",
            reason: "cannot replace the panic hook while a failure is being handled".into(),
        });
    }
    let previous: PanicHook = panic::take_hook();
    PREVIOUS_HOOK.store(Box::into_raw(Box::new(previous)), Ordering::SeqCst);
    panic::set_hook(Box::new(panic_hook));
    HOOK_INSTALLED.store(true, Ordering::SeqCst);
    debug!("Installed panic hook");
    Ok(())
}

fn remove_hook()
{
    if !HOOK_INSTALLED.load(Ordering::SeqCst) || !can_touch_hook() {
        return;
    }
    // Drops our hook; waits for any hook call in progress.
    drop(panic::take_hook());
    let previous = PREVIOUS_HOOK.swap(ptr::null_mut(), Ordering::SeqCst);
    if !previous.is_null() {
        // SAFETY: produced by Box::into_raw in install_hook and swapped out
        // exactly once.
        let previous = unsafe { Box::from_raw(previous) };
        panic::set_hook(*previous);
    }
    HOOK_INSTALLED.store(false, Ordering::SeqCst);
    debug!("Restored previous panic hook");
}

impl Monitor for PanicMonitor
{
    fn id(&self) -> &'static str
    {
        PANIC_MONITOR_ID
    }

    fn flags(&self) -> MonitorFlags
    {
        MonitorFlags::FATAL
    }

    fn set_enabled(&self, enabled: bool) -> Result<()>
    {
        if self.is_enabled() == enabled {
            return Ok(());
        }
        if enabled {
            install_hook()?;
            self.enabled.store(true, Ordering::SeqCst);
        } else {
            self.enabled.store(false, Ordering::SeqCst);
            remove_hook();
        }
        Ok(())
    }

    fn is_enabled(&self) -> bool
    {
        self.enabled.load(Ordering::SeqCst)
    }
}

fn payload_message<'a>(info: &'a PanicHookInfo<'_>) -> &'a str
{
    let payload = info.payload();
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("Box<dyn Any>")
}

fn panic_hook(info: &PanicHookInfo<'_>)
{
    if PANIC_MONITOR.is_enabled() {
        capture_panic(info);
    }

    let previous = PREVIOUS_HOOK.load(Ordering::SeqCst);
    // SAFETY: the previous hook is only freed by remove_hook, which first
    // waits for running hooks to finish.
    if let Some(previous) = unsafe { previous.as_ref() } {
        previous(info);
    }
}

/// Whether the panic being reported ends the process
fn panic_is_fatal() -> bool
{
    cfg!(panic = "abort") || is_handling_fatal_exception()
}

#[inline(never)]
fn capture_panic(info: &PanicHookInfo<'_>)
{
    let message = payload_message(info);
    let location = info.location().map(|location| format!("{}:{}:{}", location.file(), location.line(), location.column()));
    let event_id = EventId::generate();

    let is_fatal = panic_is_fatal();
    let crashed_during_handling = is_fatal && notify_fatal_exception_captured(false);
    let mut suspended = suspend_environment();

    let mut context = MachineContext::new();
    capture_for_thread(platform::current_thread(), true, &mut context);
    let mut cursor = StackCursor::from_current_thread(0, MAX_CAPTURED_FRAMES);

    let mut event = CrashEvent::new(PANIC_MONITOR_ID, event_id, &context, &mut cursor);
    event.crash_reason = Some(message);
    event.user_exception = Some(UserException {
        name: PANIC_EXCEPTION_NAME,
        language: Some("rust"),
        line_of_code: location.as_deref(),
        custom_stack_trace: &[],
    });
    event.is_fatal = is_fatal;
    event.crashed_during_crash_handling = crashed_during_handling;
    handle_event(&mut event);

    resume_environment(&mut suspended);
}
