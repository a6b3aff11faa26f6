//! # Signal Monitor
//!
//! Traps fatal POSIX signals, captures the faulting thread and hands the
//! event to the pipeline, then re-raises the signal so the process dies
//! exactly as it would have without us.
//!
//! ## Enable / disable
//!
//! Enabling maps an alternate signal stack (so a blown stack can still be
//! reported), generates the event id, and installs one `sigaction` per
//! signal with `SA_SIGINFO | SA_ONSTACK`. Previous actions are kept in a
//! static [`HandlerTable`] and restored in install order on disable.
//!
//! The alternate stack belongs to the thread that enabled the monitor.
//! On disable it is released unless that thread is running on it (which is
//! the case when disabling from inside the handler).
//!
//! ## In the handler
//!
//! 1. Disabled, or SIGTERM without SIGTERM monitoring: restore the previous
//!    actions, note the unhandled signal, re-raise.
//! 2. Otherwise suspend the other threads, capture, run
//!    [`handle_event`](super::handle_event), resume.
//! 3. Always re-raise. The signal stays blocked until the handler returns,
//!    so it is delivered to whatever handler is installed by then.

use std::cell::UnsafeCell;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tracing::debug;
use uuid::Uuid;

use super::{handle_event, notify_fatal_exception_captured, notify_unhandled_fatal_signal, CrashEvent, EventId, Monitor, MonitorFlags, SignalInfo};
use crate::context::{capture_for_signal, resume_environment, suspend_environment, MachineContext};
use crate::error::{FaultlineError, Result};
use crate::log::LogLevel;
use crate::memory::page_size;
use crate::platform;
use crate::safe_log;
use crate::types::Address;
use crate::unwind::{StackCursor, DEFAULT_MAX_DEPTH};

pub const SIGNAL_MONITOR_ID: &str = "Signal";

/// Signals that end the process and are trapped
pub const FATAL_SIGNALS: [Signal; 9] = [
    Signal::SIGABRT,
    Signal::SIGBUS,
    Signal::SIGFPE,
    Signal::SIGILL,
    Signal::SIGPIPE,
    Signal::SIGSEGV,
    Signal::SIGSYS,
    Signal::SIGTRAP,
    Signal::SIGTERM,
];

const MAX_SAVED_HANDLERS: usize = 16;

/// Previous signal actions, in the order ours replaced them
///
/// Written only while installing or restoring, which the owning monitor
/// never does concurrently. The handler reads it only to restore.
pub(crate) struct HandlerTable
{
    saved: UnsafeCell<[Option<(Signal, SigAction)>; MAX_SAVED_HANDLERS]>,
    installed: AtomicUsize,
}

// SAFETY: see the type documentation; access is serialized by the enabled
// flag of the monitor owning the table.
unsafe impl Sync for HandlerTable {}

impl HandlerTable
{
    pub(crate) const fn new() -> Self
    {
        Self {
            saved: UnsafeCell::new([None; MAX_SAVED_HANDLERS]),
            installed: AtomicUsize::new(0),
        }
    }

    #[cfg(test)]
    pub(crate) fn installed(&self) -> usize
    {
        self.installed.load(Ordering::SeqCst)
    }

    /// Install `action` for every signal in `signals`
    ///
    /// On failure the actions installed by this call are restored before
    /// the error is returned.
    ///
    /// # Safety
    ///
    /// Not reentrant; the caller serializes install and restore.
    pub(crate) unsafe fn install(&self, signals: &[Signal], action: &SigAction) -> Result<()>
    {
        if signals.len() > MAX_SAVED_HANDLERS {
            return Err(FaultlineError::InvalidArgument(format!("at most {MAX_SAVED_HANDLERS} signals can be trapped")));
        }
        let saved = &mut *self.saved.get();
        for (index, &signal) in signals.iter().enumerate() {
            match signal::sigaction(signal, action) {
                Ok(previous) => {
                    saved[index] = Some((signal, previous));
                    self.installed.store(index + 1, Ordering::SeqCst);
                }
                Err(errno) => {
                    safe_log!(LogLevel::Error, "sigaction ({}): {}", signal.as_str(), errno);
                    self.restore();
                    return Err(FaultlineError::HookInstallFailed {
                        hook: signal.as_str(),
                        reason: errno.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Put back every saved action, in install order
    ///
    /// # Safety
    ///
    /// Not reentrant; the caller serializes install and restore.
    pub(crate) unsafe fn restore(&self)
    {
        let saved = &mut *self.saved.get();
        let count = self.installed.swap(0, Ordering::SeqCst).min(MAX_SAVED_HANDLERS);
        for slot in &mut saved[..count] {
            if let Some((signal, previous)) = slot.take() {
                if let Err(errno) = signal::sigaction(signal, &previous) {
                    safe_log!(LogLevel::Error, "restoring {}: {}", signal.as_str(), errno);
                }
            }
        }
    }
}

static HANDLERS: HandlerTable = HandlerTable::new();

/// Alternate stack mapping: base of the mapping (guard page first) and size
static ALT_STACK_BASE: AtomicUsize = AtomicUsize::new(0);
static ALT_STACK_SIZE: AtomicUsize = AtomicUsize::new(0);
/// Alternate stack the enabling thread had before ours, restored on release
static PREVIOUS_STACK_SP: AtomicUsize = AtomicUsize::new(0);
static PREVIOUS_STACK_SIZE: AtomicUsize = AtomicUsize::new(0);

fn errno_string() -> String
{
    std::io::Error::last_os_error().to_string()
}

/// Map (or reuse) the alternate stack and register it for this thread
fn install_alt_stack() -> Result<()>
{
    let page = page_size();
    let mut base = ALT_STACK_BASE.load(Ordering::SeqCst);
    let mut size = ALT_STACK_SIZE.load(Ordering::SeqCst);
    if base == 0 {
        size = libc::SIGSTKSZ.max(16 * page);
        // SAFETY: anonymous private mapping; checked below.
        let mapping = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size + page,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if mapping == libc::MAP_FAILED {
            return Err(FaultlineError::AltStackFailed(format!("mmap: {}", errno_string())));
        }
        // SAFETY: the first page of our own mapping becomes the guard.
        if unsafe { libc::mprotect(mapping, page, libc::PROT_NONE) } != 0 {
            let reason = errno_string();
            // SAFETY: unmapping what was just mapped.
            unsafe { libc::munmap(mapping, size + page) };
            return Err(FaultlineError::AltStackFailed(format!("guard page: {reason}")));
        }
        base = mapping as usize;
        ALT_STACK_BASE.store(base, Ordering::SeqCst);
        ALT_STACK_SIZE.store(size, Ordering::SeqCst);
        debug!("Mapped alternate signal stack of {} bytes at {:#x}", size, base + page);
    }

    let stack = libc::stack_t {
        ss_sp: (base + page) as *mut libc::c_void,
        ss_flags: 0,
        ss_size: size,
    };
    // SAFETY: stack_t is plain data.
    let mut previous: libc::stack_t = unsafe { std::mem::zeroed() };
    // SAFETY: `stack` describes memory that stays mapped until released.
    if unsafe { libc::sigaltstack(&stack, &mut previous) } != 0 {
        return Err(FaultlineError::AltStackFailed(format!("sigaltstack: {}", errno_string())));
    }
    if previous.ss_sp as usize != base + page && previous.ss_flags & libc::SS_DISABLE == 0 {
        PREVIOUS_STACK_SP.store(previous.ss_sp as usize, Ordering::SeqCst);
        PREVIOUS_STACK_SIZE.store(previous.ss_size, Ordering::SeqCst);
    }
    Ok(())
}

/// Whether the calling thread is executing on its alternate stack
fn on_alt_stack() -> bool
{
    // SAFETY: `current` is a valid out pointer; a null new stack only queries.
    unsafe {
        let mut current: libc::stack_t = std::mem::zeroed();
        libc::sigaltstack(ptr::null(), &mut current) == 0 && current.ss_flags & libc::SS_ONSTACK != 0
    }
}

/// Put back the previous alternate stack and unmap ours unless it is in use
fn release_alt_stack()
{
    let base = ALT_STACK_BASE.load(Ordering::SeqCst);
    if base == 0 || on_alt_stack() {
        return;
    }
    let page = page_size();
    let size = ALT_STACK_SIZE.load(Ordering::SeqCst);
    let previous_sp = PREVIOUS_STACK_SP.swap(0, Ordering::SeqCst);
    let previous_size = PREVIOUS_STACK_SIZE.swap(0, Ordering::SeqCst);
    // SAFETY: the stack is not in use (checked above) and was mapped by
    // install_alt_stack with this size.
    unsafe {
        let mut replacement: libc::stack_t = std::mem::zeroed();
        if previous_sp == 0 {
            replacement.ss_flags = libc::SS_DISABLE;
        } else {
            replacement.ss_sp = previous_sp as *mut libc::c_void;
            replacement.ss_size = previous_size;
        }
        libc::sigaltstack(&replacement, ptr::null_mut());
        libc::munmap(base as *mut libc::c_void, size + page);
    }
    ALT_STACK_BASE.store(0, Ordering::SeqCst);
    ALT_STACK_SIZE.store(0, Ordering::SeqCst);
}

/// Register the alternate stack, then `action` for every signal in `signals`
///
/// On failure nothing stays installed, the alternate stack included.
fn install_handlers(signals: &[Signal], action: &SigAction) -> Result<()>
{
    install_alt_stack()?;
    // SAFETY: install and restore are serialized by the enabled flag.
    if let Err(error) = unsafe { HANDLERS.install(signals, action) } {
        release_alt_stack();
        return Err(error);
    }
    Ok(())
}

/// Whether `si_addr` holds the faulting address for `signum`
///
/// For other signals the field overlaps the sender's pid and uid.
fn has_fault_address(signum: libc::c_int) -> bool
{
    matches!(signum, libc::SIGSEGV | libc::SIGBUS | libc::SIGILL | libc::SIGFPE)
}

static SIGTERM_MONITORING: AtomicBool = AtomicBool::new(false);

/// Also trap SIGTERM (off by default)
pub fn set_sigterm_monitoring_enabled(enabled: bool)
{
    SIGTERM_MONITORING.store(enabled, Ordering::SeqCst);
}

pub fn sigterm_monitoring_enabled() -> bool
{
    SIGTERM_MONITORING.load(Ordering::SeqCst)
}

/// Monitor for fatal signals
pub struct SignalMonitor
{
    enabled: AtomicBool,
    event_id_high: AtomicU64,
    event_id_low: AtomicU64,
    max_depth: AtomicUsize,
}

pub static SIGNAL_MONITOR: SignalMonitor = SignalMonitor::new();

impl SignalMonitor
{
    const fn new() -> Self
    {
        Self {
            enabled: AtomicBool::new(false),
            event_id_high: AtomicU64::new(0),
            event_id_low: AtomicU64::new(0),
            max_depth: AtomicUsize::new(DEFAULT_MAX_DEPTH),
        }
    }

    /// Frame limit of the stack cursor attached to signal events
    pub fn set_max_stack_depth(&self, depth: usize)
    {
        self.max_depth.store(depth.max(1), Ordering::SeqCst);
    }

    pub fn max_stack_depth(&self) -> usize
    {
        self.max_depth.load(Ordering::SeqCst)
    }

    /// Id the next signal event will carry
    pub fn event_id(&self) -> EventId
    {
        let high = self.event_id_high.load(Ordering::SeqCst);
        let low = self.event_id_low.load(Ordering::SeqCst);
        EventId::from_uuid(Uuid::from_u64_pair(high, low))
    }

    fn should_handle(&self, signum: libc::c_int) -> bool
    {
        signum != libc::SIGTERM || sigterm_monitoring_enabled()
    }

    fn install(&self) -> Result<()>
    {
        page_size();

        let (high, low) = Uuid::new_v4().as_u64_pair();
        self.event_id_high.store(high, Ordering::SeqCst);
        self.event_id_low.store(low, Ordering::SeqCst);

        let action = SigAction::new(
            SigHandler::SigAction(handle_signal),
            SaFlags::SA_SIGINFO | SaFlags::SA_ONSTACK,
            SigSet::empty(),
        );
        install_handlers(&FATAL_SIGNALS, &action)?;
        debug!("Installed handlers for {} signals", FATAL_SIGNALS.len());
        Ok(())
    }

    fn uninstall(&self)
    {
        // SAFETY: see install.
        unsafe { HANDLERS.restore() };
        release_alt_stack();
    }
}

impl Monitor for SignalMonitor
{
    fn id(&self) -> &'static str
    {
        SIGNAL_MONITOR_ID
    }

    fn flags(&self) -> MonitorFlags
    {
        MonitorFlags::FATAL | MonitorFlags::ASYNC_SAFE
    }

    fn set_enabled(&self, enabled: bool) -> Result<()>
    {
        if self.enabled.swap(enabled, Ordering::SeqCst) == enabled {
            return Ok(());
        }
        if enabled {
            if let Err(error) = self.install() {
                self.enabled.store(false, Ordering::SeqCst);
                return Err(error);
            }
        } else {
            self.uninstall();
        }
        Ok(())
    }

    fn is_enabled(&self) -> bool
    {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Events that did not come from a signal end in `abort()`
    fn annotate(&self, event: &mut CrashEvent<'_>)
    {
        if event.monitor_id != SIGNAL_MONITOR_ID {
            event.signal.signum = libc::SIGABRT;
        }
    }
}

extern "C" fn handle_signal(signum: libc::c_int, info: *mut libc::siginfo_t, ucontext: *mut libc::c_void)
{
    safe_log!(LogLevel::Debug, "trapped signal {}", signum);
    let monitor = &SIGNAL_MONITOR;

    if monitor.is_enabled() && monitor.should_handle(signum) {
        let mut suspended = suspend_environment();
        let crashed_during_handling = notify_fatal_exception_captured(true);

        let mut context = MachineContext::new();
        // SAFETY: we are the SA_SIGINFO handler that received `ucontext`.
        unsafe { capture_for_signal(ucontext, &mut context) };
        let mut cursor = StackCursor::from_registers(context.registers(), monitor.max_stack_depth());

        let mut event = CrashEvent::new(SIGNAL_MONITOR_ID, monitor.event_id(), &context, &mut cursor);
        // SAFETY: the kernel passes a valid siginfo_t to SA_SIGINFO handlers.
        if let Some(info) = unsafe { info.as_ref() } {
            event.signal = SignalInfo {
                signum,
                code: info.si_code,
            };
            if has_fault_address(signum) {
                event.fault_address = Address::from(platform::fault_address(info));
            }
        } else {
            event.signal.signum = signum;
        }
        event.registers_are_valid = true;
        event.crashed_during_crash_handling = crashed_during_handling;
        handle_event(&mut event);

        resume_environment(&mut suspended);
    } else {
        monitor.enabled.store(false, Ordering::SeqCst);
        monitor.uninstall();
        notify_unhandled_fatal_signal();
    }

    safe_log!(LogLevel::Debug, "re-raising signal {}", signum);
    // SAFETY: raise(3) is async-signal-safe.
    unsafe { libc::raise(signum) };
}

#[cfg(test)]
mod tests
{
    use std::sync::Mutex;

    use super::*;

    static SIGNAL_LOCK: Mutex<()> = Mutex::new(());

    extern "C" fn ignore(_: libc::c_int, _: *mut libc::siginfo_t, _: *mut libc::c_void) {}

    fn current_handler(signum: libc::c_int) -> libc::sighandler_t
    {
        unsafe {
            let mut current: libc::sigaction = std::mem::zeroed();
            assert_eq!(libc::sigaction(signum, ptr::null(), &mut current), 0);
            current.sa_sigaction
        }
    }

    fn test_action() -> SigAction
    {
        SigAction::new(SigHandler::SigAction(ignore), SaFlags::SA_SIGINFO, SigSet::empty())
    }

    #[test]
    fn test_install_and_restore_round_trip()
    {
        let _guard = SIGNAL_LOCK.lock().unwrap();
        let table = HandlerTable::new();
        let before = current_handler(libc::SIGUSR1);

        unsafe { table.install(&[Signal::SIGUSR1, Signal::SIGUSR2], &test_action()) }.unwrap();
        assert_eq!(table.installed(), 2);
        assert_eq!(current_handler(libc::SIGUSR1), ignore as libc::sighandler_t);

        unsafe { table.restore() };
        assert_eq!(table.installed(), 0);
        assert_eq!(current_handler(libc::SIGUSR1), before);
    }

    #[test]
    fn test_failed_install_rolls_back()
    {
        let _guard = SIGNAL_LOCK.lock().unwrap();
        let table = HandlerTable::new();
        let before_usr1 = current_handler(libc::SIGUSR1);
        let before_usr2 = current_handler(libc::SIGUSR2);

        // SIGKILL cannot be caught, so the third install fails.
        let result = unsafe { table.install(&[Signal::SIGUSR1, Signal::SIGUSR2, Signal::SIGKILL], &test_action()) };
        assert!(matches!(result, Err(FaultlineError::HookInstallFailed { hook: "SIGKILL", .. })));
        assert_eq!(table.installed(), 0);
        assert_eq!(current_handler(libc::SIGUSR1), before_usr1);
        assert_eq!(current_handler(libc::SIGUSR2), before_usr2);
    }

    fn current_alt_stack() -> (usize, libc::c_int)
    {
        unsafe {
            let mut current: libc::stack_t = std::mem::zeroed();
            assert_eq!(libc::sigaltstack(ptr::null(), &mut current), 0);
            (current.ss_sp as usize, current.ss_flags)
        }
    }

    #[test]
    fn test_failed_install_releases_alt_stack()
    {
        let _guard = SIGNAL_LOCK.lock().unwrap();
        let before = current_alt_stack();
        let before_usr1 = current_handler(libc::SIGUSR1);

        let result = install_handlers(&[Signal::SIGUSR1, Signal::SIGKILL], &test_action());
        assert!(matches!(result, Err(FaultlineError::HookInstallFailed { hook: "SIGKILL", .. })));
        assert_eq!(ALT_STACK_BASE.load(Ordering::SeqCst), 0);
        assert_eq!(current_alt_stack(), before);
        assert_eq!(current_handler(libc::SIGUSR1), before_usr1);
    }

    #[test]
    fn test_failed_install_without_prior_alt_stack_disables_it()
    {
        let _guard = SIGNAL_LOCK.lock().unwrap();
        // Start from a thread with no alternate stack.
        let handle = std::thread::spawn(|| {
            let mut previous: libc::stack_t = unsafe { std::mem::zeroed() };
            let disable = libc::stack_t {
                ss_sp: ptr::null_mut(),
                ss_flags: libc::SS_DISABLE,
                ss_size: 0,
            };
            unsafe { assert_eq!(libc::sigaltstack(&disable, &mut previous), 0) };

            let result = install_handlers(&[Signal::SIGKILL], &test_action());
            let (_, flags) = current_alt_stack();

            unsafe { libc::sigaltstack(&previous, ptr::null_mut()) };
            (result.is_err(), flags)
        });
        let (failed, flags) = handle.join().unwrap();
        assert!(failed);
        assert_ne!(flags & libc::SS_DISABLE, 0);
    }

    #[test]
    fn test_fault_address_only_for_faults()
    {
        for signum in [libc::SIGSEGV, libc::SIGBUS, libc::SIGILL, libc::SIGFPE] {
            assert!(has_fault_address(signum), "signal {signum}");
        }
        for signum in [libc::SIGABRT, libc::SIGTERM, libc::SIGPIPE, libc::SIGTRAP, libc::SIGSYS] {
            assert!(!has_fault_address(signum), "signal {signum}");
        }
    }

    #[test]
    fn test_enable_disable_restores_previous_handlers()
    {
        let _guard = SIGNAL_LOCK.lock().unwrap();
        let before: Vec<_> = FATAL_SIGNALS.iter().map(|&signal| current_handler(signal as libc::c_int)).collect();

        SIGNAL_MONITOR.set_enabled(true).unwrap();
        SIGNAL_MONITOR.set_enabled(true).unwrap();
        assert!(SIGNAL_MONITOR.is_enabled());
        assert_eq!(current_handler(libc::SIGSEGV), handle_signal as libc::sighandler_t);
        assert_eq!(SIGNAL_MONITOR.event_id().as_str().len(), 36);

        SIGNAL_MONITOR.set_enabled(false).unwrap();
        assert!(!SIGNAL_MONITOR.is_enabled());
        let after: Vec<_> = FATAL_SIGNALS.iter().map(|&signal| current_handler(signal as libc::c_int)).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_annotate_marks_foreign_events_as_abort()
    {
        let context = MachineContext::new();
        let mut cursor = StackCursor::from_addresses(&[], 1);
        let mut event = CrashEvent::new("Panic", EventId::generate(), &context, &mut cursor);
        SIGNAL_MONITOR.annotate(&mut event);
        assert_eq!(event.signal.signum, libc::SIGABRT);

        event.monitor_id = SIGNAL_MONITOR_ID;
        event.signal.signum = libc::SIGSEGV;
        SIGNAL_MONITOR.annotate(&mut event);
        assert_eq!(event.signal.signum, libc::SIGSEGV);
    }
}
