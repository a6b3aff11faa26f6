//! # Freezing the process
//!
//! Before a snapshot is taken every other thread is suspended, so nothing
//! mutates memory while registers, stacks and the thread list are read.
//! Threads that the capture itself depends on (a watchdog, a report
//! uploader) can be put on the reserved list and are never suspended.
//!
//! All state here is atomics or caller-owned arrays, so suspend and resume
//! are safe to call from a signal handler. Reservation happens during
//! setup and logs through `tracing`.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use tracing::{debug, warn};

use crate::error::{FaultlineError, Result};
use crate::log::LogLevel;
use crate::platform;
use crate::safe_log;
use crate::types::ThreadId;

/// Capacity of the reserved-thread list
pub const MAX_RESERVED_THREADS: usize = 10;

/// Threads that can be recorded (and therefore suspended) in one pass
pub const MAX_SUSPENDED_THREADS: usize = 512;

static RESERVED: [AtomicU64; MAX_RESERVED_THREADS] = [const { AtomicU64::new(0) }; MAX_RESERVED_THREADS];
static RESERVED_COUNT: AtomicUsize = AtomicUsize::new(0);
static UNSUPPORTED_LOGGED: AtomicBool = AtomicBool::new(false);

/// Exempt `thread` from suspension during capture
///
/// Reserving the same thread twice is a no-op. Fails with
/// [`FaultlineError::ResourceExhausted`] once [`MAX_RESERVED_THREADS`]
/// threads are reserved.
pub fn reserve_thread(thread: ThreadId) -> Result<()>
{
    if thread.is_null() {
        return Err(FaultlineError::InvalidArgument("cannot reserve the null thread".into()));
    }
    if is_reserved(thread) {
        return Ok(());
    }

    let slot = RESERVED_COUNT
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| (count < MAX_RESERVED_THREADS).then_some(count + 1))
        .map_err(|_| {
            warn!("Reserved thread list is full; thread {} will be suspended during capture", thread);
            FaultlineError::ResourceExhausted(format!("at most {MAX_RESERVED_THREADS} threads can be reserved"))
        })?;
    RESERVED[slot].store(thread.raw(), Ordering::SeqCst);
    debug!("Reserved thread {} ({} of {})", thread, slot + 1, MAX_RESERVED_THREADS);
    Ok(())
}

/// Whether `thread` is on the reserved list
pub fn is_reserved(thread: ThreadId) -> bool
{
    let count = RESERVED_COUNT.load(Ordering::SeqCst).min(MAX_RESERVED_THREADS);
    RESERVED[..count].iter().any(|slot| slot.load(Ordering::SeqCst) == thread.raw())
}

pub fn reserved_thread_count() -> usize
{
    RESERVED_COUNT.load(Ordering::SeqCst).min(MAX_RESERVED_THREADS)
}

/// Threads frozen by [`suspend_environment`]
///
/// Lives on the stack of whoever suspends; pass it back to
/// [`resume_environment`].
#[derive(Debug, Clone)]
pub struct SuspendedThreads
{
    threads: [ThreadId; MAX_SUSPENDED_THREADS],
    count: usize,
    suspended: bool,
    attempted: bool,
}

impl SuspendedThreads
{
    pub const fn new() -> Self
    {
        Self {
            threads: [ThreadId::NULL; MAX_SUSPENDED_THREADS],
            count: 0,
            suspended: false,
            attempted: false,
        }
    }

    /// Whether a suspend succeeded and has not been undone yet
    pub fn is_suspended(&self) -> bool
    {
        self.suspended
    }

    /// Every thread recorded at suspend time, including skipped ones
    pub fn threads(&self) -> &[ThreadId]
    {
        &self.threads[..self.count]
    }
}

impl Default for SuspendedThreads
{
    fn default() -> Self
    {
        Self::new()
    }
}

fn is_exempt(thread: ThreadId, this_thread: ThreadId) -> bool
{
    thread == this_thread || is_reserved(thread)
}

/// Suspend every thread except the caller and the reserved ones
///
/// Failures for individual threads are logged and skipped. On platforms
/// that cannot suspend threads of their own process the call does nothing
/// and says so once.
pub fn suspend_environment() -> SuspendedThreads
{
    let mut suspended = SuspendedThreads::new();
    suspended.attempted = true;
    let this_thread = platform::current_thread();

    match platform::suspend_threads(&mut suspended.threads, |thread| is_exempt(thread, this_thread)) {
        Ok(count) => {
            suspended.count = count;
            suspended.suspended = true;
            safe_log!(LogLevel::Debug, "suspended environment ({} threads)", count);
        }
        Err(FaultlineError::Unsupported(what)) => {
            if !UNSUPPORTED_LOGGED.swap(true, Ordering::Relaxed) {
                safe_log!(LogLevel::Debug, "{} is not supported; capturing a running process", what);
            }
        }
        Err(error) => {
            safe_log!(LogLevel::Error, "could not suspend environment: {}", error.fault_display());
        }
    }
    suspended
}

/// Resume what [`suspend_environment`] suspended
///
/// Calling this without a successful suspend is a caller error; it is
/// logged and nothing is resumed.
pub fn resume_environment(suspended: &mut SuspendedThreads)
{
    if !suspended.suspended {
        if !suspended.attempted {
            safe_log!(LogLevel::Error, "resume_environment called without a prior suspend");
        }
        return;
    }

    let this_thread = platform::current_thread();
    platform::resume_threads(suspended.threads(), |thread| is_exempt(thread, this_thread));
    safe_log!(LogLevel::Debug, "resumed environment ({} threads)", suspended.count);
    suspended.suspended = false;
    suspended.count = 0;
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_resume_without_suspend_is_ignored()
    {
        let mut suspended = SuspendedThreads::new();
        resume_environment(&mut suspended);
        assert!(!suspended.is_suspended());
        assert!(suspended.threads().is_empty());
    }

    #[test]
    fn test_suspend_then_resume()
    {
        let mut suspended = suspend_environment();
        if platform::suspend_supported() {
            assert!(suspended.is_suspended());
            assert!(suspended.threads().contains(&platform::current_thread()));
        } else {
            assert!(!suspended.is_suspended());
        }
        resume_environment(&mut suspended);
        assert!(!suspended.is_suspended());
    }

    #[test]
    fn test_reserve_rejects_null()
    {
        assert!(matches!(reserve_thread(ThreadId::NULL), Err(FaultlineError::InvalidArgument(_))));
    }
}
