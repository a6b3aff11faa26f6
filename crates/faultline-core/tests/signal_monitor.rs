//! End-to-end tests for the signal monitor
//!
//! Each test forks. The child enables capture and then dies; the event
//! callback writes one line per event into a pipe that the parent reads once
//! the child is gone. Tests hold `LOCK` so that no other test thread is
//! running when the process forks.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;

use faultline_core::io::{read_line_from_fd, write_fmt_to_fd};
use faultline_core::monitors::{
    set_active_monitors, set_event_callback, set_sigterm_monitoring_enabled, CrashEvent, MonitorSet,
};

static LOCK: Mutex<()> = Mutex::new(());
static REPORT_FD: AtomicI32 = AtomicI32::new(-1);

const FAULT_ADDRESS: usize = 0x10;

/// One event as the child saw it
#[derive(Debug)]
struct Report
{
    monitor_id: String,
    signum: i32,
    fault_address: u64,
    thread_count: usize,
    crashed_thread_listed: bool,
    frames: usize,
}

impl Report
{
    fn parse(line: &str) -> Option<Self>
    {
        let mut fields = line.split(' ');
        Some(Self {
            monitor_id: fields.next()?.to_string(),
            signum: fields.next()?.parse().ok()?,
            fault_address: u64::from_str_radix(fields.next()?.trim_start_matches("0x"), 16).ok()?,
            thread_count: fields.next()?.parse().ok()?,
            crashed_thread_listed: fields.next()? == "listed",
            frames: fields.next()?.parse().ok()?,
        })
    }
}

/// Event callback of the child, async-signal-safe
fn write_report(event: &mut CrashEvent<'_>)
{
    let mut frames = 0;
    while event.stack_cursor.advance() {
        frames += 1;
    }
    let context = event.machine_context;
    let listed = if context.index_of_thread(context.thread()).is_some() { "listed" } else { "missing" };
    let _ = write_fmt_to_fd(
        REPORT_FD.load(Ordering::SeqCst),
        format_args!(
            "{} {} {:#x} {} {} {}\n",
            event.monitor_id,
            event.signal.signum,
            event.fault_address.value(),
            context.thread_count(),
            listed,
            frames
        ),
    );
}

struct Outcome
{
    /// Signal that terminated the child, if any
    signal: Option<i32>,
    reports: Vec<Report>,
}

/// Run `body` in a forked child with `monitors` enabled
fn run_in_child(monitors: MonitorSet, sigterm: bool, body: fn()) -> Outcome
{
    let _guard = LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut fds = [0; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    let [read_fd, write_fd] = fds;

    match unsafe { libc::fork() } {
        -1 => panic!("fork failed: {}", std::io::Error::last_os_error()),
        0 => {
            unsafe {
                libc::close(read_fd);
                let no_core = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
                libc::setrlimit(libc::RLIMIT_CORE, &no_core);
            }
            REPORT_FD.store(write_fd, Ordering::SeqCst);
            set_event_callback(Some(write_report));
            set_sigterm_monitoring_enabled(sigterm);
            if set_active_monitors(monitors) == monitors {
                body();
            }
            unsafe { libc::_exit(0) }
        }
        pid => {
            unsafe { libc::close(write_fd) };
            let mut reports = Vec::new();
            let mut line = [0u8; 256];
            while let Ok(len) = read_line_from_fd(read_fd, &mut line) {
                if len == 0 {
                    break;
                }
                let text = String::from_utf8_lossy(&line[..len]);
                reports.push(Report::parse(&text).unwrap_or_else(|| panic!("malformed report {text:?}")));
            }
            unsafe { libc::close(read_fd) };

            let mut status = 0;
            assert_eq!(unsafe { libc::waitpid(pid, &mut status, 0) }, pid);
            let signal = libc::WIFSIGNALED(status).then(|| libc::WTERMSIG(status));
            Outcome { signal, reports }
        }
    }
}

#[inline(never)]
fn write_to_bad_address()
{
    let pointer = std::hint::black_box(FAULT_ADDRESS as *mut u64);
    // SAFETY: none. The write is meant to fault.
    unsafe { pointer.write_volatile(1) };
}

fn raise_sigterm()
{
    unsafe { libc::raise(libc::SIGTERM) };
}

fn panic_then_fault()
{
    let caught = std::panic::catch_unwind(|| panic!("recoverable"));
    if caught.is_err() {
        write_to_bad_address();
    }
}

#[test]
fn test_segv_is_captured_and_reraised()
{
    let outcome = run_in_child(MonitorSet::SIGNAL, false, write_to_bad_address);
    assert_eq!(outcome.signal, Some(libc::SIGSEGV));
    assert_eq!(outcome.reports.len(), 1, "{:?}", outcome.reports);

    let report = &outcome.reports[0];
    assert_eq!(report.monitor_id, "Signal");
    assert_eq!(report.signum, libc::SIGSEGV);
    assert_eq!(report.fault_address, FAULT_ADDRESS as u64);
    // A forked child runs a single thread.
    assert_eq!(report.thread_count, 1);
    assert!(report.crashed_thread_listed);
    assert!(report.frames > 0);
}

#[test]
fn test_abort_is_captured_without_fault_address()
{
    let outcome = run_in_child(MonitorSet::SIGNAL, false, || std::process::abort());
    assert_eq!(outcome.signal, Some(libc::SIGABRT));
    assert_eq!(outcome.reports.len(), 1, "{:?}", outcome.reports);

    let report = &outcome.reports[0];
    assert_eq!(report.monitor_id, "Signal");
    assert_eq!(report.signum, libc::SIGABRT);
    assert_eq!(report.fault_address, 0);
    assert!(report.crashed_thread_listed);
    assert!(report.frames > 0);
}

#[test]
fn test_sigterm_passes_through_while_gate_is_off()
{
    let outcome = run_in_child(MonitorSet::SIGNAL, false, raise_sigterm);
    assert_eq!(outcome.signal, Some(libc::SIGTERM));
    assert!(outcome.reports.is_empty(), "{:?}", outcome.reports);
}

#[test]
fn test_sigterm_is_captured_when_enabled()
{
    let outcome = run_in_child(MonitorSet::SIGNAL, true, raise_sigterm);
    assert_eq!(outcome.signal, Some(libc::SIGTERM));
    assert_eq!(outcome.reports.len(), 1, "{:?}", outcome.reports);
    assert_eq!(outcome.reports[0].signum, libc::SIGTERM);
    assert_eq!(outcome.reports[0].fault_address, 0);
}

#[test]
fn test_fault_after_caught_panic_is_captured()
{
    let outcome = run_in_child(MonitorSet::SIGNAL | MonitorSet::PANIC, false, panic_then_fault);
    assert_eq!(outcome.signal, Some(libc::SIGSEGV));
    assert_eq!(outcome.reports.len(), 2, "{:?}", outcome.reports);

    // The signal monitor rewrites the panic event to SIGABRT.
    assert_eq!(outcome.reports[0].monitor_id, "Panic");
    assert_eq!(outcome.reports[0].signum, libc::SIGABRT);

    assert_eq!(outcome.reports[1].monitor_id, "Signal");
    assert_eq!(outcome.reports[1].signum, libc::SIGSEGV);
    assert_eq!(outcome.reports[1].fault_address, FAULT_ADDRESS as u64);
}
