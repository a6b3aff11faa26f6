//! Plain-text crash reports written by the event callback.
//!
//! [`write_report`] runs inside the signal handler for signal events, so it
//! must not allocate or lock: the report directory is stored before any
//! monitor is enabled, the file path is assembled in a stack buffer and the
//! output goes through a stack-buffered [`BufferedWriter`].

use std::ffi::CStr;
use std::fmt::{self, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::OnceLock;

use faultline_core::images::{self, SymbolInfo};
use faultline_core::io::{last_path_entry, write_fmt_to_fd, BufferedWriter};
use faultline_core::monitors::{CrashEvent, EVENT_ID_LENGTH};
use faultline_core::types::Address;

/// Longest report path, including the terminator
const PATH_CAPACITY: usize = 1024;

const WRITE_BUFFER_SIZE: usize = 4096;

/// Frames written per backtrace
pub const MAX_REPORTED_FRAMES: usize = 64;

const REPORT_SUFFIX: &[u8] = b".txt\0";

/// Longest symbol name written; longer names are cut
const SYMBOL_NAME_CAPACITY: usize = 512;

static REPORT_DIR: OnceLock<Box<[u8]>> = OnceLock::new();

/// Send reports to `dir` instead of stderr
///
/// Must be called before the callback is installed. Only the first call
/// takes effect.
pub fn set_report_dir(dir: &Path) -> Result<(), String>
{
    let bytes = dir.as_os_str().as_bytes();
    if bytes.len() + 1 + EVENT_ID_LENGTH + REPORT_SUFFIX.len() > PATH_CAPACITY {
        return Err(format!("report directory path is too long: {}", dir.display()));
    }
    REPORT_DIR
        .set(bytes.into())
        .map_err(|_| "report directory already set".to_string())
}

/// `<dir>/<event id>.txt` in `storage`
fn report_path<'b>(dir: &[u8], event_id: &str, storage: &'b mut [u8]) -> Option<&'b CStr>
{
    let len = dir.len() + 1 + event_id.len() + REPORT_SUFFIX.len();
    if len > storage.len() {
        return None;
    }
    let (dir_part, rest) = storage.split_at_mut(dir.len());
    dir_part.copy_from_slice(dir);
    rest[0] = b'/';
    rest[1..=event_id.len()].copy_from_slice(event_id.as_bytes());
    rest[1 + event_id.len()..len - dir.len()].copy_from_slice(REPORT_SUFFIX);
    CStr::from_bytes_with_nul(&storage[..len]).ok()
}

/// Event callback: write the event to a file in the report directory, or
/// to stderr when none is set
pub fn write_report(event: &mut CrashEvent<'_>)
{
    let mut buffer = [0u8; WRITE_BUFFER_SIZE];
    let mut path_storage = [0u8; PATH_CAPACITY];
    let path = match REPORT_DIR.get() {
        Some(dir) => report_path(dir, event.event_id.as_str(), &mut path_storage),
        None => None,
    };

    let mut writer = match path {
        // A failed open has already been logged by the writer.
        Some(path) => match BufferedWriter::open(path, &mut buffer) {
            Ok(writer) => writer,
            Err(_) => return,
        },
        None => BufferedWriter::from_raw_fd(libc::STDERR_FILENO, &mut buffer),
    };

    let written = write_event(&mut writer, event);
    let closed = writer.close();
    if let (Some(path), Ok(()), Ok(())) = (path, written, closed) {
        let _ = write_fmt_to_fd(libc::STDERR_FILENO, format_args!("crash report written to {}\n", path.to_str().unwrap_or("<non-utf8 path>")));
    }
}

fn signal_name(signum: i32) -> &'static str
{
    match signum {
        libc::SIGABRT => "SIGABRT",
        libc::SIGBUS => "SIGBUS",
        libc::SIGFPE => "SIGFPE",
        libc::SIGILL => "SIGILL",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGSYS => "SIGSYS",
        libc::SIGTERM => "SIGTERM",
        libc::SIGTRAP => "SIGTRAP",
        _ => "signal",
    }
}

/// Format everything the event carries
pub fn write_event(out: &mut impl Write, event: &mut CrashEvent<'_>) -> fmt::Result
{
    writeln!(out, "Event:     {}", event.event_id)?;
    writeln!(out, "Monitor:   {}", event.monitor_id)?;
    if event.signal.signum != 0 {
        writeln!(
            out,
            "Signal:    {} ({}), code {}",
            signal_name(event.signal.signum),
            event.signal.signum,
            event.signal.code
        )?;
    }
    if !event.fault_address.is_null() {
        writeln!(out, "Address:   {}", event.fault_address)?;
    }
    if let Some(reason) = event.crash_reason {
        writeln!(out, "Reason:    {reason}")?;
    }
    if let Some(exception) = event.user_exception {
        write!(out, "Exception: {}", exception.name)?;
        if let Some(language) = exception.language {
            write!(out, " [{language}]")?;
        }
        writeln!(out)?;
        if let Some(line) = exception.line_of_code {
            writeln!(out, "Line:      {line}")?;
        }
        for frame in exception.custom_stack_trace {
            writeln!(out, "    {frame}")?;
        }
    }
    if event.crashed_during_crash_handling {
        writeln!(out, "Note:      crashed while handling a previous crash")?;
    }

    let context = event.machine_context;
    let overflow = if context.is_stack_overflow() { " (stack overflow)" } else { "" };
    writeln!(out, "Thread:    {}{}", context.thread(), overflow)?;
    writeln!(out, "Threads:   {}", context.thread_count())?;
    if event.registers_are_valid {
        let registers = context.registers();
        writeln!(
            out,
            "Registers: pc {:#018x} sp {:#018x} fp {:#018x} lr {:#018x}",
            registers.pc, registers.sp, registers.fp, registers.lr
        )?;
    }

    writeln!(out, "Backtrace:")?;
    let cursor = &mut *event.stack_cursor;
    cursor.reset();
    while cursor.advance() {
        if cursor.depth() > MAX_REPORTED_FRAMES {
            writeln!(out, "     ...")?;
            break;
        }
        write_frame(out, cursor.depth() - 1, cursor.address())?;
    }
    if cursor.has_given_up() {
        writeln!(out, "     (stopped at depth limit {})", cursor.max_depth())?;
    }
    Ok(())
}

/// One backtrace line, symbolicated when the address is in a known image
pub fn write_frame(out: &mut impl Write, index: usize, address: Address) -> fmt::Result
{
    write!(out, "{index:>4} {address}")?;
    if let Some(info) = images::resolve(address) {
        write_symbol(out, &info, address)?;
    }
    writeln!(out)
}

fn write_symbol(out: &mut impl Write, info: &SymbolInfo, address: Address) -> fmt::Result
{
    let image = info
        .image_name
        .and_then(|name| name.to_str().ok())
        .map_or("???", last_path_entry);
    write!(out, " {image}")?;
    if info.symbol_address.is_none() {
        return Ok(());
    }
    let mut name_buffer = [0u8; SYMBOL_NAME_CAPACITY];
    let name = info.symbol_name.and_then(|name| name.read(&mut name_buffer));
    match name.and_then(|name| name.to_str().ok()) {
        Some(symbol) => write!(out, " {:#}", rustc_demangle::demangle(symbol))?,
        None => write!(out, " <stripped>")?,
    }
    if let Some(offset) = info.offset(address) {
        write!(out, " + {offset}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests
{
    use faultline_core::context::MachineContext;
    use faultline_core::monitors::{EventId, UserException};
    use faultline_core::unwind::StackCursor;

    use super::*;

    #[test]
    fn test_report_path()
    {
        let mut storage = [0u8; 64];
        let path = report_path(b"/tmp/reports", "abcd", &mut storage).unwrap();
        assert_eq!(path.to_bytes(), b"/tmp/reports/abcd.txt");
    }

    #[test]
    fn test_report_path_too_long()
    {
        let mut storage = [0u8; 16];
        assert!(report_path(b"/tmp/reports", "abcd", &mut storage).is_none());
    }

    #[test]
    fn test_write_event_user_report()
    {
        let context = MachineContext::new();
        let mut cursor = StackCursor::from_addresses(&[0x10, 0x20, 0x30], 2);
        let mut event = CrashEvent::new("UserReported", EventId::generate(), &context, &mut cursor);
        event.crash_reason = Some("bad input");
        event.user_exception = Some(UserException {
            name: "ScriptError",
            language: Some("lua"),
            line_of_code: Some("x = nil + 1"),
            custom_stack_trace: &["main.lua:4"],
        });
        event.is_user_reported = true;

        let mut text = String::new();
        write_event(&mut text, &mut event).unwrap();

        assert!(text.contains("Monitor:   UserReported\n"));
        assert!(text.contains("Reason:    bad input\n"));
        assert!(text.contains("Exception: ScriptError [lua]\n"));
        assert!(text.contains("Line:      x = nil + 1\n"));
        assert!(text.contains("    main.lua:4\n"));
        assert!(!text.contains("Signal:"));
        assert!(!text.contains("Registers:"));
        assert!(text.contains("   0 0x0000000000000010"));
        assert!(text.contains("   1 0x0000000000000020"));
        assert!(!text.contains("0x0000000000000030"));
        assert!(text.contains("(stopped at depth limit 2)"));
    }

    #[test]
    fn test_signal_names()
    {
        assert_eq!(signal_name(libc::SIGSEGV), "SIGSEGV");
        assert_eq!(signal_name(libc::SIGABRT), "SIGABRT");
        assert_eq!(signal_name(0), "signal");
    }
}
