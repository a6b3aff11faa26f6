//! # Fault-path logging
//!
//! `tracing` is the logging channel for everything that runs in a normal
//! execution context. It cannot be used while a fault is being handled: a
//! subscriber may allocate, take locks, or buffer output that will never be
//! flushed because the process is about to die.
//!
//! This module is the replacement for that context. [`safe_log!`] formats into
//! a fixed buffer on the stack and hands the bytes straight to `write(2)`.
//! Messages longer than the buffer are truncated, never reallocated.
//!
//! ## Configuration
//!
//! - [`set_level`]: minimum level that is written (default [`LogLevel::Warn`])
//! - [`set_log_fd`]: descriptor that receives the output (default stderr)
//!
//! Both are plain atomics, so they may be changed at any time, including from
//! inside a handler.
//!
//! [`safe_log!`]: crate::safe_log

use std::fmt::{self, Write};
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};

use crate::io::fd::write_all_quiet;

/// Size of the stack buffer a single log line is formatted into
pub const LOG_LINE_CAPACITY: usize = 512;

static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Warn as u8);
static LOG_FD: AtomicI32 = AtomicI32::new(libc::STDERR_FILENO);

/// Severity of a fault-path log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel
{
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Trace = 5,
}

impl LogLevel
{
    fn from_u8(value: u8) -> Self
    {
        match value {
            0 | 1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            4 => LogLevel::Debug,
            _ => LogLevel::Trace,
        }
    }

    /// Fixed-width label used in the line prefix
    pub const fn label(self) -> &'static str
    {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Warn => "WARN ",
            LogLevel::Info => "INFO ",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    /// Parse a level name as used by `RUST_LOG` style settings
    pub fn parse(name: &str) -> Option<Self>
    {
        match name.trim().to_ascii_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}

/// Set the minimum level written by [`safe_log!`](crate::safe_log)
pub fn set_level(level: LogLevel)
{
    LEVEL.store(level as u8, Ordering::Relaxed);
}

pub fn level() -> LogLevel
{
    LogLevel::from_u8(LEVEL.load(Ordering::Relaxed))
}

/// Redirect fault-path logging to another descriptor
///
/// The descriptor is not owned. Passing a negative value silences the
/// logger entirely.
pub fn set_log_fd(fd: libc::c_int)
{
    LOG_FD.store(fd, Ordering::Relaxed);
}

pub fn is_enabled(level: LogLevel) -> bool
{
    level <= self::level() && LOG_FD.load(Ordering::Relaxed) >= 0
}

/// `fmt::Write` sink over a borrowed byte slice that drops what doesn't fit
pub(crate) struct StackBuffer<'a>
{
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> StackBuffer<'a>
{
    pub(crate) fn new(buf: &'a mut [u8]) -> Self
    {
        Self { buf, len: 0 }
    }

    pub(crate) fn as_bytes(&self) -> &[u8]
    {
        &self.buf[..self.len]
    }

    /// Overwrite the final byte with `byte`, appending when there is room
    pub(crate) fn terminate_with(&mut self, byte: u8)
    {
        if self.buf.is_empty() {
            return;
        }
        if self.len == self.buf.len() {
            self.len -= 1;
        }
        self.buf[self.len] = byte;
        self.len += 1;
    }
}

impl Write for StackBuffer<'_>
{
    fn write_str(&mut self, s: &str) -> fmt::Result
    {
        let available = self.buf.len() - self.len;
        let bytes = s.as_bytes();
        let count = bytes.len().min(available);
        self.buf[self.len..self.len + count].copy_from_slice(&bytes[..count]);
        self.len += count;
        // Never report an error: a truncated line is still worth writing.
        Ok(())
    }
}

/// Format and write one log line without allocating
///
/// Use [`safe_log!`](crate::safe_log) instead of calling this directly.
pub fn write_log(level: LogLevel, module: &str, args: fmt::Arguments<'_>)
{
    let fd = LOG_FD.load(Ordering::Relaxed);
    if fd < 0 || level > self::level() {
        return;
    }

    let mut storage = [0u8; LOG_LINE_CAPACITY];
    let mut line = StackBuffer::new(&mut storage);
    let _ = write!(line, "{} {}: ", level.label(), module);
    let _ = line.write_fmt(args);
    line.terminate_with(b'\n');

    // Nothing useful can be done if the log descriptor itself is broken.
    let _ = write_all_quiet(fd, line.as_bytes());
}

/// Log from a context where `tracing` must not be used
///
/// ```rust
/// use faultline_core::log::LogLevel;
/// use faultline_core::safe_log;
///
/// safe_log!(LogLevel::Debug, "suspended {} threads", 3);
/// ```
#[macro_export]
macro_rules! safe_log {
    ($level:expr, $($arg:tt)+) => {
        $crate::log::write_log($level, module_path!(), format_args!($($arg)+))
    };
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_stack_buffer_truncates()
    {
        let mut storage = [0u8; 8];
        let mut buffer = StackBuffer::new(&mut storage);
        write!(buffer, "hello world").unwrap();
        assert_eq!(buffer.as_bytes(), b"hello wo");

        buffer.terminate_with(b'\n');
        assert_eq!(buffer.as_bytes(), b"hello w\n");
    }

    #[test]
    fn test_level_parse()
    {
        assert_eq!(LogLevel::parse("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse(" debug "), Some(LogLevel::Debug));
        assert_eq!(LogLevel::parse("loud"), None);
        assert!(LogLevel::Error < LogLevel::Trace);
    }
}
