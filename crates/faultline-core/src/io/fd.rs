//! Raw descriptor helpers.
//!
//! Thin loops over `read(2)` and `write(2)` that retry short transfers and
//! `EINTR`. They never allocate, which makes them usable from a signal
//! handler; failures are reported through the fault-path logger and the
//! returned [`io::Error`] (an OS error code, no heap payload).

use std::fmt::{self, Write};
use std::io;

use crate::error::Errno;
use crate::log::{LogLevel, StackBuffer};
use crate::safe_log;

/// Stack buffer size used by [`write_fmt_to_fd`]
pub const WRITE_FMT_BUFFER_SIZE: usize = 1024;

/// Write all of `bytes`, without logging failures
///
/// The logger itself is built on this; logging from here would recurse when
/// the log descriptor is the one that is broken.
pub(crate) fn write_all_quiet(fd: libc::c_int, mut bytes: &[u8]) -> io::Result<()>
{
    while !bytes.is_empty() {
        // SAFETY: the pointer and length describe a live, initialized slice.
        let written = unsafe { libc::write(fd, bytes.as_ptr().cast(), bytes.len()) };
        if written < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if written == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        bytes = &bytes[written.unsigned_abs()..];
    }
    Ok(())
}

/// Write every byte of `bytes` to `fd`, retrying short writes
pub fn write_bytes_to_fd(fd: libc::c_int, bytes: &[u8]) -> io::Result<()>
{
    write_all_quiet(fd, bytes).inspect_err(|err| {
        safe_log!(LogLevel::Error, "could not write to fd {}: {}", fd, Errno(err));
    })
}

/// Fill `bytes` completely from `fd`
///
/// A read returning zero bytes before the slice is full is reported as
/// [`io::ErrorKind::UnexpectedEof`].
pub fn read_bytes_from_fd(fd: libc::c_int, bytes: &mut [u8]) -> io::Result<()>
{
    let mut filled = 0;
    while filled < bytes.len() {
        match read_some(fd, &mut bytes[filled..]) {
            Ok(0) => {
                safe_log!(LogLevel::Error, "read returned 0 bytes, likely EOF for fd {}", fd);
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            Ok(count) => filled += count,
            Err(err) => {
                safe_log!(LogLevel::Error, "could not read fd {}: {}", fd, Errno(&err));
                return Err(err);
            }
        }
    }
    Ok(())
}

/// One `read(2)` call, retried on `EINTR`
pub(crate) fn read_some(fd: libc::c_int, dst: &mut [u8]) -> io::Result<usize>
{
    loop {
        // SAFETY: `dst` is a valid writable slice of the given length.
        let count = unsafe { libc::read(fd, dst.as_mut_ptr().cast(), dst.len()) };
        if count >= 0 {
            return Ok(count.unsigned_abs());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Write a string to `fd`
///
/// Writing an empty string is rejected with [`io::ErrorKind::InvalidInput`]
/// so callers can tell "nothing to do" apart from success.
pub fn write_string_to_fd(fd: libc::c_int, string: &str) -> io::Result<()>
{
    if string.is_empty() {
        return Err(io::ErrorKind::InvalidInput.into());
    }
    write_bytes_to_fd(fd, string.as_bytes())
}

/// Format into a [`WRITE_FMT_BUFFER_SIZE`] stack buffer and write the result
///
/// Output that doesn't fit is truncated.
///
/// ```rust,no_run
/// use faultline_core::io::fd::write_fmt_to_fd;
///
/// write_fmt_to_fd(2, format_args!("signal {} at {:#x}\n", 11, 0x1000)).ok();
/// ```
pub fn write_fmt_to_fd(fd: libc::c_int, args: fmt::Arguments<'_>) -> io::Result<()>
{
    let mut storage = [0u8; WRITE_FMT_BUFFER_SIZE];
    let mut buffer = StackBuffer::new(&mut storage);
    let _ = buffer.write_fmt(args);
    if buffer.as_bytes().is_empty() {
        return Err(io::ErrorKind::InvalidInput.into());
    }
    write_bytes_to_fd(fd, buffer.as_bytes())
}

/// Read one line from `fd`, one byte at a time
///
/// Stops at a newline, at end of file, or when `dst` is full. The newline is
/// consumed but not stored. Returns the number of bytes stored in `dst`.
pub fn read_line_from_fd(fd: libc::c_int, dst: &mut [u8]) -> io::Result<usize>
{
    let mut len = 0;
    while len < dst.len() {
        let mut byte = [0u8; 1];
        match read_some(fd, &mut byte) {
            Ok(0) => break,
            Ok(_) if byte[0] == b'\n' => break,
            Ok(_) => {
                dst[len] = byte[0];
                len += 1;
            }
            Err(err) => {
                safe_log!(LogLevel::Error, "could not read from fd {}: {}", fd, Errno(&err));
                return Err(err);
            }
        }
    }
    Ok(len)
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn pipe() -> (libc::c_int, libc::c_int)
    {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        (fds[0], fds[1])
    }

    fn close(fd: libc::c_int)
    {
        unsafe {
            libc::close(fd);
        }
    }

    #[test]
    fn test_write_then_read_exact()
    {
        let (rx, tx) = pipe();
        write_bytes_to_fd(tx, b"faultline").unwrap();
        close(tx);

        let mut dst = [0u8; 5];
        read_bytes_from_fd(rx, &mut dst).unwrap();
        assert_eq!(&dst, b"fault");

        // Only four bytes remain, so filling eight must hit EOF.
        let mut rest = [0u8; 8];
        let err = read_bytes_from_fd(rx, &mut rest).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        close(rx);
    }

    #[test]
    fn test_write_fmt_truncates()
    {
        let (rx, tx) = pipe();
        let long = "x".repeat(WRITE_FMT_BUFFER_SIZE * 2);
        write_fmt_to_fd(tx, format_args!("{long}")).unwrap();
        close(tx);

        let mut dst = vec![0u8; WRITE_FMT_BUFFER_SIZE * 2];
        let mut total = 0;
        loop {
            let n = read_some(rx, &mut dst[total..]).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total, WRITE_FMT_BUFFER_SIZE);
        close(rx);
    }

    #[test]
    fn test_empty_string_rejected()
    {
        let (rx, tx) = pipe();
        assert_eq!(write_string_to_fd(tx, "").unwrap_err().kind(), io::ErrorKind::InvalidInput);
        close(tx);
        close(rx);
    }

    #[test]
    fn test_read_line()
    {
        let (rx, tx) = pipe();
        write_string_to_fd(tx, "first\nsecond").unwrap();
        close(tx);

        let mut line = [0u8; 32];
        let n = read_line_from_fd(rx, &mut line).unwrap();
        assert_eq!(&line[..n], b"first");
        let n = read_line_from_fd(rx, &mut line).unwrap();
        assert_eq!(&line[..n], b"second");
        assert_eq!(read_line_from_fd(rx, &mut line).unwrap(), 0);
        close(rx);
    }
}
