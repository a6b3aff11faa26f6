//! # Buffered descriptor I/O
//!
//! [`BufferedWriter`] and [`BufferedReader`] wrap a raw file descriptor with a
//! caller-supplied byte buffer. Neither type allocates: the buffer is borrowed
//! for the lifetime of the wrapper, so it can live on the stack of a signal
//! handler or in a static prepared at enable time.
//!
//! ## Writer
//!
//! Writes accumulate in the buffer. A write that doesn't fit in the remaining
//! space flushes first; a write larger than the whole buffer then goes
//! straight to the descriptor.
//!
//! ## Reader
//!
//! The reader keeps a `[start, end)` window of unread bytes. Refilling moves
//! the window to the front of the buffer before reading more data behind it.

use std::ffi::CStr;
use std::io;

use super::fd::{read_some, write_bytes_to_fd};
use crate::error::Errno;
use crate::log::LogLevel;
use crate::safe_log;

fn open_fd(path: &CStr, flags: libc::c_int, mode: libc::c_uint) -> io::Result<libc::c_int>
{
    loop {
        // SAFETY: `path` is a valid NUL-terminated string.
        let fd = unsafe { libc::open(path.as_ptr(), flags, mode) };
        if fd >= 0 {
            return Ok(fd);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

fn close_fd(fd: libc::c_int)
{
    // SAFETY: only called with descriptors this module opened.
    unsafe {
        libc::close(fd);
    }
}

/// Buffered writer over a raw descriptor
pub struct BufferedWriter<'b>
{
    fd: libc::c_int,
    buffer: &'b mut [u8],
    position: usize,
    owns_fd: bool,
}

impl<'b> BufferedWriter<'b>
{
    /// Create a new file at `path` and buffer writes into `buffer`
    ///
    /// The file is opened with `O_RDWR | O_CREAT | O_EXCL` and mode `0644`, so
    /// an existing file is never overwritten.
    pub fn open(path: &CStr, buffer: &'b mut [u8]) -> io::Result<Self>
    {
        let fd = open_fd(path, libc::O_RDWR | libc::O_CREAT | libc::O_EXCL, 0o644).inspect_err(|err| {
            safe_log!(LogLevel::Error, "could not open {:?}: {}", path, Errno(err));
        })?;
        Ok(Self {
            fd,
            buffer,
            position: 0,
            owns_fd: true,
        })
    }

    /// Wrap a descriptor the caller keeps ownership of
    pub fn from_raw_fd(fd: libc::c_int, buffer: &'b mut [u8]) -> Self
    {
        Self {
            fd,
            buffer,
            position: 0,
            owns_fd: false,
        }
    }

    pub fn fd(&self) -> libc::c_int
    {
        self.fd
    }

    /// Bytes currently held in the buffer
    pub fn pending(&self) -> usize
    {
        self.position
    }

    pub fn capacity(&self) -> usize
    {
        self.buffer.len()
    }

    /// Append `data`, flushing as needed
    pub fn write(&mut self, data: &[u8]) -> io::Result<()>
    {
        if data.len() > self.buffer.len() - self.position {
            self.flush()?;
        }
        if data.len() > self.buffer.len() {
            return write_bytes_to_fd(self.fd, data);
        }
        self.buffer[self.position..self.position + data.len()].copy_from_slice(data);
        self.position += data.len();
        Ok(())
    }

    /// Write everything buffered so far to the descriptor
    pub fn flush(&mut self) -> io::Result<()>
    {
        if self.fd >= 0 && self.position > 0 {
            write_bytes_to_fd(self.fd, &self.buffer[..self.position])?;
            self.position = 0;
        }
        Ok(())
    }

    /// Flush and release the descriptor
    pub fn close(mut self) -> io::Result<()>
    {
        let result = self.flush();
        self.release();
        result
    }

    fn release(&mut self)
    {
        if self.owns_fd && self.fd >= 0 {
            close_fd(self.fd);
        }
        self.fd = -1;
    }
}

impl std::fmt::Write for BufferedWriter<'_>
{
    fn write_str(&mut self, s: &str) -> std::fmt::Result
    {
        self.write(s.as_bytes()).map_err(|_| std::fmt::Error)
    }
}

impl Drop for BufferedWriter<'_>
{
    fn drop(&mut self)
    {
        if self.fd >= 0 {
            let _ = self.flush();
            self.release();
        }
    }
}

/// Buffered reader over a raw descriptor
pub struct BufferedReader<'b>
{
    fd: libc::c_int,
    buffer: &'b mut [u8],
    start: usize,
    end: usize,
    owns_fd: bool,
}

impl<'b> BufferedReader<'b>
{
    /// Open `path` read-only and prime the buffer
    pub fn open(path: &CStr, buffer: &'b mut [u8]) -> io::Result<Self>
    {
        if buffer.is_empty() {
            return Err(io::ErrorKind::InvalidInput.into());
        }
        let fd = open_fd(path, libc::O_RDONLY, 0).inspect_err(|err| {
            safe_log!(LogLevel::Error, "could not open {:?}: {}", path, Errno(err));
        })?;
        let mut reader = Self {
            fd,
            buffer,
            start: 0,
            end: 0,
            owns_fd: true,
        };
        reader.fill()?;
        Ok(reader)
    }

    /// Wrap a descriptor the caller keeps ownership of
    ///
    /// Nothing is read until the first call that needs data.
    pub fn from_raw_fd(fd: libc::c_int, buffer: &'b mut [u8]) -> Self
    {
        Self {
            fd,
            buffer,
            start: 0,
            end: 0,
            owns_fd: false,
        }
    }

    /// Unread bytes currently buffered
    pub fn buffered(&self) -> &[u8]
    {
        &self.buffer[self.start..self.end]
    }

    /// Move unread bytes to the front and read more behind them
    ///
    /// Returns the number of new bytes. Zero means end of file, or that the
    /// buffer is already full of unread data.
    fn fill(&mut self) -> io::Result<usize>
    {
        if self.start > 0 {
            self.buffer.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        if self.end == self.buffer.len() {
            return Ok(0);
        }
        let count = read_some(self.fd, &mut self.buffer[self.end..]).inspect_err(|err| {
            safe_log!(LogLevel::Error, "could not read fd {}: {}", self.fd, Errno(err));
        })?;
        self.end += count;
        Ok(count)
    }

    /// Copy up to `dst.len()` bytes, refilling as needed
    ///
    /// Returns fewer bytes than requested only at end of file or on a read
    /// error.
    pub fn read(&mut self, dst: &mut [u8]) -> usize
    {
        let mut consumed = 0;
        while consumed < dst.len() {
            if self.start == self.end && !matches!(self.fill(), Ok(n) if n > 0) {
                break;
            }
            let count = (self.end - self.start).min(dst.len() - consumed);
            dst[consumed..consumed + count].copy_from_slice(&self.buffer[self.start..self.start + count]);
            self.start += count;
            consumed += count;
        }
        consumed
    }

    /// Copy bytes up to and including `delimiter`, at most `dst.len()` of them
    ///
    /// Returns the number of bytes copied and whether the delimiter was among
    /// them. When the bound or end of file is reached first, the bytes read
    /// so far are still returned.
    pub fn read_until_char(&mut self, delimiter: u8, dst: &mut [u8]) -> (usize, bool)
    {
        let mut consumed = 0;
        while consumed < dst.len() {
            if self.start == self.end && !matches!(self.fill(), Ok(n) if n > 0) {
                break;
            }
            let window = &self.buffer[self.start..self.end];
            let limit = window.len().min(dst.len() - consumed);
            let (count, found) = match window[..limit].iter().position(|&b| b == delimiter) {
                Some(index) => (index + 1, true),
                None => (limit, false),
            };
            dst[consumed..consumed + count].copy_from_slice(&window[..count]);
            self.start += count;
            consumed += count;
            if found {
                return (consumed, true);
            }
        }
        (consumed, false)
    }

    /// Release the descriptor
    pub fn close(mut self)
    {
        self.release();
    }

    fn release(&mut self)
    {
        if self.owns_fd && self.fd >= 0 {
            close_fd(self.fd);
        }
        self.fd = -1;
    }
}

impl Drop for BufferedReader<'_>
{
    fn drop(&mut self)
    {
        self.release();
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_reader_shifts_unread_bytes()
    {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        write_bytes_to_fd(fds[1], b"0123456789").unwrap();
        unsafe {
            libc::close(fds[1]);
        }

        let mut storage = [0u8; 4];
        let mut reader = BufferedReader::from_raw_fd(fds[0], &mut storage);
        let mut dst = [0u8; 3];
        assert_eq!(reader.read(&mut dst), 3);
        assert_eq!(&dst, b"012");
        assert_eq!(reader.buffered(), b"3");

        // The leftover "3" comes first, then refills continue from the front.
        let mut rest = [0u8; 16];
        assert_eq!(reader.read(&mut rest), 7);
        assert_eq!(&rest[..7], b"3456789");

        reader.close();
        unsafe {
            libc::close(fds[0]);
        }
    }
}
