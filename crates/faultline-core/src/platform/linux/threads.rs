//! # Linux Thread Enumeration
//!
//! Threads of the current process are the numeric entries of
//! `/proc/self/task`. The directory is read with raw `getdents64(2)` into a
//! stack buffer, because `readdir(3)` allocates its `DIR` handle.
//!
//! Linux has no way to suspend a single thread of the calling process
//! without a tracer, so [`suspend_threads`] reports
//! [`FaultlineError::Unsupported`] and captures run with the other threads
//! still live.

use std::io;

use crate::context::RegisterState;
use crate::error::{Errno, FaultlineError, Result};
use crate::log::LogLevel;
use crate::safe_log;
use crate::types::ThreadId;

const TASK_DIR: &[u8] = b"/proc/self/task\0";

// Offsets inside `struct linux_dirent64`
const DIRENT_RECLEN: usize = 16;
const DIRENT_NAME: usize = 19;

/// Kernel thread id of the calling thread
pub fn current_thread() -> ThreadId
{
    // SAFETY: gettid has no preconditions.
    let tid = unsafe { libc::syscall(libc::SYS_gettid) };
    ThreadId(tid.unsigned_abs())
}

fn parse_tid(name: &[u8]) -> Option<u64>
{
    if name.is_empty() {
        return None;
    }
    name.iter().try_fold(0u64, |acc, &byte| {
        byte.is_ascii_digit().then(|| acc.wrapping_mul(10).wrapping_add(u64::from(byte - b'0')))
    })
}

/// Call `visit` for every thread in the process
///
/// Returns the number of threads found.
pub fn for_each_thread(mut visit: impl FnMut(ThreadId)) -> Result<usize>
{
    // SAFETY: TASK_DIR is NUL-terminated.
    let fd = unsafe { libc::open(TASK_DIR.as_ptr().cast(), libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC) };
    if fd < 0 {
        let err = io::Error::last_os_error();
        safe_log!(LogLevel::Error, "could not open /proc/self/task: {}", Errno(&err));
        return Err(err.into());
    }

    // u64 storage keeps the dirent records 8-byte aligned.
    let mut storage = [0u64; 512];
    let mut count = 0;
    let result = loop {
        // SAFETY: the buffer pointer and byte length describe `storage`.
        let read = unsafe { libc::syscall(libc::SYS_getdents64, fd, storage.as_mut_ptr(), std::mem::size_of_val(&storage)) };
        let Ok(read) = usize::try_from(read) else {
            let err = io::Error::last_os_error();
            safe_log!(LogLevel::Error, "getdents64 on /proc/self/task failed after {} threads: {}", count, Errno(&err));
            // Threads already visited stay valid.
            break if count > 0 { Ok(count) } else { Err(err.into()) };
        };
        if read == 0 {
            break Ok(count);
        }

        // SAFETY: the kernel initialized `read` bytes of `storage`, which is
        // never more than its size.
        let bytes = unsafe { std::slice::from_raw_parts(storage.as_ptr().cast::<u8>(), read.min(std::mem::size_of_val(&storage))) };
        let mut offset = 0;
        while offset + DIRENT_NAME < bytes.len() {
            let reclen = usize::from(u16::from_ne_bytes([bytes[offset + DIRENT_RECLEN], bytes[offset + DIRENT_RECLEN + 1]]));
            if reclen == 0 || offset + reclen > bytes.len() {
                break;
            }
            let name = &bytes[offset + DIRENT_NAME..offset + reclen];
            let name = name.split(|&b| b == 0).next().unwrap_or_default();
            if let Some(tid) = parse_tid(name) {
                visit(ThreadId(tid));
                count += 1;
            }
            offset += reclen;
        }
    };

    // SAFETY: closing the descriptor opened above.
    unsafe {
        libc::close(fd);
    }
    result
}

/// Thread suspension is not available on Linux
pub fn suspend_threads(_out: &mut [ThreadId], _skip: impl Fn(ThreadId) -> bool) -> Result<usize>
{
    Err(FaultlineError::Unsupported("suspending threads of the current process"))
}

/// Nothing was suspended, so there is nothing to resume
pub fn resume_threads(_threads: &[ThreadId], _skip: impl Fn(ThreadId) -> bool) {}

/// Registers of another running thread cannot be read without ptrace
pub fn read_thread_registers(_thread: ThreadId, _out: &mut RegisterState) -> bool
{
    false
}

pub fn suspend_supported() -> bool
{
    false
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_parse_tid()
    {
        assert_eq!(parse_tid(b"1234"), Some(1234));
        assert_eq!(parse_tid(b"."), None);
        assert_eq!(parse_tid(b".."), None);
        assert_eq!(parse_tid(b""), None);
    }

    #[test]
    fn test_current_thread_is_listed()
    {
        let me = current_thread();
        let mut found = false;
        let count = for_each_thread(|thread| found |= thread == me).unwrap();
        assert!(count >= 1);
        assert!(found);
    }

    #[test]
    fn test_spawned_threads_are_listed()
    {
        let (tid_tx, tid_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let stop_rx = std::sync::Arc::new(std::sync::Mutex::new(stop_rx));
        let helpers: Vec<_> = (0..3)
            .map(|_| {
                let tid_tx = tid_tx.clone();
                let stop_rx = std::sync::Arc::clone(&stop_rx);
                std::thread::spawn(move || {
                    tid_tx.send(current_thread()).unwrap();
                    let _ = stop_rx.lock().unwrap().recv();
                })
            })
            .collect();
        let spawned: Vec<ThreadId> = (0..3).map(|_| tid_rx.recv().unwrap()).collect();

        let mut listed = Vec::new();
        let count = for_each_thread(|thread| listed.push(thread)).unwrap();
        assert_eq!(count, listed.len());
        assert!(count >= 4);
        for thread in &spawned {
            assert!(listed.contains(thread), "{thread} missing from {listed:?}");
        }

        drop(stop_tx);
        for helper in helpers {
            helper.join().unwrap();
        }
    }
}
