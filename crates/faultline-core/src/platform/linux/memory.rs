//! # Linux Memory Validation
//!
//! `process_vm_readv(2)` on our own pid copies memory in the kernel and
//! returns `EFAULT` instead of raising `SIGSEGV` when part of the range is
//! unmapped. Some sandboxes (seccomp profiles in containers) reject the call
//! with `EPERM`, and very old kernels lack it (`ENOSYS`). In that case the
//! copy is routed through a pipe: `write(2)` from the source address also
//! fails with `EFAULT` rather than faulting.

use std::sync::atomic::{AtomicBool, Ordering};

static VM_READV_UNAVAILABLE: AtomicBool = AtomicBool::new(false);

/// Bytes moved through the pipe per round trip; below the default pipe size
const PIPE_CHUNK: usize = 4096;

fn errno() -> libc::c_int
{
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/// Copy `dst.len()` bytes starting at `src`, failing instead of faulting
pub fn copy_safely(src: usize, dst: &mut [u8]) -> bool
{
    if dst.is_empty() {
        return true;
    }
    if !VM_READV_UNAVAILABLE.load(Ordering::Relaxed) {
        let local = libc::iovec {
            iov_base: dst.as_mut_ptr().cast(),
            iov_len: dst.len(),
        };
        let remote = libc::iovec {
            iov_base: src as *mut libc::c_void,
            iov_len: dst.len(),
        };
        // SAFETY: `local` describes a writable slice; the kernel validates `remote`.
        let copied = unsafe { libc::process_vm_readv(libc::getpid(), &local, 1, &remote, 1, 0) };
        if copied >= 0 {
            return copied.unsigned_abs() == dst.len();
        }
        match errno() {
            libc::ENOSYS | libc::EPERM => VM_READV_UNAVAILABLE.store(true, Ordering::Relaxed),
            _ => return false,
        }
    }
    copy_through_pipe(src, dst)
}

fn copy_through_pipe(src: usize, dst: &mut [u8]) -> bool
{
    let mut fds = [0 as libc::c_int; 2];
    // SAFETY: `fds` has room for both ends.
    if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC | libc::O_NONBLOCK) } != 0 {
        return false;
    }
    let [read_end, write_end] = fds;

    let mut ok = true;
    for (index, chunk) in dst.chunks_mut(PIPE_CHUNK).enumerate() {
        let from = src.wrapping_add(index * PIPE_CHUNK);
        // SAFETY: the kernel validates `from`; an unreadable range yields EFAULT.
        let written = unsafe { libc::write(write_end, from as *const libc::c_void, chunk.len()) };
        if written < 0 || written.unsigned_abs() != chunk.len() {
            ok = false;
            break;
        }
        // SAFETY: `chunk` is a writable slice of the requested length.
        let read = unsafe { libc::read(read_end, chunk.as_mut_ptr().cast(), chunk.len()) };
        if read < 0 || read.unsigned_abs() != chunk.len() {
            ok = false;
            break;
        }
    }

    // SAFETY: closing the pipe created above.
    unsafe {
        libc::close(read_end);
        libc::close(write_end);
    }
    ok
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_pipe_copy_matches_source()
    {
        let source: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut dst = vec![0u8; source.len()];
        assert!(copy_through_pipe(source.as_ptr() as usize, &mut dst));
        assert_eq!(source, dst);
    }

    #[test]
    fn test_pipe_copy_rejects_unmapped()
    {
        let mut dst = [0u8; 16];
        assert!(!copy_through_pipe(8, &mut dst));
    }
}
