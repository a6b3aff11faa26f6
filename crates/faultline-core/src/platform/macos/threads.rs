//! # macOS Thread Control
//!
//! Thread enumeration, suspension and register reads for the current task.
//!
//! ## Mach APIs Used
//!
//! - **task_threads()**: Enumerate threads in a task
//! - **thread_suspend() / thread_resume()**: Per-thread suspend counts
//! - **thread_get_state()**: Read a suspended thread's registers
//! - **mach_port_deallocate()**: Release thread ports
//! - **vm_deallocate()**: Free the array allocated by task_threads()
//!
//! ## Port rights
//!
//! `task_threads()` hands out one send right per thread. Enumeration releases
//! them before returning. Suspension keeps them until [`resume_threads`], so
//! the names stay valid while the threads are frozen.
//!
//! ## References
//!
//! - [task_threads(3)](https://developer.apple.com/documentation/kernel/1537751-task_threads/)
//! - [thread_suspend(3)](https://developer.apple.com/documentation/kernel/1418833-thread_suspend/)

use std::mem;

use libc::{mach_msg_type_number_t, natural_t, thread_act_t, vm_address_t, vm_size_t};
use mach2::kern_return::KERN_SUCCESS;
use mach2::mach_init::mach_thread_self;
use mach2::task::task_threads;
use mach2::traps::mach_task_self;

use super::error::MachError;
use super::ffi;
use super::registers::decode_thread_state;
use crate::context::RegisterState;
use crate::error::Result;
use crate::log::LogLevel;
use crate::safe_log;
use crate::types::ThreadId;

/// Thread array returned by `task_threads()`
///
/// Dropping it frees the array. Port rights are released separately through
/// [`ThreadList::release_rights`] because suspension needs to keep them.
struct ThreadList
{
    threads: *mut thread_act_t,
    count: mach_msg_type_number_t,
}

impl ThreadList
{
    fn fetch() -> Result<Self>
    {
        let mut threads: *mut thread_act_t = std::ptr::null_mut();
        let mut count: mach_msg_type_number_t = 0;
        // SAFETY: both out-pointers are valid; the kernel allocates the array.
        let kr = unsafe { task_threads(mach_task_self(), &mut threads, &mut count) };
        if kr != KERN_SUCCESS {
            safe_log!(LogLevel::Error, "task_threads failed: {}", kr);
            return Err(MachError::from(kr).into());
        }
        Ok(Self { threads, count })
    }

    fn as_slice(&self) -> &[thread_act_t]
    {
        if self.threads.is_null() {
            return &[];
        }
        // SAFETY: task_threads() returned `count` initialized thread names.
        unsafe { std::slice::from_raw_parts(self.threads, self.count as usize) }
    }

    fn release_rights(&self, threads: &[thread_act_t])
    {
        for &thread in threads {
            // SAFETY: each name carries one send right from task_threads().
            unsafe {
                ffi::mach_port_deallocate(mach_task_self(), thread);
            }
        }
    }
}

impl Drop for ThreadList
{
    fn drop(&mut self)
    {
        if self.threads.is_null() || self.count == 0 {
            return;
        }
        let size = (self.count as usize).saturating_mul(mem::size_of::<thread_act_t>()) as vm_size_t;
        // SAFETY: the array was allocated by task_threads() with this size.
        unsafe {
            let _ = ffi::vm_deallocate(mach_task_self(), self.threads as vm_address_t, size);
        }
    }
}

/// Mach port name of the calling thread
///
/// The extra right `mach_thread_self()` creates is released immediately; the
/// name itself stays valid for as long as the thread exists.
pub fn current_thread() -> ThreadId
{
    // SAFETY: plain trap calls with no pointer arguments.
    unsafe {
        let thread = mach_thread_self();
        ffi::mach_port_deallocate(mach_task_self(), thread);
        ThreadId(u64::from(thread))
    }
}

/// Call `visit` for every thread in the task
///
/// Returns the number of threads the kernel reported.
pub fn for_each_thread(mut visit: impl FnMut(ThreadId)) -> Result<usize>
{
    let list = ThreadList::fetch()?;
    let threads = list.as_slice();
    for &thread in threads {
        visit(ThreadId(u64::from(thread)));
    }
    list.release_rights(threads);
    Ok(threads.len())
}

/// Suspend every thread for which `skip` returns false
///
/// Thread names are written to `out` (skipped ones included) so that
/// [`resume_threads`] can undo the operation. Threads that don't fit in `out`
/// are left running. Returns the number of entries written.
pub fn suspend_threads(out: &mut [ThreadId], skip: impl Fn(ThreadId) -> bool) -> Result<usize>
{
    let list = ThreadList::fetch()?;
    let threads = list.as_slice();
    let kept = threads.len().min(out.len());
    if kept < threads.len() {
        safe_log!(LogLevel::Error, "{} threads exceed the suspend table of {}; leaving the rest running", threads.len(), out.len());
        list.release_rights(&threads[kept..]);
    }

    for (slot, &thread) in out.iter_mut().zip(&threads[..kept]) {
        let id = ThreadId(u64::from(thread));
        *slot = id;
        if skip(id) {
            continue;
        }
        // SAFETY: `thread` is a live name from task_threads().
        let kr = unsafe { ffi::thread_suspend(thread) };
        if kr != KERN_SUCCESS {
            safe_log!(LogLevel::Error, "thread_suspend ({:08x}): {}", thread, kr);
        }
    }
    Ok(kept)
}

/// Resume the threads recorded by [`suspend_threads`] and release their ports
pub fn resume_threads(threads: &[ThreadId], skip: impl Fn(ThreadId) -> bool)
{
    for &id in threads {
        if skip(id) {
            continue;
        }
        // SAFETY: the name still carries the right taken at suspend time.
        let kr = unsafe { ffi::thread_resume(port_name(id)) };
        if kr != KERN_SUCCESS {
            safe_log!(LogLevel::Error, "thread_resume ({:08x}): {}", id.raw(), kr);
        }
    }
    for &id in threads {
        // SAFETY: releases the right kept since suspend_threads().
        unsafe {
            ffi::mach_port_deallocate(mach_task_self(), port_name(id));
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn port_name(id: ThreadId) -> thread_act_t
{
    id.raw() as thread_act_t
}

/// Read the registers of a thread that is not the caller
pub fn read_thread_registers(thread: ThreadId, out: &mut RegisterState) -> bool
{
    #[cfg(target_arch = "aarch64")]
    let (flavor, count) = (ffi::ARM_THREAD_STATE64, ffi::ARM_THREAD_STATE64_COUNT);
    #[cfg(target_arch = "x86_64")]
    let (flavor, count) = (ffi::X86_THREAD_STATE64, ffi::X86_THREAD_STATE64_COUNT);

    let mut state = [0 as natural_t; ffi::ARM_THREAD_STATE64_COUNT as usize];
    let mut state_count = count;
    // SAFETY: `state` holds at least `count` words.
    let kr = unsafe { ffi::thread_get_state(port_name(thread), flavor, state.as_mut_ptr(), &mut state_count) };
    if kr != KERN_SUCCESS {
        safe_log!(LogLevel::Error, "thread_get_state ({:08x}): {}", thread.raw(), kr);
        return false;
    }
    decode_thread_state(&state[..state_count as usize], out);
    true
}

/// Suspension is always available through Mach
pub fn suspend_supported() -> bool
{
    true
}

