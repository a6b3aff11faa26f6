//! # macOS Memory Validation
//!
//! Reading through a raw pointer that turns out to be unmapped would fault
//! inside the fault handler. `mach_vm_read_overwrite()` performs the copy in
//! the kernel instead and reports `KERN_INVALID_ADDRESS` or
//! `KERN_PROTECTION_FAILURE` rather than raising a signal.
//!
//! See: [mach_vm_read_overwrite](https://developer.apple.com/documentation/kernel/1402127-mach_vm_read_overwrite/)

use mach2::kern_return::KERN_SUCCESS;
use mach2::traps::mach_task_self;
use mach2::vm::mach_vm_read_overwrite;
use mach2::vm_types::{mach_vm_address_t, mach_vm_size_t};

/// Copy `dst.len()` bytes starting at `src`, failing instead of faulting
pub fn copy_safely(src: usize, dst: &mut [u8]) -> bool
{
    if dst.is_empty() {
        return true;
    }
    let mut copied: mach_vm_size_t = 0;
    // SAFETY: the kernel validates `src`; `dst` is a valid writable slice.
    let kr = unsafe {
        mach_vm_read_overwrite(
            mach_task_self(),
            src as mach_vm_address_t,
            dst.len() as mach_vm_size_t,
            dst.as_mut_ptr() as mach_vm_address_t,
            &mut copied,
        )
    };
    kr == KERN_SUCCESS && copied as usize == dst.len()
}
