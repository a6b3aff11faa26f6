//! # macOS FFI Declarations
//!
//! `extern "C"` declarations for the Mach and dyld functions that `mach2`
//! does not bind. Everything else comes from `mach2` directly.
//!
//! ## Safety Notes
//!
//! All functions in this module are `unsafe`. They take raw Mach port names
//! and raw pointers; the safe wrappers in the sibling modules are responsible
//! for passing valid ones and releasing every port right they receive.
//!
//! ## References
//!
//! - [Apple Mach Kernel Programming](https://developer.apple.com/library/archive/documentation/Darwin/Conceptual/KernelProgramming/Mach/Mach.html)
//! - [dyld(3) man page](https://developer.apple.com/library/archive/documentation/System/Conceptual/ManPages_iPhoneOS/man3/dyld.3.html)

// Allow doc comments in extern blocks - they're useful for developers even if rustdoc doesn't generate docs
#![allow(unused_doc_comments)]

use libc::{c_char, c_int, intptr_t, kern_return_t, mach_msg_type_number_t, mach_port_t, natural_t, thread_act_t, vm_address_t, vm_map_t, vm_size_t};

/// `ARM_THREAD_STATE64` flavor for `thread_get_state()`
pub const ARM_THREAD_STATE64: c_int = 6;
/// Number of `natural_t` words in `arm_thread_state64_t`
pub const ARM_THREAD_STATE64_COUNT: mach_msg_type_number_t = 68;

/// `x86_THREAD_STATE64` flavor for `thread_get_state()`
pub const X86_THREAD_STATE64: c_int = 4;
/// Number of `natural_t` words in `x86_thread_state64_t`
pub const X86_THREAD_STATE64_COUNT: mach_msg_type_number_t = 42;

// Port and memory bookkeeping
#[link(name = "c", kind = "dylib")]
extern "C" {
    /// Release one user reference to a port right
    ///
    /// Every thread port returned by `task_threads()` or `mach_thread_self()`
    /// carries a send right that must be released with this call.
    ///
    /// See: [mach_port_deallocate](https://developer.apple.com/documentation/kernel/1578777-mach_port_deallocate/)
    pub fn mach_port_deallocate(target_task: mach_port_t, name: mach_port_t) -> kern_return_t;

    /// Free memory the kernel allocated in our address space
    ///
    /// Used for the thread array out-parameter of `task_threads()`.
    pub fn vm_deallocate(target_task: vm_map_t, address: vm_address_t, size: vm_size_t) -> kern_return_t;
}

// Thread control
#[link(name = "c", kind = "dylib")]
extern "C" {
    /// Read a thread's register state
    ///
    /// - `ARM_THREAD_STATE64` (6): 68 words
    /// - `x86_THREAD_STATE64` (4): 42 words
    ///
    /// `old_state_count` is the buffer size in words on input and the number
    /// of words written on output.
    ///
    /// See: [thread_get_state](https://developer.apple.com/documentation/kernel/1418576-thread_get_state/)
    pub fn thread_get_state(
        target_act: thread_act_t,
        flavor: c_int,
        old_state: *mut natural_t,
        old_state_count: *mut mach_msg_type_number_t,
    ) -> kern_return_t;

    /// Increment a thread's suspend count
    ///
    /// See: [thread_suspend](https://developer.apple.com/documentation/kernel/1418833-thread_suspend/)
    pub fn thread_suspend(target_act: thread_act_t) -> kern_return_t;

    /// Decrement a thread's suspend count
    ///
    /// See: [thread_resume](https://developer.apple.com/documentation/kernel/1418926-thread_resume/)
    pub fn thread_resume(target_act: thread_act_t) -> kern_return_t;
}

// Loaded image enumeration
//
// dyld keeps the image list in memory it owns; these calls only read it and
// are safe to make from a signal handler.
#[link(name = "c", kind = "dylib")]
extern "C" {
    /// Number of images currently loaded
    pub fn _dyld_image_count() -> u32;

    /// Mach-O header of image `image_index`, or null once the index is stale
    pub fn _dyld_get_image_header(image_index: u32) -> *const libc::c_void;

    /// ASLR slide applied to image `image_index`
    pub fn _dyld_get_image_vmaddr_slide(image_index: u32) -> intptr_t;

    /// Path of image `image_index`, owned by dyld
    pub fn _dyld_get_image_name(image_index: u32) -> *const c_char;
}
