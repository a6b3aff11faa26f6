//! # macOS Platform Layer
//!
//! Everything here operates on the current task only (`mach_task_self()`),
//! so none of it needs the debugging entitlements `task_for_pid()` would.
//!
//! ## Key Mach APIs Used
//!
//! - `task_threads()`, `thread_suspend()`, `thread_resume()`: freezing the
//!   process around a capture
//! - `thread_get_state()`: registers of other, suspended threads
//! - `mach_vm_read_overwrite()`: reading memory without risking a fault
//! - `_dyld_*`: enumerating loaded images
//!
//! ## Dependencies
//!
//! - **mach2 crate**: well-maintained Mach APIs (`mach_task_self`,
//!   `task_threads`, `mach_vm_read_overwrite`, `KERN_SUCCESS`)
//! - **libc crate**: type definitions (`thread_act_t`, `natural_t`, ...)
//! - **extern "C"**: functions neither crate binds, see [`ffi`]

pub mod dyld;
pub mod error;
pub mod ffi;
pub mod memory;
pub mod registers;
pub mod threads;

pub use dyld::DyldImages;
pub use memory::copy_safely;
pub(crate) use registers::{fault_address, registers_from_ucontext};
pub use threads::{current_thread, for_each_thread, read_thread_registers, resume_threads, suspend_supported, suspend_threads};
