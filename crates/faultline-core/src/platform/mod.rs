//! # Platform-Specific Implementations
//!
//! Each platform module exposes the same set of free functions, re-exported
//! here so the rest of the crate never names a platform directly:
//!
//! - `current_thread()`, `for_each_thread()`: thread identity and enumeration
//! - `suspend_threads()`, `resume_threads()`: freezing the process
//! - `read_thread_registers()`: registers of another thread
//! - `copy_safely()`: memory reads that fail instead of faulting
//!
//! - **macOS**: Mach APIs (`task_threads`, `thread_suspend`, `thread_get_state`)
//!   - See: [Apple Mach Kernel Programming](https://developer.apple.com/library/archive/documentation/Darwin/Conceptual/KernelProgramming/Mach/Mach.html)
//! - **Linux / Android**: `/proc/self/task` and `process_vm_readv(2)`
//!   - See: [process_vm_readv(2)](https://man7.org/linux/man-pages/man2/process_vm_readv.2.html)

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod linux;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) use linux::{fault_address, registers_from_ucontext};
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use linux::{copy_safely, current_thread, for_each_thread, read_thread_registers, resume_threads, suspend_supported, suspend_threads};
#[cfg(target_os = "macos")]
pub(crate) use macos::{fault_address, registers_from_ucontext};
#[cfg(target_os = "macos")]
pub use macos::{copy_safely, current_thread, for_each_thread, read_thread_registers, resume_threads, suspend_supported, suspend_threads};

/// Image source for the loaded images of this process
#[cfg(target_os = "macos")]
pub type LiveImages = macos::DyldImages;
/// Image source for the loaded images of this process
#[cfg(not(target_os = "macos"))]
pub type LiveImages = crate::images::NoImages;

#[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "android")))]
compile_error!("faultline-core supports macOS, Linux and Android");
