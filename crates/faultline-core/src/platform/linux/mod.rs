//! # Linux Platform Layer
//!
//! - Thread enumeration through `/proc/self/task` ([`threads`])
//! - Fault-free memory copies through `process_vm_readv(2)` ([`memory`])
//! - Register state from a signal `ucontext` ([`registers`])
//!
//! There are no loaded Mach-O images on Linux; the image table sees an empty
//! [`NoImages`](crate::images::NoImages) source.

pub mod memory;
pub mod registers;
pub mod threads;

pub use memory::copy_safely;
pub(crate) use registers::{fault_address, registers_from_ucontext};
pub use threads::{current_thread, for_each_thread, read_thread_registers, resume_threads, suspend_supported, suspend_threads};
