//! # macOS Mach API Errors
//!
//! Mach APIs return `kern_return_t` values, which are integer error codes.
//! This module converts those codes into a Rust error type with descriptive
//! messages.

use mach2::kern_return::{
    kern_return_t, KERN_FAILURE, KERN_INVALID_ARGUMENT, KERN_PROTECTION_FAILURE, KERN_RESOURCE_SHORTAGE,
};
use thiserror::Error;

/// Mach kernel API error
///
/// Common values seen while inspecting our own task:
///
/// - `KERN_INVALID_ARGUMENT` (4): a stale thread name or bad flavor
/// - `KERN_PROTECTION_FAILURE` (5): the address range isn't readable
/// - `KERN_FAILURE` (14): the thread exited or was already suspended
/// - `KERN_RESOURCE_SHORTAGE` (6): the kernel could not allocate the reply
///
/// ## References
///
/// - [kern_return_t documentation](https://developer.apple.com/documentation/kernel/kern_return_t)
#[derive(Error, Debug)]
pub enum MachError
{
    /// `KERN_INVALID_ARGUMENT` (error code 4)
    #[error("KERN_INVALID_ARGUMENT: invalid port name or argument")]
    InvalidArgument,

    /// `KERN_PROTECTION_FAILURE` (error code 5)
    ///
    /// Returned by `mach_vm_read_overwrite()` for unreadable memory.
    #[error("KERN_PROTECTION_FAILURE: memory not accessible")]
    ProtectionFailure,

    /// `KERN_RESOURCE_SHORTAGE` (error code 6)
    #[error("KERN_RESOURCE_SHORTAGE: kernel resources exhausted")]
    ResourceShortage,

    /// `KERN_FAILURE` (error code 14)
    #[error("KERN_FAILURE: operation failed")]
    Failure,

    /// Unknown Mach error code
    ///
    /// The integer value is preserved so you can look it up.
    #[error("Unknown Mach error: {0}")]
    Unknown(i32),
}

impl From<kern_return_t> for MachError
{
    fn from(code: kern_return_t) -> Self
    {
        match code {
            KERN_INVALID_ARGUMENT => MachError::InvalidArgument,
            KERN_PROTECTION_FAILURE => MachError::ProtectionFailure,
            KERN_RESOURCE_SHORTAGE => MachError::ResourceShortage,
            KERN_FAILURE => MachError::Failure,
            _ => MachError::Unknown(code),
        }
    }
}
