//! # Error Types
//!
//! General error handling for crash capture.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.
//!
//! Only operations that run in a normal execution context return these
//! errors (enabling monitors, reserving threads, file utilities). Code that
//! runs while a fault is being handled never propagates errors upward: it logs
//! through [`crate::log`] and keeps going. Those logs format errors with
//! [`Errno`] and [`FaultlineError::fault_display`], because the `Display` of
//! `io::Error` asks libc for the message and allocates it.

use std::{fmt, io};

use thiserror::Error;

/// Main error type for capture operations
///
/// ## Error Categories
///
/// 1. **Installation errors**: HookInstallFailed, AltStackFailed
/// 2. **Thread errors**: SuspendFailed, ResumeFailed, ResourceExhausted
/// 3. **Platform errors**: Unsupported, MachError (macOS-specific)
/// 4. **Argument errors**: InvalidArgument
/// 5. **I/O errors**: Io
#[derive(Error, Debug)]
pub enum FaultlineError
{
    /// Installing an OS-level fault hook failed
    ///
    /// When this is returned from `set_enabled(true)`, every hook installed
    /// earlier in the same attempt has already been restored and the monitor
    /// is still disabled.
    #[error("Failed to install handler for {hook}: {reason}")]
    HookInstallFailed
    {
        /// Name of the hook (usually a signal name)
        hook: &'static str,
        /// What the OS reported
        reason: String,
    },

    /// The alternate signal stack could not be mapped or registered
    #[error("Failed to set up alternate signal stack: {0}")]
    AltStackFailed(String),

    /// The operation is not available on this platform
    ///
    /// Linux, for example, has no primitive for suspending an individual
    /// thread of the current process.
    #[error("Unsupported on this platform: {0}")]
    Unsupported(&'static str),

    /// Failed to suspend a thread
    #[error("Failed to suspend thread {thread}: {reason}")]
    SuspendFailed
    {
        /// Raw thread handle
        thread: u64,
        /// Platform error code, formatted
        reason: String,
    },

    /// Failed to resume a thread
    #[error("Failed to resume thread {thread}: {reason}")]
    ResumeFailed
    {
        /// Raw thread handle
        thread: u64,
        /// Platform error code, formatted
        reason: String,
    },

    /// A fixed-capacity table is full
    ///
    /// Returned when reserving more threads than the reserved-thread
    /// allow-list can hold.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Invalid argument passed to a capture function
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// macOS-specific Mach API error
    ///
    /// See: [Mach Kernel Return Codes](https://developer.apple.com/documentation/kernel/kern_return_t)
    #[cfg(target_os = "macos")]
    #[error("Mach API error: {0}")]
    MachError(#[from] crate::platform::macos::error::MachError),

    /// I/O error (for file operations, etc.)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FaultlineError
{
    /// Formatting that is safe inside a signal handler
    ///
    /// I/O errors print their errno; every other variant prints as usual.
    pub fn fault_display(&self) -> FaultDisplay<'_>
    {
        FaultDisplay(self)
    }
}

/// An [`io::Error`] shown as its errno, or its kind when it has none
#[derive(Debug, Clone, Copy)]
pub struct Errno<'a>(pub &'a io::Error);

impl fmt::Display for Errno<'_>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self.0.raw_os_error() {
            Some(code) => write!(f, "errno {code}"),
            None => write!(f, "{:?}", self.0.kind()),
        }
    }
}

/// Returned by [`FaultlineError::fault_display`]
#[derive(Debug, Clone, Copy)]
pub struct FaultDisplay<'a>(&'a FaultlineError);

impl fmt::Display for FaultDisplay<'_>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self.0 {
            FaultlineError::Io(err) => write!(f, "IO error: {}", Errno(err)),
            other => fmt::Display::fmt(other, f),
        }
    }
}

/// Convenience type alias for `Result<T, FaultlineError>`
///
/// ```rust
/// use faultline_core::error::Result;
/// fn foo() -> Result<()>
/// {
///     Ok(())
/// }
/// ```
pub type Result<T> = std::result::Result<T, FaultlineError>;
