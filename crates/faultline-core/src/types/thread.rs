//! Thread handles.

use std::fmt;

/// Platform thread handle
///
/// - **macOS**: Mach thread port name (`thread_act_t`)
/// - **Linux**: kernel thread id (TID)
///
/// The value zero never names a real thread and is used to fill unused
/// slots in fixed-size thread tables.
///
/// ```rust
/// use faultline_core::types::ThreadId;
///
/// let thread = ThreadId::from(1234);
/// assert_eq!(thread.raw(), 1234);
/// assert!(!thread.is_null());
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ThreadId(pub u64);

impl ThreadId
{
    /// Placeholder for empty table slots
    pub const NULL: ThreadId = ThreadId(0);

    /// Get the raw platform handle
    pub const fn raw(self) -> u64
    {
        self.0
    }

    pub const fn is_null(self) -> bool
    {
        self.0 == 0
    }
}

impl From<u64> for ThreadId
{
    fn from(value: u64) -> Self
    {
        Self(value)
    }
}

impl fmt::Display for ThreadId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::Display::fmt(&self.0, f)
    }
}
