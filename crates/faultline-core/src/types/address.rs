//! Memory address type.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed memory address inside the current process
///
/// Crash capture only ever inspects its own address space, so an address is
/// always something that could be turned into a pointer on this machine. The
/// newtype keeps addresses from being mixed up with sizes, slides and symbol
/// values, which are all plain integers in the Mach-O structures.
///
/// ## Example
///
/// ```rust
/// use faultline_core::types::Address;
///
/// let image = Address::from(0x1000_u64);
/// let pc = image + 0x24;
/// assert_eq!(pc.offset_from(image), Some(0x24));
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Create an address from a pointer
    pub fn from_ptr<T>(ptr: *const T) -> Self
    {
        Address(ptr as usize as u64)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Get the address as a native pointer-sized integer
    ///
    /// On 32-bit targets the upper half is discarded, which can only happen
    /// for values that never came from this process anyway.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn as_usize(self) -> usize
    {
        self.0 as usize
    }

    /// Whether this is the null address
    pub const fn is_null(self) -> bool
    {
        self.0 == 0
    }

    /// Add an offset to this address, checking for overflow
    ///
    /// ```rust
    /// use faultline_core::types::Address;
    ///
    /// assert_eq!(Address::new(0x1000).checked_add(0x10), Some(Address::new(0x1010)));
    /// assert_eq!(Address::new(u64::MAX).checked_add(1), None);
    /// ```
    pub fn checked_add(self, offset: u64) -> Option<Self>
    {
        self.0.checked_add(offset).map(Address)
    }

    /// Subtract an offset from this address, checking for underflow
    pub fn checked_sub(self, offset: u64) -> Option<Self>
    {
        self.0.checked_sub(offset).map(Address)
    }

    /// Distance from `base` up to this address
    ///
    /// Returns `None` when `base` lies above `self`. Symbol lookup relies on
    /// this to ignore candidates that start after the target address.
    pub fn offset_from(self, base: Address) -> Option<u64>
    {
        self.0.checked_sub(base.0)
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<usize> for Address
{
    fn from(value: usize) -> Self
    {
        Address(value as u64)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}
