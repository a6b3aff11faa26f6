//! Strings that live in image memory.

use std::ffi::CStr;

use crate::memory::{LiveMemory, MemoryReader};
use crate::types::Address;

/// Location of a NUL-terminated string inside a loaded image
///
/// Describing an image or resolving a symbol never borrows the image's
/// bytes. This records where a validated string was found and how long it
/// was; [`read`](Self::read) copies it into a caller buffer through a
/// [`MemoryReader`] when it is needed. Once the image is unloaded the copy
/// fails instead of touching unmapped memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageString
{
    address: Address,
    len: usize,
}

impl ImageString
{
    pub(crate) const fn new(address: Address, len: usize) -> Self
    {
        Self { address, len }
    }

    pub const fn address(&self) -> Address
    {
        self.address
    }

    /// Length in bytes, not counting the terminator
    pub const fn len(&self) -> usize
    {
        self.len
    }

    pub const fn is_empty(&self) -> bool
    {
        self.len == 0
    }

    /// The same string without its first `count` bytes
    pub(crate) fn skip(self, count: usize) -> Self
    {
        let count = count.min(self.len);
        Self {
            address: self.address + count as u64,
            len: self.len - count,
        }
    }

    /// Copy the string into `buffer` through `memory`
    ///
    /// Strings longer than `buffer.len() - 1` are truncated. Returns `None`
    /// for an empty buffer or when the bytes can no longer be read.
    pub fn read_with<'b, M: MemoryReader>(&self, memory: &M, buffer: &'b mut [u8]) -> Option<&'b CStr>
    {
        let len = self.len.min(buffer.len().checked_sub(1)?);
        if len > 0 && !memory.copy_safely(self.address, &mut buffer[..len]) {
            return None;
        }
        buffer[len] = 0;
        CStr::from_bytes_until_nul(&buffer[..=len]).ok()
    }

    /// [`read_with`](Self::read_with) over the memory of this process
    pub fn read<'b>(&self, buffer: &'b mut [u8]) -> Option<&'b CStr>
    {
        self.read_with(&LiveMemory, buffer)
    }
}
