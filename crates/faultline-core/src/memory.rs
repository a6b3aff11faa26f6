//! # Readable-memory validation
//!
//! Crash contexts routinely contain corrupted stacks and dangling pointers.
//! Every read the capture code performs on process memory goes through a
//! [`MemoryReader`], which copies via the kernel and reports unreadable
//! ranges instead of faulting.
//!
//! [`LiveMemory`] reads the current process. Tests and tools can provide
//! their own reader over a byte buffer.

use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

use object::pod::Pod;

use crate::platform;
use crate::types::Address;

static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

/// Page size of this machine
///
/// The first call queries the OS. Callers that may run inside a signal
/// handler should call this once during setup (monitor enable does).
pub fn page_size() -> usize
{
    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            let size = page_size::get();
            PAGE_SIZE.store(size, Ordering::Relaxed);
            size
        }
        size => size,
    }
}

/// Validated access to process memory
///
/// Only [`copy_safely`](MemoryReader::copy_safely) has to be implemented;
/// everything else is built on it.
pub trait MemoryReader
{
    /// Copy `dst.len()` bytes starting at `src`
    ///
    /// Returns false, with `dst` in an unspecified state, if any byte of the
    /// range is not readable.
    fn copy_safely(&self, src: Address, dst: &mut [u8]) -> bool;

    /// Whether all `len` bytes starting at `address` can be read
    fn is_readable(&self, address: Address, len: usize) -> bool
    {
        let mut scratch = [0u8; 256];
        let mut offset = 0;
        while offset < len {
            let chunk = (len - offset).min(scratch.len());
            if !self.copy_safely(address + offset as u64, &mut scratch[..chunk]) {
                return false;
            }
            offset += chunk;
        }
        true
    }

    /// How many bytes, up to `try_len`, can be read starting at `address`
    ///
    /// Protection is per page, so one byte per page is checked.
    fn max_readable_bytes(&self, address: Address, try_len: usize) -> usize
    {
        let page = page_size().max(1) as u64;
        let mut sample = [0u8; 1];
        if try_len == 0 || !self.copy_safely(address, &mut sample) {
            return 0;
        }
        let end = address.value().saturating_add(try_len as u64);
        let mut next_page = (address.value() / page + 1).saturating_mul(page);
        while next_page < end {
            if !self.copy_safely(Address::new(next_page), &mut sample) {
                return usize::try_from(next_page - address.value()).unwrap_or(try_len);
            }
            next_page = next_page.saturating_add(page);
        }
        try_len
    }

    /// Read one plain-old-data value
    fn read_pod<T: Pod>(&self, address: Address) -> Option<T>
    where
        Self: Sized,
    {
        let mut value = MaybeUninit::<T>::zeroed();
        // SAFETY: `T: Pod` has no invalid bit patterns, so the zeroed value is
        // initialized and may be viewed as bytes.
        let bytes = unsafe { std::slice::from_raw_parts_mut(value.as_mut_ptr().cast::<u8>(), std::mem::size_of::<T>()) };
        if !self.copy_safely(address, bytes) {
            return None;
        }
        // SAFETY: every byte was either zeroed or overwritten above.
        Some(unsafe { value.assume_init() })
    }

    /// Read a native-endian 64-bit word
    fn read_u64(&self, address: Address) -> Option<u64>
    {
        let mut bytes = [0u8; 8];
        self.copy_safely(address, &mut bytes).then(|| u64::from_ne_bytes(bytes))
    }
}

/// The memory of the current process
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveMemory;

impl MemoryReader for LiveMemory
{
    fn copy_safely(&self, src: Address, dst: &mut [u8]) -> bool
    {
        if src.is_null() {
            return dst.is_empty();
        }
        platform::copy_safely(src.as_usize(), dst)
    }
}
