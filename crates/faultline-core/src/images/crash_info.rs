//! # `__DATA,__crash_info`
//!
//! Apple's libraries (and anything else that wants to) can leave diagnostic
//! strings in a `__crash_info` section: the message an `abort()` was called
//! with, a signature, sometimes a textual backtrace. The section holds a
//! versioned record of pointers to those strings.
//!
//! The record sits in writable memory of a process that just crashed, so it
//! is checked before any of it is used:
//!
//! 1. the section must cover the record up to the `reserved` field
//! 2. those bytes must be readable
//! 3. the version must be 4 or 5
//! 4. at least one of the two message pointers must be set
//!
//! Each string must then have a NUL within [`MAX_CRASH_INFO_STRING_LENGTH`]
//! readable bytes, or it is dropped.

use std::mem::size_of;

use object::pod::Pod;

use super::macho::find_c_str;
use super::string::ImageString;
use crate::log::LogLevel;
use crate::memory::MemoryReader;
use crate::safe_log;
use crate::types::Address;

/// Longest crash-info string accepted, not counting the terminator
pub const MAX_CRASH_INFO_STRING_LENGTH: usize = 4096;

/// Leading part of `crash_info_t`, up to (not including) `reserved`
///
/// Pointers are 64-bit; 32-bit images never share a process with this code.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct CrashInfoRecord
{
    pub version: u32,
    _padding: u32,
    pub message: u64,
    pub signature: u64,
    pub backtrace: u64,
    pub message2: u64,
}

// SAFETY: plain integers with explicit padding; every bit pattern is valid.
unsafe impl Pod for CrashInfoRecord {}

/// Bytes the section must provide: `offsetof(crash_info_t, reserved)`
pub(crate) const CRASH_INFO_MIN_SIZE: usize = size_of::<CrashInfoRecord>();

/// Strings recovered from an image's crash-info record
///
/// The strings stay in the image's own memory; read them with
/// [`ImageString::read`] while the image is loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrashInfo
{
    pub message: Option<ImageString>,
    pub message2: Option<ImageString>,
    pub signature: Option<ImageString>,
    pub backtrace: Option<ImageString>,
}

impl CrashInfo
{
    pub fn is_empty(&self) -> bool
    {
        self.message.is_none() && self.message2.is_none() && self.signature.is_none() && self.backtrace.is_none()
    }
}

fn valid_string<M: MemoryReader>(memory: &M, pointer: u64) -> Option<ImageString>
{
    find_c_str(memory, Address::new(pointer), MAX_CRASH_INFO_STRING_LENGTH + 1)
}

/// Read the record at `section` (slid address) of `section_size` bytes
pub(crate) fn read_crash_info<M: MemoryReader>(memory: &M, section: Address, section_size: u64) -> CrashInfo
{
    if section_size < CRASH_INFO_MIN_SIZE as u64 {
        safe_log!(LogLevel::Trace, "skipped crash info: section is too small");
        return CrashInfo::default();
    }
    if !memory.is_readable(section, CRASH_INFO_MIN_SIZE) {
        safe_log!(LogLevel::Trace, "skipped crash info: section memory is not readable");
        return CrashInfo::default();
    }
    let Some(record) = memory.read_pod::<CrashInfoRecord>(section) else {
        return CrashInfo::default();
    };
    if record.version != 4 && record.version != 5 {
        safe_log!(LogLevel::Trace, "skipped crash info: invalid version {}", record.version);
        return CrashInfo::default();
    }
    if record.message == 0 && record.message2 == 0 {
        safe_log!(LogLevel::Trace, "skipped crash info: both messages are null");
        return CrashInfo::default();
    }

    CrashInfo {
        message: valid_string(memory, record.message),
        message2: valid_string(memory, record.message2),
        signature: valid_string(memory, record.signature),
        backtrace: valid_string(memory, record.backtrace),
    }
}
