//! # CPU Register State
//!
//! Platform-neutral view of one thread's registers.
//!
//! ## Layout
//!
//! - **AArch64**: `gpr[0..31]` holds x0-x30; `fp` is x29 and `lr` is x30
//! - **x86-64**: `gpr` holds the thread-state words in kernel order
//!   (`gregs` on Linux, `x86_thread_state64_t` on macOS); `lr` is always 0
//!
//! The named fields are what the stack cursor needs. The general-purpose
//! array is kept for reports.

/// Registers of one thread
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterState
{
    /// Program counter
    pub pc: u64,
    /// Stack pointer
    pub sp: u64,
    /// Frame pointer (x29 / rbp)
    pub fp: u64,
    /// Link register; 0 on architectures without one
    pub lr: u64,
    /// General-purpose registers, valid up to `gpr_count`
    pub gpr: [u64; 32],
    pub gpr_count: usize,
}

impl RegisterState
{
    /// Registers with only the values the stack cursor uses
    pub fn from_frame(pc: u64, fp: u64, lr: u64) -> Self
    {
        Self {
            pc,
            fp,
            lr,
            ..Self::default()
        }
    }

    pub fn general(&self) -> &[u64]
    {
        &self.gpr[..self.gpr_count.min(self.gpr.len())]
    }

    /// Whether anything was captured at all
    pub fn is_empty(&self) -> bool
    {
        self.pc == 0 && self.sp == 0 && self.fp == 0
    }
}
