//! # Stack Cursor
//!
//! A lazily advanced, restartable sequence of return addresses.
//!
//! ## Sources
//!
//! - **Registers** (a fault context or a suspended thread): emits the program
//!   counter, then the link register when one is set, then follows the chain
//!   of frame records starting at the frame pointer.
//! - **Captured** (the calling thread): a backtrace taken eagerly by
//!   [`capture_current_thread`] into a fixed buffer inside the cursor.
//!
//! ## Frame records
//!
//! On both supported architectures a standard prologue leaves
//! `{previous_fp, return_address}` at the address held in the frame
//! pointer. The walk stops cleanly on a null link, a null return address or a
//! record that cannot be read. A record that links to itself is reported
//! once and ends the walk.
//!
//! ## Depth limit
//!
//! [`StackCursor::advance`] refuses to go past `max_depth` and sets
//! [`has_given_up`](StackCursor::has_given_up) when it hits the limit. A
//! corrupted stack whose records form a longer loop therefore ends at
//! exactly `max_depth` addresses, and stack-overflow detection reads the
//! flag.
//!
//! Nothing here allocates; every read goes through a [`MemoryReader`].

mod self_thread;

pub use self_thread::capture_current_thread;

use crate::context::RegisterState;
use crate::memory::{LiveMemory, MemoryReader};
use crate::types::Address;

/// Frame limit for cursors built from a fault context
pub const DEFAULT_MAX_DEPTH: usize = 500;

/// Capacity of the eagerly captured self-thread backtrace
pub const MAX_CAPTURED_FRAMES: usize = 100;

/// Read the `{previous_fp, return_address}` record at `fp`
pub(crate) fn read_frame_record<M: MemoryReader>(memory: &M, fp: u64) -> Option<(u64, u64)>
{
    if fp == 0 {
        return None;
    }
    let mut record = [0u8; 16];
    if !memory.copy_safely(Address::new(fp), &mut record) {
        return None;
    }
    let (previous, return_address) = record.split_at(8);
    Some((
        u64::from_ne_bytes(previous.try_into().ok()?),
        u64::from_ne_bytes(return_address.try_into().ok()?),
    ))
}

#[derive(Debug, Clone, Copy)]
enum Source
{
    Registers
    {
        pc: u64,
        lr: u64,
        fp: u64,
    },
    Captured
    {
        addresses: [u64; MAX_CAPTURED_FRAMES],
        len: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage
{
    ProgramCounter,
    LinkRegister,
    FrameChain
    {
        fp: u64,
    },
    Captured
    {
        index: usize,
    },
    Done,
}

/// Restartable walk over one thread's return addresses
#[derive(Debug, Clone, Copy)]
pub struct StackCursor<M = LiveMemory>
{
    memory: M,
    source: Source,
    stage: Stage,
    max_depth: usize,
    depth: usize,
    address: Address,
    has_given_up: bool,
}

impl StackCursor<LiveMemory>
{
    /// Cursor over the live stack described by `registers`
    pub fn from_registers(registers: &RegisterState, max_depth: usize) -> Self
    {
        Self::with_memory(LiveMemory, registers, max_depth)
    }

    /// Cursor over a backtrace of the calling thread
    ///
    /// `skip` frames above the caller are dropped. At most
    /// [`MAX_CAPTURED_FRAMES`] addresses are recorded.
    #[inline(never)]
    pub fn from_current_thread(skip: usize, max_depth: usize) -> Self
    {
        let mut addresses = [0u64; MAX_CAPTURED_FRAMES];
        // One more to step over this constructor.
        let len = capture_current_thread(skip + 1, &mut addresses);
        Self::from_addresses(&addresses[..len], max_depth)
    }

    /// Cursor over an already captured list of addresses
    ///
    /// Anything past [`MAX_CAPTURED_FRAMES`] is dropped.
    pub fn from_addresses(frames: &[u64], max_depth: usize) -> Self
    {
        let mut addresses = [0u64; MAX_CAPTURED_FRAMES];
        let len = frames.len().min(MAX_CAPTURED_FRAMES);
        addresses[..len].copy_from_slice(&frames[..len]);
        Self::new(LiveMemory, Source::Captured { addresses, len }, max_depth)
    }
}

impl<M: MemoryReader> StackCursor<M>
{
    /// Cursor over a frame chain read through `memory`
    pub fn with_memory(memory: M, registers: &RegisterState, max_depth: usize) -> Self
    {
        let source = Source::Registers {
            pc: registers.pc,
            lr: registers.lr,
            fp: registers.fp,
        };
        Self::new(memory, source, max_depth)
    }

    fn new(memory: M, source: Source, max_depth: usize) -> Self
    {
        let mut cursor = Self {
            memory,
            source,
            stage: Stage::Done,
            max_depth,
            depth: 0,
            address: Address::ZERO,
            has_given_up: false,
        };
        cursor.reset();
        cursor
    }

    /// Restart from the first address
    pub fn reset(&mut self)
    {
        self.stage = match self.source {
            Source::Registers { .. } => Stage::ProgramCounter,
            Source::Captured { .. } => Stage::Captured { index: 0 },
        };
        self.depth = 0;
        self.address = Address::ZERO;
        self.has_given_up = false;
    }

    /// Move to the next return address
    ///
    /// Returns false when the walk is over, either because the chain ended
    /// or because `max_depth` addresses were already produced. Only the
    /// latter sets [`has_given_up`](Self::has_given_up).
    pub fn advance(&mut self) -> bool
    {
        if self.stage == Stage::Done {
            return false;
        }
        if self.depth >= self.max_depth {
            self.has_given_up = true;
            self.stage = Stage::Done;
            return false;
        }

        match self.next_address() {
            Some(address) => {
                self.address = Address::new(address);
                self.depth += 1;
                true
            }
            None => {
                self.stage = Stage::Done;
                false
            }
        }
    }

    fn next_address(&mut self) -> Option<u64>
    {
        loop {
            match (self.stage, &self.source) {
                (Stage::ProgramCounter, &Source::Registers { pc, .. }) => {
                    self.stage = Stage::LinkRegister;
                    if pc != 0 {
                        return Some(pc);
                    }
                }
                (Stage::LinkRegister, &Source::Registers { lr, fp, .. }) => {
                    self.stage = Stage::FrameChain { fp };
                    if lr != 0 {
                        return Some(lr);
                    }
                }
                (Stage::FrameChain { fp }, _) => {
                    let (previous, return_address) = read_frame_record(&self.memory, fp)?;
                    if previous == 0 || return_address == 0 {
                        return None;
                    }
                    self.stage = if previous == fp { Stage::Done } else { Stage::FrameChain { fp: previous } };
                    return Some(return_address);
                }
                (Stage::Captured { index }, Source::Captured { addresses, len }) => {
                    if index >= *len {
                        return None;
                    }
                    self.stage = Stage::Captured { index: index + 1 };
                    return Some(addresses[index]);
                }
                _ => return None,
            }
        }
    }

    /// Address produced by the last successful [`advance`](Self::advance)
    pub fn address(&self) -> Address
    {
        self.address
    }

    /// Number of addresses produced so far
    pub fn depth(&self) -> usize
    {
        self.depth
    }

    pub fn max_depth(&self) -> usize
    {
        self.max_depth
    }

    /// Whether the walk was cut short by the depth limit
    pub fn has_given_up(&self) -> bool
    {
        self.has_given_up
    }

    /// Advance until the end and store the addresses in `out`
    ///
    /// The cursor is left exhausted. Returns how many addresses were stored;
    /// the walk continues past the capacity of `out` so that
    /// [`has_given_up`](Self::has_given_up) stays meaningful.
    pub fn collect_into(&mut self, out: &mut [u64]) -> usize
    {
        let mut stored = 0;
        while self.advance() {
            if let Some(slot) = out.get_mut(stored) {
                *slot = self.address.value();
                stored += 1;
            }
        }
        stored
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_captured_source_yields_in_order()
    {
        let mut cursor = StackCursor::from_addresses(&[0x10, 0x20, 0x30], 10);
        let mut out = [0u64; 8];
        assert_eq!(cursor.collect_into(&mut out), 3);
        assert_eq!(&out[..3], &[0x10, 0x20, 0x30]);
        assert!(!cursor.has_given_up());
        assert!(!cursor.advance());
    }

    #[test]
    fn test_captured_source_gives_up_at_max_depth()
    {
        let mut cursor = StackCursor::from_addresses(&[1, 2, 3, 4], 2);
        assert!(cursor.advance());
        assert!(cursor.advance());
        assert!(!cursor.advance());
        assert!(cursor.has_given_up());
        assert_eq!(cursor.depth(), 2);
    }

    #[test]
    fn test_reset_restarts_walk()
    {
        let mut cursor = StackCursor::from_addresses(&[7, 8], 2);
        while cursor.advance() {}
        assert!(cursor.has_given_up());

        cursor.reset();
        assert_eq!(cursor.depth(), 0);
        assert!(!cursor.has_given_up());
        assert!(cursor.advance());
        assert_eq!(cursor.address().value(), 7);
    }

    #[test]
    fn test_registers_without_frame_pointer()
    {
        let registers = RegisterState::from_frame(0x4000, 0, 0x5000);
        let mut cursor = StackCursor::from_registers(&registers, 10);
        assert!(cursor.advance());
        assert_eq!(cursor.address().value(), 0x4000);
        assert!(cursor.advance());
        assert_eq!(cursor.address().value(), 0x5000);
        assert!(!cursor.advance());
        assert!(!cursor.has_given_up());
    }

    #[test]
    fn test_current_thread_cursor_is_not_empty()
    {
        let mut cursor = StackCursor::from_current_thread(0, 50);
        assert!(cursor.advance());
        assert_ne!(cursor.address(), Address::ZERO);
    }
}
