//! Tests for stack walking over synthetic frame chains

use faultline_core::context::{detect_stack_overflow, RegisterState, STACK_OVERFLOW_THRESHOLD};
use faultline_core::memory::MemoryReader;
use faultline_core::types::Address;
use faultline_core::unwind::{StackCursor, DEFAULT_MAX_DEPTH};

const STACK_BASE: u64 = 0x7000_0000;
const PC: u64 = 0x4000_0000;

/// A fake stack: `words[i]` lives at `STACK_BASE + 8 * i`
struct SliceMemory
{
    words: Vec<u64>,
}

impl SliceMemory
{
    /// Frame records at 16-byte steps, each linking to the next
    ///
    /// The last record is a terminator with a null link, so the chain yields
    /// exactly `frames` return addresses.
    fn chain(frames: usize) -> Self
    {
        let mut words = Vec::with_capacity((frames + 1) * 2);
        for index in 0..frames {
            words.push(record_address(index + 1));
            words.push(return_address(index));
        }
        words.extend([0, 0]);
        Self { words }
    }

    /// Records that link back to the first one forever
    fn cycle(frames: usize) -> Self
    {
        let mut words = Vec::with_capacity(frames * 2);
        for index in 0..frames {
            words.push(record_address((index + 1) % frames));
            words.push(return_address(index));
        }
        Self { words }
    }
}

impl MemoryReader for SliceMemory
{
    fn copy_safely(&self, src: Address, dst: &mut [u8]) -> bool
    {
        let Some(offset) = src.value().checked_sub(STACK_BASE) else {
            return false;
        };
        let bytes: Vec<u8> = self.words.iter().flat_map(|word| word.to_ne_bytes()).collect();
        let Ok(start) = usize::try_from(offset) else {
            return false;
        };
        match bytes.get(start..start + dst.len()) {
            Some(source) => {
                dst.copy_from_slice(source);
                true
            }
            None => false,
        }
    }
}

fn record_address(index: usize) -> u64
{
    STACK_BASE + 16 * index as u64
}

fn return_address(index: usize) -> u64
{
    0x1000_0000 + 4 * index as u64
}

fn registers() -> RegisterState
{
    RegisterState::from_frame(PC, STACK_BASE, 0)
}

#[test]
fn test_walks_whole_chain()
{
    let mut cursor = StackCursor::with_memory(SliceMemory::chain(5), &registers(), DEFAULT_MAX_DEPTH);

    let mut seen = Vec::new();
    while cursor.advance() {
        seen.push(cursor.address().value());
    }

    let mut expected = vec![PC];
    expected.extend((0..5).map(return_address));
    assert_eq!(seen, expected);
    assert_eq!(cursor.depth(), 6);
    assert!(!cursor.has_given_up());
    assert!(!cursor.advance());
}

#[test]
fn test_link_register_follows_pc()
{
    let registers = RegisterState::from_frame(PC, STACK_BASE, 0x2222);
    let mut cursor = StackCursor::with_memory(SliceMemory::chain(1), &registers, DEFAULT_MAX_DEPTH);
    let mut out = [0u64; 8];
    assert_eq!(cursor.collect_into(&mut out), 3);
    assert_eq!(&out[..3], &[PC, 0x2222, return_address(0)]);
}

#[test]
fn test_unreadable_record_ends_walk()
{
    let registers = RegisterState::from_frame(PC, 0x10, 0);
    let mut cursor = StackCursor::with_memory(SliceMemory::chain(3), &registers, DEFAULT_MAX_DEPTH);
    assert!(cursor.advance());
    assert_eq!(cursor.address().value(), PC);
    assert!(!cursor.advance());
    assert!(!cursor.has_given_up());
}

#[test]
fn test_cycle_gives_up_at_max_depth()
{
    let mut cursor = StackCursor::with_memory(SliceMemory::cycle(4), &registers(), 37);
    let mut out = [0u64; 64];
    assert_eq!(cursor.collect_into(&mut out), 37);
    assert_eq!(cursor.depth(), 37);
    assert!(cursor.has_given_up());
}

#[test]
fn test_self_linked_record_is_reported_once()
{
    let mut cursor = StackCursor::with_memory(SliceMemory::cycle(1), &registers(), DEFAULT_MAX_DEPTH);
    let mut out = [0u64; 8];
    assert_eq!(cursor.collect_into(&mut out), 2);
    assert_eq!(&out[..2], &[PC, return_address(0)]);
    assert!(!cursor.has_given_up());
}

#[test]
fn test_collect_into_keeps_walking_past_capacity()
{
    let mut cursor = StackCursor::with_memory(SliceMemory::cycle(2), &registers(), 20);
    let mut out = [0u64; 4];
    assert_eq!(cursor.collect_into(&mut out), 4);
    assert_eq!(cursor.depth(), 20);
    assert!(cursor.has_given_up());
}

#[test]
fn test_reset_replays_same_addresses()
{
    let mut cursor = StackCursor::with_memory(SliceMemory::chain(3), &registers(), DEFAULT_MAX_DEPTH);
    let mut first = [0u64; 8];
    let count = cursor.collect_into(&mut first);

    cursor.reset();
    assert_eq!(cursor.depth(), 0);
    let mut second = [0u64; 8];
    assert_eq!(cursor.collect_into(&mut second), count);
    assert_eq!(first, second);
}

#[test]
fn test_overflow_detection()
{
    let looping = StackCursor::with_memory(SliceMemory::cycle(3), &registers(), STACK_OVERFLOW_THRESHOLD);
    assert!(detect_stack_overflow(looping));

    let shallow = StackCursor::with_memory(SliceMemory::chain(10), &registers(), STACK_OVERFLOW_THRESHOLD);
    assert!(!detect_stack_overflow(shallow));
}
