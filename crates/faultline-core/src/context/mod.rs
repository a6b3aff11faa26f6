//! # Machine Context
//!
//! Snapshot of one thread's registers plus the list of every thread in the
//! process, captured either from a fault or for an arbitrary thread.
//!
//! ## Ownership
//!
//! A [`MachineContext`] is a plain value the caller owns, usually on the
//! stack of the signal handler. Capture functions overwrite it in place and
//! never allocate.
//!
//! ## Register legality
//!
//! A running thread cannot meaningfully read its own registers. The
//! registers of the calling thread are therefore only available when they
//! come from a fault context (the `ucontext` handed to a signal handler).
//! [`MachineContext::can_have_cpu_state`] encodes that rule.
//!
//! ## Stack overflow
//!
//! For crashed contexts a stack cursor is advanced up to
//! [`STACK_OVERFLOW_THRESHOLD`] frames. If it gives up, the stack is
//! considered overflowed.

mod registers;
mod threads;

pub use registers::RegisterState;
pub use threads::{
    is_reserved, reserve_thread, reserved_thread_count, resume_environment, suspend_environment, SuspendedThreads,
    MAX_RESERVED_THREADS, MAX_SUSPENDED_THREADS,
};

use crate::log::LogLevel;
use crate::memory::MemoryReader;
use crate::platform;
use crate::safe_log;
use crate::types::ThreadId;
use crate::unwind::StackCursor;

/// Capacity of the thread list in a [`MachineContext`]
pub const MAX_CAPTURED_THREADS: usize = 100;

/// Frame count past which a crashed stack is flagged as overflowed
pub const STACK_OVERFLOW_THRESHOLD: usize = 150;

/// Registers and thread list of one capture
#[derive(Debug, Clone, Copy)]
pub struct MachineContext
{
    registers: RegisterState,
    this_thread: ThreadId,
    all_threads: [ThreadId; MAX_CAPTURED_THREADS],
    thread_count: usize,
    is_crashed_context: bool,
    is_signal_context: bool,
    is_current_thread: bool,
    is_stack_overflow: bool,
}

impl MachineContext
{
    /// Empty context, ready to be filled by a capture function
    pub const fn new() -> Self
    {
        Self {
            registers: RegisterState {
                pc: 0,
                sp: 0,
                fp: 0,
                lr: 0,
                gpr: [0; 32],
                gpr_count: 0,
            },
            this_thread: ThreadId::NULL,
            all_threads: [ThreadId::NULL; MAX_CAPTURED_THREADS],
            thread_count: 0,
            is_crashed_context: false,
            is_signal_context: false,
            is_current_thread: false,
            is_stack_overflow: false,
        }
    }

    pub fn registers(&self) -> &RegisterState
    {
        &self.registers
    }

    /// The thread this context describes
    pub fn thread(&self) -> ThreadId
    {
        self.this_thread
    }

    pub fn is_crashed_context(&self) -> bool
    {
        self.is_crashed_context
    }

    pub fn is_signal_context(&self) -> bool
    {
        self.is_signal_context
    }

    pub fn is_current_thread(&self) -> bool
    {
        self.is_current_thread
    }

    pub fn is_stack_overflow(&self) -> bool
    {
        self.is_stack_overflow
    }

    /// Whether registers may have been captured for this context
    ///
    /// False for the calling thread outside a fault context.
    pub fn can_have_cpu_state(&self) -> bool
    {
        !self.is_current_thread || self.is_signal_context
    }

    /// Whether the registers describe the fault itself
    pub fn has_valid_exception_registers(&self) -> bool
    {
        self.can_have_cpu_state() && self.is_crashed_context
    }

    /// Number of threads recorded (at most [`MAX_CAPTURED_THREADS`])
    pub fn thread_count(&self) -> usize
    {
        self.thread_count
    }

    pub fn thread_at(&self, index: usize) -> Option<ThreadId>
    {
        self.threads().get(index).copied()
    }

    pub fn index_of_thread(&self, thread: ThreadId) -> Option<usize>
    {
        self.threads().iter().position(|&candidate| candidate == thread)
    }

    pub fn threads(&self) -> &[ThreadId]
    {
        &self.all_threads[..self.thread_count]
    }

    /// Stack cursor starting at this context's registers
    pub fn stack_cursor(&self, max_depth: usize) -> StackCursor
    {
        StackCursor::from_registers(&self.registers, max_depth)
    }

    fn reset(&mut self, thread: ThreadId)
    {
        *self = Self::new();
        self.this_thread = thread;
    }

    /// Record every thread, keeping the crashed one if the list overflows
    fn record_threads(&mut self)
    {
        let crashed = self.this_thread;
        let mut count = 0;
        let mut total = 0;
        let mut kept_crashed = false;
        let slots = &mut self.all_threads;
        let result = platform::for_each_thread(|thread| {
            total += 1;
            if count < MAX_CAPTURED_THREADS {
                slots[count] = thread;
                count += 1;
                kept_crashed |= thread == crashed;
            }
        });

        match result {
            Ok(_) => {
                if total > MAX_CAPTURED_THREADS {
                    safe_log!(LogLevel::Warn, "{} threads exceed capacity {}; list truncated", total, MAX_CAPTURED_THREADS);
                    if !kept_crashed && !crashed.is_null() {
                        slots[MAX_CAPTURED_THREADS - 1] = crashed;
                    }
                }
                self.thread_count = count;
            }
            Err(error) => {
                safe_log!(LogLevel::Error, "could not enumerate threads: {}", error.fault_display());
                self.all_threads[0] = crashed;
                self.thread_count = usize::from(!crashed.is_null());
            }
        }
    }

    fn finish_crashed_capture(&mut self)
    {
        self.is_stack_overflow = detect_stack_overflow(StackCursor::from_registers(&self.registers, STACK_OVERFLOW_THRESHOLD));
        self.record_threads();
    }
}

impl Default for MachineContext
{
    fn default() -> Self
    {
        Self::new()
    }
}

/// Whether a cursor runs into its depth limit
pub fn detect_stack_overflow<M: MemoryReader>(mut cursor: StackCursor<M>) -> bool
{
    while cursor.advance() {}
    cursor.has_given_up()
}

/// Capture the context of `thread`
///
/// Registers are read only when legal (see
/// [`MachineContext::can_have_cpu_state`]). A crashed context also gets
/// stack-overflow detection and the process thread list.
pub fn capture_for_thread(thread: ThreadId, is_crashed: bool, context: &mut MachineContext)
{
    context.reset(thread);
    context.is_current_thread = thread == platform::current_thread();
    context.is_crashed_context = is_crashed;

    if context.can_have_cpu_state() && !platform::read_thread_registers(thread, &mut context.registers) {
        safe_log!(LogLevel::Warn, "no register state for thread {}", thread);
    }
    if is_crashed {
        context.finish_crashed_capture();
    }
}

/// Capture the faulting thread from the context a signal handler received
///
/// # Safety
///
/// `ucontext` must be the third argument of an `SA_SIGINFO` handler running
/// on the current thread.
pub unsafe fn capture_for_signal(ucontext: *const libc::c_void, context: &mut MachineContext)
{
    context.reset(platform::current_thread());
    context.is_current_thread = true;
    context.is_crashed_context = true;
    context.is_signal_context = true;

    if !platform::registers_from_ucontext(ucontext, &mut context.registers) {
        safe_log!(LogLevel::Error, "signal context carried no registers");
    }
    context.finish_crashed_capture();
}

/// Capture a crashed context from registers obtained elsewhere
///
/// Treated like a fault context: the registers are trusted even for the
/// calling thread.
pub fn capture_for_registers(thread: ThreadId, registers: &RegisterState, context: &mut MachineContext)
{
    context.reset(thread);
    context.is_current_thread = thread == platform::current_thread();
    context.is_crashed_context = true;
    context.is_signal_context = true;
    context.registers = *registers;
    context.finish_crashed_capture();
}
