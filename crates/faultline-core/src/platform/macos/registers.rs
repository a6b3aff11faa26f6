//! # macOS Register Decoding
//!
//! Both `thread_get_state()` and a signal's `ucontext` expose the same thread
//! state layout: an array of `natural_t` (`u32`) words where each 64-bit
//! register occupies two consecutive words, low half first.
//!
//! - **ARM64** (`ARM_THREAD_STATE64`, 68 words): x0-x28, fp, lr, sp, pc, cpsr
//! - **x86-64** (`x86_THREAD_STATE64`, 42 words): rax, rbx, rcx, rdx, rdi,
//!   rsi, rbp, rsp, r8-r15, rip, rflags, cs, fs, gs
//!
//! In a `ucontext`, `uc_mcontext` points at an `__darwin_mcontext64` whose
//! first member is a 16-byte exception state, followed by that same thread
//! state.
//!
//! ## References
//!
//! - [ARM_THREAD_STATE64 structure](https://opensource.apple.com/source/xnu/xnu-4570.71.2/osfmk/mach/arm/_structs.h)
//! - [x86_THREAD_STATE64 structure](https://opensource.apple.com/source/xnu/xnu-4570.71.2/osfmk/mach/i386/_structs.h)

use libc::natural_t;

use super::ffi;
use crate::context::RegisterState;

/// Size of `__darwin_arm_exception_state64` / `__darwin_x86_exception_state64`
const EXCEPTION_STATE_SIZE: usize = 16;

#[cfg(target_arch = "aarch64")]
const STATE_WORDS: usize = ffi::ARM_THREAD_STATE64_COUNT as usize;
#[cfg(target_arch = "x86_64")]
const STATE_WORDS: usize = ffi::X86_THREAD_STATE64_COUNT as usize;

/// Fill `out` from a raw thread-state word array
pub(crate) fn decode_thread_state(words: &[natural_t], out: &mut RegisterState)
{
    let reg = |index: usize| -> u64 {
        match (words.get(index * 2), words.get(index * 2 + 1)) {
            (Some(&low), Some(&high)) => u64::from(low) | (u64::from(high) << 32),
            _ => 0,
        }
    };

    *out = RegisterState::default();

    #[cfg(target_arch = "aarch64")]
    {
        for (index, slot) in out.gpr.iter_mut().take(31).enumerate() {
            *slot = reg(index);
        }
        out.gpr_count = 31;
        out.fp = reg(29);
        out.lr = reg(30);
        out.sp = reg(31);
        out.pc = reg(32);
    }

    #[cfg(target_arch = "x86_64")]
    {
        for (index, slot) in out.gpr.iter_mut().take(21).enumerate() {
            *slot = reg(index);
        }
        out.gpr_count = 21;
        out.fp = reg(6);
        out.sp = reg(7);
        out.pc = reg(16);
    }
}

/// Fill `out` from the `ucontext_t` a signal handler received
///
/// # Safety
///
/// `ucontext` must be the third argument of an `SA_SIGINFO` handler.
pub(crate) unsafe fn registers_from_ucontext(ucontext: *const libc::c_void, out: &mut RegisterState) -> bool
{
    if ucontext.is_null() {
        return false;
    }
    let uc = ucontext.cast::<libc::ucontext_t>();
    let mcontext = (*uc).uc_mcontext as *const u8;
    if mcontext.is_null() {
        return false;
    }
    let state = mcontext.add(EXCEPTION_STATE_SIZE).cast::<[natural_t; STATE_WORDS]>();
    decode_thread_state(&std::ptr::read_unaligned(state), out);
    true
}

/// Address that caused the fault, if the signal carries one
pub(crate) fn fault_address(info: &libc::siginfo_t) -> usize
{
    info.si_addr as usize
}
