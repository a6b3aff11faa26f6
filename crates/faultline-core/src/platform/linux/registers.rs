//! # Linux Register Decoding
//!
//! Register state comes from the `ucontext_t` passed to an `SA_SIGINFO`
//! handler.
//!
//! - **x86-64**: `uc_mcontext.gregs`, indexed by the `REG_*` constants
//! - **AArch64**: `uc_mcontext.regs[0..31]`, `sp` and `pc`; x29 is the frame
//!   pointer and x30 the link register

use crate::context::RegisterState;

/// Fill `out` from the `ucontext_t` a signal handler received
///
/// # Safety
///
/// `ucontext` must be the third argument of an `SA_SIGINFO` handler.
#[allow(clippy::cast_sign_loss)]
pub(crate) unsafe fn registers_from_ucontext(ucontext: *const libc::c_void, out: &mut RegisterState) -> bool
{
    if ucontext.is_null() {
        return false;
    }
    let uc = &*ucontext.cast::<libc::ucontext_t>();
    *out = RegisterState::default();

    #[cfg(target_arch = "x86_64")]
    {
        let gregs = &uc.uc_mcontext.gregs;
        for (slot, value) in out.gpr.iter_mut().zip(gregs.iter()) {
            *slot = *value as u64;
        }
        out.gpr_count = gregs.len().min(out.gpr.len());
        out.pc = gregs[libc::REG_RIP as usize] as u64;
        out.fp = gregs[libc::REG_RBP as usize] as u64;
        out.sp = gregs[libc::REG_RSP as usize] as u64;
    }

    #[cfg(target_arch = "aarch64")]
    {
        let mcontext = &uc.uc_mcontext;
        out.gpr[..31].copy_from_slice(&mcontext.regs);
        out.gpr_count = 31;
        out.fp = mcontext.regs[29];
        out.lr = mcontext.regs[30];
        out.sp = mcontext.sp;
        out.pc = mcontext.pc;
    }

    true
}

/// Address that caused the fault, if the signal carries one
pub(crate) fn fault_address(info: &libc::siginfo_t) -> usize
{
    // SAFETY: si_addr is meaningful for fault signals and zero otherwise.
    unsafe { info.si_addr() as usize }
}
