//! Backtrace of the calling thread
//!
//! Used by the paths that report from ordinary code (user reports, panics),
//! where no fault context exists. The frame pointer is read with inline
//! assembly and the chain of frame records is followed up the stack.
//!
//! Requires frame pointers; the workspace builds with
//! `-C force-frame-pointers=yes`.

use std::arch::asm;

use super::read_frame_record;
use crate::memory::LiveMemory;

#[inline(always)]
fn frame_pointer() -> u64
{
    let fp: u64;
    // SAFETY: copies the frame pointer register, touches no memory.
    unsafe {
        #[cfg(target_arch = "aarch64")]
        asm!("mov {fp}, x29", fp = out(reg) fp, options(nomem, nostack, preserves_flags));
        #[cfg(target_arch = "x86_64")]
        asm!("mov {fp}, rbp", fp = out(reg) fp, options(nomem, nostack, preserves_flags));
    }
    fp
}

/// Fill `out` with return addresses of the calling thread
///
/// The first address belongs to the caller of this function; `skip` drops
/// that many more before recording starts. Returns the number written.
#[inline(never)]
pub fn capture_current_thread(skip: usize, out: &mut [u64]) -> usize
{
    let mut fp = frame_pointer();
    let mut skipped = 0;
    let mut count = 0;
    while count < out.len() {
        let Some((previous, return_address)) = read_frame_record(&LiveMemory, fp) else {
            break;
        };
        if return_address == 0 {
            break;
        }
        if skipped < skip {
            skipped += 1;
        } else {
            out[count] = return_address;
            count += 1;
        }
        // The live stack grows down, so callers always sit at higher addresses.
        if previous <= fp {
            break;
        }
        fp = previous;
    }
    count
}
