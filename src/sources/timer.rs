//! Event timestamping.
//!
//! Uses the cycle counter where one exists (`rdtsc` on x86, `cntvct_el0`
//! on aarch64) and falls back to the monotonic clock elsewhere. The
//! resolution probe at subsystem start decides whether the stuck test can
//! be trusted and which entropy calibration applies.

use std::sync::OnceLock;
use std::time::Instant;

fn epoch() -> &'static Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now)
}

/// High-resolution timestamp. The absolute value is meaningless; only
/// differences between consecutive calls carry information.
#[inline(always)]
pub(crate) fn timestamp() -> u64 {
    #[cfg(target_arch = "x86")]
    {
        unsafe { core::arch::x86::_rdtsc() }
    }

    #[cfg(target_arch = "x86_64")]
    {
        unsafe { core::arch::x86_64::_rdtsc() }
    }

    #[cfg(target_arch = "aarch64")]
    {
        let mut cnt: u64;
        unsafe {
            core::arch::asm!("mrs {}, cntvct_el0", out(reg) cnt);
        }
        cnt
    }

    #[cfg(not(any(
        target_arch = "x86",
        target_arch = "x86_64",
        target_arch = "aarch64"
    )))]
    {
        epoch().elapsed().as_nanos() as u64
    }
}

/// Truncated timestamp for pool mixing: the low bits are where the jitter
/// lives.
#[inline(always)]
pub(crate) fn timestamp_u32() -> u32 {
    timestamp() as u32
}

/// Coarse seconds since subsystem start, for reseed interval bookkeeping.
pub(crate) fn coarse_secs() -> u64 {
    epoch().elapsed().as_secs()
}

/// Probes whether the timestamp source actually resolves. Two zero reads
/// in a row mean the counter is dead and events must be treated as
/// low-resolution.
pub(crate) fn have_highres_timer() -> bool {
    timestamp_u32() != 0 || timestamp_u32() != 0
}
