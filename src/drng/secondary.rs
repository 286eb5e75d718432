//! Secondary DRNGs.
//!
//! One instance per locality domain serves the bulk output stream. Each
//! instance is reseeded from the primary DRNG when its request budget runs
//! out, when its reseed interval expires, or when a reseed is forced by an
//! administrative write. Until an instance has accumulated a full security
//! strength of internally sourced seed material, callers are routed to the
//! default instance 0 instead.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::backend::{BackendError, ChaChaDrng};
use crate::config::{DRNG_RESEED_THRESHOLD, SECURITY_STRENGTH_BYTES};
use crate::util::lock;

pub(crate) struct SecondaryDrng {
    drng: Mutex<ChaChaDrng>,
    /// Remaining generate calls before a reseed is due. Deliberately
    /// allowed to underflow transiently when a reseed loses the
    /// in-progress race under parallel load; the next successful reseed
    /// rewrites it.
    requests: AtomicI32,
    /// Coarse seconds at the last successful internal reseed.
    last_seeded_secs: AtomicU64,
    /// Cumulative internally sourced seed bytes.
    seeded_bytes: AtomicU32,
    fully_seeded: AtomicBool,
    force_reseed: AtomicBool,
}

impl SecondaryDrng {
    pub(crate) fn new(now_secs: u64) -> Result<Self, BackendError> {
        Ok(Self {
            drng: Mutex::new(ChaChaDrng::new(SECURITY_STRENGTH_BYTES)?),
            requests: AtomicI32::new(1),
            last_seeded_secs: AtomicU64::new(now_secs),
            seeded_bytes: AtomicU32::new(0),
            fully_seeded: AtomicBool::new(false),
            force_reseed: AtomicBool::new(false),
        })
    }

    pub(crate) fn is_fully_seeded(&self) -> bool {
        self.fully_seeded.load(Ordering::Acquire)
    }

    pub(crate) fn set_force_reseed(&self) {
        self.force_reseed.store(true, Ordering::Relaxed);
    }

    /// Decides whether the next chunk needs a reseed first. Consumes one
    /// unit of the request budget unless a forced reseed short-circuits
    /// the check.
    pub(crate) fn should_reseed(&self, now_secs: u64, max_secs: u64) -> bool {
        if self.force_reseed.swap(false, Ordering::Relaxed) {
            return true;
        }
        if self.requests.fetch_sub(1, Ordering::Relaxed) == 1 {
            return true;
        }
        max_secs == 0
            || now_secs > self.last_seeded_secs.load(Ordering::Relaxed).saturating_add(max_secs)
    }

    /// Schedules an early retry after a failed reseed.
    pub(crate) fn retry_reseed_soon(&self) {
        self.requests.store(1, Ordering::Relaxed);
    }

    /// Pushes the next interval-based reseed out by `secs`, used to
    /// stagger the domains after boot so they do not drain the pool in
    /// lockstep.
    pub(crate) fn defer_next_reseed(&self, secs: u64) {
        self.last_seeded_secs.fetch_add(secs, Ordering::Relaxed);
    }

    /// Injects seed material into this instance.
    ///
    /// `internal` marks material that came through the primary DRNG from
    /// the noise sources. Only internal material restores the request
    /// budget and the reseed timer, so an unprivileged writer cannot stop
    /// this instance from being reseeded with entropic data, and only
    /// internal bytes count towards the full-seed mark.
    pub(crate) fn inject(&self, inbuf: &[u8], now_secs: u64, internal: bool) {
        log::debug!("seeding secondary DRNG with {} bytes", inbuf.len());
        let mut drng = lock(&self.drng);
        if let Err(err) = drng.seed(inbuf) {
            log::warn!("seeding of secondary DRNG failed: {err}");
            self.requests.store(1, Ordering::Relaxed);
            return;
        }
        if internal {
            log::debug!(
                "secondary DRNG stats since last seeding: {} secs; generate calls: {}",
                now_secs.saturating_sub(self.last_seeded_secs.load(Ordering::Relaxed)),
                DRNG_RESEED_THRESHOLD - self.requests.load(Ordering::Relaxed)
            );
            self.last_seeded_secs.store(now_secs, Ordering::Relaxed);
            self.requests.store(DRNG_RESEED_THRESHOLD, Ordering::Relaxed);

            let total = self
                .seeded_bytes
                .load(Ordering::Relaxed)
                .saturating_add(inbuf.len() as u32);
            self.seeded_bytes.store(total, Ordering::Relaxed);
            if total >= SECURITY_STRENGTH_BYTES as u32 {
                self.fully_seeded.store(true, Ordering::Release);
            }
        }
    }

    /// Generates one chunk under this instance's own lock.
    pub(crate) fn generate(&self, outbuf: &mut [u8]) -> Result<usize, BackendError> {
        let mut drng = lock(&self.drng);
        drng.generate(outbuf)
    }
}
