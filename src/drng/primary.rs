//! Primary DRNG.
//!
//! The single strongly-seeded generator at the top of the hierarchy. It is
//! the only consumer of the entropy pool, tracks how much unconsumed
//! entropy its state holds, and is the authority for the seeding stage the
//! whole subsystem keys off.
//!
//! Seeding and generation are paired under one lock: a high-assurance read
//! that requests output together with an injection is guaranteed keystream
//! from a state no other caller has observed.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Mutex;

use crate::backend::{BackendError, ChaChaDrng};
use crate::config::{MIN_SEED_BITS, SECURITY_STRENGTH_BITS, SECURITY_STRENGTH_BYTES};
use crate::util::lock;

use super::SeedStage;

pub(crate) struct PrimaryDrng {
    drng: Mutex<ChaChaDrng>,
    /// Current [`SeedStage`], advanced only forward.
    stage: AtomicU8,
    /// Unconsumed entropy estimate in bits, capped at the security
    /// strength. Written only under the `drng` lock; read lock-free by
    /// wakeup predicates.
    entropy_bits: AtomicU32,
}

impl PrimaryDrng {
    pub(crate) fn new() -> Result<Self, BackendError> {
        Ok(Self {
            drng: Mutex::new(ChaChaDrng::new(SECURITY_STRENGTH_BYTES)?),
            stage: AtomicU8::new(SeedStage::Unseeded as u8),
            entropy_bits: AtomicU32::new(0),
        })
    }

    pub(crate) fn stage(&self) -> SeedStage {
        SeedStage::from_u8(self.stage.load(Ordering::Acquire))
    }

    pub(crate) fn entropy_bits(&self) -> u32 {
        self.entropy_bits.load(Ordering::Relaxed)
    }

    /// Test hook for exercising the entropy-capped read path.
    #[cfg(test)]
    pub(crate) fn set_entropy_bits(&self, bits: u32) {
        self.entropy_bits.store(bits, Ordering::Relaxed);
    }

    /// Advances the stage variable to `target` if that is a forward move.
    /// Returns the previous stage when the transition happened. The
    /// compare-and-swap loop structurally rules out backward transitions
    /// no matter how callers race.
    fn advance_stage(&self, target: SeedStage) -> Option<SeedStage> {
        let mut current = self.stage.load(Ordering::Acquire);
        loop {
            if current >= target as u8 {
                return None;
            }
            match self.stage.compare_exchange_weak(
                current,
                target as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(previous) => return Some(SeedStage::from_u8(previous)),
                Err(observed) => current = observed,
            }
        }
    }

    fn stage_for_bits(entropy_bits: u32) -> SeedStage {
        if entropy_bits >= SECURITY_STRENGTH_BITS {
            SeedStage::FullySeeded
        } else if entropy_bits >= MIN_SEED_BITS {
            SeedStage::MinSeeded
        } else if entropy_bits >= crate::config::INIT_SEED_BITS {
            SeedStage::InitSeeded
        } else {
            SeedStage::Unseeded
        }
    }

    /// Injects seed material with a claimed entropy value, optionally
    /// generating output from the freshly seeded state in the same
    /// critical section.
    ///
    /// The entropy claim is silently capped at the data length. A seed
    /// failure leaves the entropy accounting untouched. On success the
    /// return carries the generated byte count (0 without an output
    /// request) and the stage transition, if this injection caused one,
    /// as `(from, to)`.
    pub(crate) fn inject(
        &self,
        inbuf: &[u8],
        entropy_bits: u32,
        outbuf: Option<&mut [u8]>,
        fullentropy: bool,
    ) -> Result<(usize, Option<(SeedStage, SeedStage)>), BackendError> {
        let entropy_bits = entropy_bits.min((inbuf.len() as u32).saturating_mul(8));

        let mut drng = lock(&self.drng);
        if let Err(err) = drng.seed(inbuf) {
            log::warn!("(re)seeding of primary DRNG failed: {err}");
            return Err(BackendError::Seed);
        }
        log::debug!(
            "injected {} bytes with {} bits of entropy into primary DRNG",
            inbuf.len(),
            entropy_bits
        );

        let new_bits = self
            .entropy_bits
            .load(Ordering::Relaxed)
            .saturating_add(entropy_bits)
            .min(SECURITY_STRENGTH_BITS);
        self.entropy_bits.store(new_bits, Ordering::Relaxed);

        let transition = self.advance_stage(Self::stage_for_bits(new_bits)).map(|from| {
            let to = self.stage();
            match to {
                SeedStage::FullySeeded => {
                    log::info!("primary DRNG fully seeded with {new_bits} bits of entropy")
                }
                SeedStage::MinSeeded => {
                    log::info!("primary DRNG minimally seeded with {new_bits} bits of entropy")
                }
                SeedStage::InitSeeded => {
                    log::info!("primary DRNG initially seeded with {new_bits} bits of entropy")
                }
                SeedStage::Unseeded => {}
            }
            (from, to)
        });

        let written = match outbuf {
            Some(out) => self.generate_locked(&mut drng, out, fullentropy)?,
            None => 0,
        };
        Ok((written, transition))
    }

    /// Generates output, debiting the entropy estimate by the bits served.
    ///
    /// With `fullentropy` set, nothing is produced before the fully-seeded
    /// stage; callers treat the zero-byte result as "try again later". The
    /// output is otherwise capped at the tracked entropy, except below the
    /// minimally-seeded stage where a small fixed allowance lets the first
    /// secondary seed happen at all.
    pub(crate) fn generate(
        &self,
        outbuf: &mut [u8],
        fullentropy: bool,
    ) -> Result<usize, BackendError> {
        let mut drng = lock(&self.drng);
        self.generate_locked(&mut drng, outbuf, fullentropy)
    }

    fn generate_locked(
        &self,
        drng: &mut ChaChaDrng,
        outbuf: &mut [u8],
        fullentropy: bool,
    ) -> Result<usize, BackendError> {
        let stage = self.stage();
        if fullentropy && stage < SeedStage::FullySeeded {
            return Ok(0);
        }

        let have_bits = self.entropy_bits.load(Ordering::Relaxed);
        let cap_bytes = if stage >= SeedStage::MinSeeded {
            (have_bits / 8) as usize
        } else {
            (MIN_SEED_BITS / 8) as usize
        };
        let todo = outbuf.len().min(cap_bytes);
        if todo == 0 {
            return Ok(0);
        }

        match drng.generate_full_entropy(&mut outbuf[..todo]) {
            Ok(written) => {
                self.entropy_bits.store(
                    have_bits.saturating_sub((written as u32).saturating_mul(8)),
                    Ordering::Relaxed,
                );
                log::debug!(
                    "obtained {written} bytes from primary DRNG, entropy level now {} bits",
                    self.entropy_bits.load(Ordering::Relaxed)
                );
                Ok(written)
            }
            Err(err) => {
                log::warn!("getting random data from primary DRNG failed: {err}");
                Err(err)
            }
        }
    }
}
