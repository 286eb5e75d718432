//! Bootstrap RNG.
//!
//! Covers the window between process start and the activation of the
//! primary DRNG. Not much entropy exists yet in that window, so no proven
//! DRNG construction is warranted either: the generator folds whatever is
//! around (hardware RNG words, raw timestamps, one jitter sample and the
//! live entropy pool) through the backend's compression function and
//! never claims a calibrated entropy value for the result.
//!
//! Reading the pool here influences the output without consuming or
//! degrading the pool's own accounting. Once the primary DRNG is
//! activated this generator is retired for good and its state wiped.

use zeroize::Zeroize;

use crate::pool::EntropyPool;
use crate::sources::{arch, jitter::JitterSource, timer};

/// Mix-state width: two compression blocks' worth of workspace.
const MIX_STATE_BYTES: usize = 64;

pub(crate) struct BootstrapRng {
    mix_state: [u8; MIX_STATE_BYTES],
    bytes_delivered: u64,
    jitter_folded: bool,
}

impl BootstrapRng {
    pub(crate) fn new() -> Self {
        Self {
            mix_state: [0u8; MIX_STATE_BYTES],
            bytes_delivered: 0,
            jitter_folded: false,
        }
    }

    /// Fills `outbuf` with best-effort boot-time randomness.
    pub(crate) fn generate(&mut self, pool: &EntropyPool, outbuf: &mut [u8]) {
        if !self.jitter_folded {
            self.jitter_folded = true;
            let mut sample = [0u8; 16];
            if JitterSource::new().fill(&mut sample).is_ok() {
                for (state, byte) in self.mix_state.iter_mut().zip(sample.iter()) {
                    *state ^= byte;
                }
            }
            sample.zeroize();
        }

        let mut produced = 0;
        while produced < outbuf.len() {
            // Fold in hardware RNG words where present, and the timestamp
            // always.
            for chunk in self.mix_state.chunks_exact_mut(8) {
                if let Some(word) = arch::random_u64() {
                    for (state, byte) in chunk.iter_mut().zip(word.to_le_bytes()) {
                        *state ^= byte;
                    }
                }
                for (state, byte) in chunk.iter_mut().zip(timer::timestamp().to_le_bytes()) {
                    *state ^= byte;
                }
            }

            // Compress the mix state together with the whole live pool.
            let mut hasher = blake3::Hasher::new();
            hasher.update(&self.mix_state);
            let mut pool_copy = pool.snapshot();
            hasher.update(&pool_copy);
            pool_copy.zeroize();
            let digest = hasher.finalize();
            let digest_bytes = digest.as_bytes();

            // Feed the digest back so observing output does not reveal the
            // state that produced it.
            for (state, byte) in self.mix_state.iter_mut().zip(digest_bytes.iter()) {
                *state ^= byte;
            }

            let todo = (outbuf.len() - produced).min(digest_bytes.len());
            outbuf[produced..produced + todo].copy_from_slice(&digest_bytes[..todo]);
            produced += todo;
        }
        self.bytes_delivered += outbuf.len() as u64;
    }

    pub(crate) fn bytes_delivered(&self) -> u64 {
        self.bytes_delivered
    }

    /// The raw mix state, injected with zero entropy credit into the
    /// primary DRNG at activation. Zero credit because the event data it
    /// absorbed is the same data the pool will be credited for later.
    pub(crate) fn state_bytes(&self) -> &[u8; MIX_STATE_BYTES] {
        &self.mix_state
    }

    /// Retires the generator.
    pub(crate) fn wipe(&mut self) {
        self.mix_state.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_fills_any_length() {
        let pool = EntropyPool::new();
        let mut rng = BootstrapRng::new();

        let mut small = [0u8; 5];
        rng.generate(&pool, &mut small);
        let mut large = vec![0u8; 1024];
        rng.generate(&pool, &mut large);

        assert_eq!(rng.bytes_delivered(), 5 + 1024);
        assert!(large.iter().any(|&b| b != 0));
    }

    #[test]
    fn test_consecutive_outputs_differ() {
        let pool = EntropyPool::new();
        let mut rng = BootstrapRng::new();
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        rng.generate(&pool, &mut a);
        rng.generate(&pool, &mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_pool_contents_influence_output() {
        let pool_a = EntropyPool::new();
        let pool_b = EntropyPool::new();
        pool_b.mix_bytes(b"divergent device data");

        // Identical zero states; only the pools differ. With jitter and
        // timestamps folded in, outputs differ anyway, so compare the
        // deterministic part: hash of state || pool.
        let mut hasher_a = blake3::Hasher::new();
        hasher_a.update(&[0u8; MIX_STATE_BYTES]);
        hasher_a.update(&pool_a.snapshot());
        let mut hasher_b = blake3::Hasher::new();
        hasher_b.update(&[0u8; MIX_STATE_BYTES]);
        hasher_b.update(&pool_b.snapshot());
        assert_ne!(hasher_a.finalize(), hasher_b.finalize());
    }

    #[test]
    fn test_wipe_clears_state() {
        let pool = EntropyPool::new();
        let mut rng = BootstrapRng::new();
        let mut out = [0u8; 64];
        rng.generate(&pool, &mut out);
        rng.wipe();
        assert_eq!(rng.state_bytes(), &[0u8; MIX_STATE_BYTES]);
    }
}
