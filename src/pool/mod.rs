//! Entropy pool.
//!
//! A 128-word ring buffer mixed as a (modified) twisted generalized
//! feedback shift register (Matsumoto & Kurita, 1992/1994). Raw noise words
//! are injected lock-free from any number of concurrent event contexts;
//! output leaves the pool only through [`EntropyPool::drain`], which
//! compresses the whole pool through the keyed backend digest and feeds
//! every digest back in before releasing it, so observed output never
//! reveals a future pool state.

pub mod collector;

use std::sync::atomic::{AtomicU32, Ordering};

use zeroize::Zeroize;

use crate::backend::PoolHash;
use crate::config::{SECURITY_STRENGTH_BITS, SECURITY_STRENGTH_BYTES};

use collector::CollectorState;

/// Pool size in words. Must stay in sync with the LFSR polynomial below;
/// the power-of-two size allows masking instead of modulo on the hot path.
pub(crate) const POOL_WORDS: usize = 128;
pub(crate) const POOL_WORD_BYTES: usize = 4;
pub(crate) const POOL_SIZE_BYTES: usize = POOL_WORDS * POOL_WORD_BYTES;
pub(crate) const POOL_SIZE_BITS: u32 = (POOL_SIZE_BYTES * 8) as u32;
pub(crate) const POOL_WORD_BITS: u32 = (POOL_WORD_BYTES * 8) as u32;

/// Taps of a primitive, irreducible polynomial for a 128-word LFSR
/// (Stahnke, "Primitive Binary Polynomials", 1993). The values are one
/// less than the published polynomial because they index an array.
const LFSR_TAPS: [usize; 4] = [127, 28, 26, 1];

/// Cursor stride between successive insertions. A prime stride visits all
/// words evenly and keeps consecutive insertions away from each other's
/// tap positions, whose raw offsets are close together.
const CURSOR_STRIDE: u32 = 67;

/// Twist table for the non-linear feedback step.
const TWIST_TABLE: [u32; 8] = [
    0x00000000, 0x3b6e20c8, 0x76dc4190, 0x4db26158,
    0xedb88320, 0xd6d6a3e8, 0x9b64c2b0, 0xa00ae278,
];

/// LFSR-mixed entropy pool.
///
/// All fields are individually atomic: the mixing path performs no locking
/// and never waits, because it runs inside the most latency-sensitive event
/// callbacks in the process.
pub struct EntropyPool {
    words: [AtomicU32; POOL_WORDS],
    write_ptr: AtomicU32,
    input_rotate: AtomicU32,
}

impl EntropyPool {
    pub fn new() -> Self {
        Self {
            words: std::array::from_fn(|_| AtomicU32::new(0)),
            write_ptr: AtomicU32::new(0),
            input_rotate: AtomicU32::new(0),
        }
    }

    /// Raw (unmasked) insertion counter, used by the collector to pace
    /// reader wakeups.
    pub(crate) fn write_counter(&self) -> u32 {
        self.write_ptr.load(Ordering::Relaxed)
    }

    /// Hot path: inject one raw word.
    ///
    /// Advances the cursor by the fixed stride, rotates the value so
    /// repeated insertions do not align on the same bits (with an extra
    /// rotation each time the cursor wraps to slot 0, so successive passes
    /// spread input across different bit positions), XORs the polynomial
    /// taps, twists, and stores.
    pub fn mix_word(&self, value: u32) {
        let ptr = self
            .write_ptr
            .fetch_add(CURSOR_STRIDE, Ordering::Relaxed)
            .wrapping_add(CURSOR_STRIDE) as usize
            & (POOL_WORDS - 1);
        let rotate_inc = if ptr == 0 { 14 } else { 7 };
        let rotate = self
            .input_rotate
            .fetch_add(rotate_inc, Ordering::Relaxed)
            .wrapping_add(rotate_inc)
            & 31;

        let mut word = value.rotate_left(rotate);
        word ^= self.words[ptr].load(Ordering::Relaxed);
        for tap in LFSR_TAPS {
            word ^= self.words[(ptr + tap) & (POOL_WORDS - 1)].load(Ordering::Relaxed);
        }
        word = (word >> 3) ^ TWIST_TABLE[(word & 7) as usize];
        self.words[ptr].store(word, Ordering::Relaxed);
    }

    /// Injects a byte buffer word-wise, trailing bytes one at a time.
    pub fn mix_bytes(&self, buf: &[u8]) {
        let mut chunks = buf.chunks_exact(POOL_WORD_BYTES);
        for chunk in &mut chunks {
            let mut word = [0u8; POOL_WORD_BYTES];
            word.copy_from_slice(chunk);
            self.mix_word(u32::from_le_bytes(word));
        }
        for &byte in chunks.remainder() {
            self.mix_word(u32::from(byte));
        }
    }

    /// Copies the current pool contents into a flat byte buffer for
    /// digesting. The copy is a relaxed snapshot; concurrent mixing during
    /// the copy only adds data the estimator has not credited yet.
    pub(crate) fn snapshot(&self) -> [u8; POOL_SIZE_BYTES] {
        let mut out = [0u8; POOL_SIZE_BYTES];
        for (i, word) in self.words.iter().enumerate() {
            let bytes = word.load(Ordering::Relaxed).to_le_bytes();
            out[i * POOL_WORD_BYTES..(i + 1) * POOL_WORD_BYTES].copy_from_slice(&bytes);
        }
        out
    }

    /// Reads the pool out for seeding. The caller must hold the reseed
    /// guard: only one drain may run at a time.
    ///
    /// Converts the outstanding accepted-event count into an entropy
    /// estimate, caps it at the pool capacity and at `requested_bits`, and
    /// produces that many bits (rounded down to whole bytes) into `outbuf`.
    /// When `drain_all` is false the call delivers nothing unless the
    /// estimate covers the request plus the emergency reserve, so bulk
    /// consumers can never starve the high-assurance path, nor siphon the
    /// pool one brute-forceable byte at a time.
    ///
    /// Each digest block is mixed back into the pool before it is copied
    /// out. Events that arrive while the drain runs are re-credited
    /// afterwards, capped so the pool can never claim more than its
    /// capacity.
    ///
    /// Returns the entropy in bits actually delivered. A digest failure
    /// truncates the drain and reports only the bits produced before it.
    pub(crate) fn drain(
        &self,
        collector: &CollectorState,
        hash: &PoolHash,
        outbuf: &mut [u8; SECURITY_STRENGTH_BYTES],
        requested_bits: u32,
        drain_all: bool,
    ) -> u32 {
        let requested_bits = requested_bits.min(SECURITY_STRENGTH_BITS);
        let mut events = collector.take_events();
        let mut avail_bits = collector
            .events_to_entropy(events)
            .min(POOL_SIZE_BITS);

        if drain_all {
            avail_bits = avail_bits.min(requested_bits);
        } else if requested_bits + collector.emergency_reserve_bits() > avail_bits {
            avail_bits = 0;
        } else {
            avail_bits = requested_bits;
        }

        // The digest is a compression function; produce exactly the
        // estimated entropy amount of data.
        avail_bits &= !7;
        let mut avail_bytes = (avail_bits / 8) as usize;
        debug_assert!(avail_bytes <= SECURITY_STRENGTH_BYTES);

        let digestsize = hash.digest_size();
        let mut offset = 0usize;
        while offset < SECURITY_STRENGTH_BYTES && avail_bytes > 0 {
            let mut pool_copy = self.snapshot();
            match hash.digest(&pool_copy) {
                Ok(mut digest) => {
                    // Feedback before release: backtracking resistance.
                    self.mix_bytes(&digest);
                    let tocopy = avail_bytes
                        .min(digestsize)
                        .min(SECURITY_STRENGTH_BYTES - offset);
                    outbuf[offset..offset + tocopy].copy_from_slice(&digest[..tocopy]);
                    avail_bytes -= tocopy;
                    offset += digestsize;
                    digest.zeroize();
                }
                Err(err) => {
                    log::warn!("pool digest failed during drain: {err}");
                    avail_bits = (offset * 8) as u32;
                    pool_copy.zeroize();
                    break;
                }
            }
            pool_copy.zeroize();
        }

        // Events that raced in during the drain are returned to the
        // estimator, capped so the used portion is never counted twice.
        events += collector.take_events();
        let used_events = collector.entropy_to_events(avail_bits);
        let cap = collector
            .entropy_to_events(POOL_SIZE_BITS)
            .saturating_sub(used_events);
        let back = events.saturating_sub(used_events).min(cap);
        collector.add_events(back);

        log::debug!(
            "obtained {avail_bits} bits of entropy from {used_events} collected events, re-crediting {back} events"
        );
        avail_bits
    }
}

impl Default for EntropyPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PoolHash;
    use crate::config::Config;

    fn test_collector() -> CollectorState {
        CollectorState::new(&Config::default(), true)
    }

    #[test]
    fn test_mix_word_changes_pool() {
        let pool = EntropyPool::new();
        let before = pool.snapshot();
        pool.mix_word(0xDEADBEEF);
        assert_ne!(before, pool.snapshot());
    }

    #[test]
    fn test_mix_bytes_handles_trailing_partial_word() {
        let pool = EntropyPool::new();
        let before = pool.write_counter();
        pool.mix_bytes(&[1, 2, 3, 4, 5, 6, 7]);
        // One full word plus three trailing bytes: four insertions.
        assert_eq!(pool.write_counter(), before + 4 * CURSOR_STRIDE);
    }

    #[test]
    fn test_concurrent_mixing_is_lock_free() {
        use std::sync::Arc;

        let pool = Arc::new(EntropyPool::new());
        let mut handles = Vec::new();
        for t in 0..4u32 {
            let pool = Arc::clone(&pool);
            handles.push(std::thread::spawn(move || {
                for i in 0..1000u32 {
                    pool.mix_word(t.wrapping_mul(0x9E3779B9).wrapping_add(i));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(pool.write_counter(), 4000 * CURSOR_STRIDE);
        assert!(pool.snapshot().iter().any(|&b| b != 0));
    }

    #[test]
    fn test_drain_caps_at_available_estimate() {
        let pool = EntropyPool::new();
        let collector = test_collector();
        let hash = PoolHash::new(&[9u8; 32]);
        collector.add_events(32);
        pool.mix_word(1);

        let mut out = [0u8; SECURITY_STRENGTH_BYTES];
        let bits = pool.drain(&collector, &hash, &mut out, SECURITY_STRENGTH_BITS, true);
        assert_eq!(bits, 32);
        assert!(out[..4].iter().any(|&b| b != 0));
        assert_eq!(out[4..], [0u8; 28]);
    }

    #[test]
    fn test_entropy_never_double_spent() {
        let pool = EntropyPool::new();
        let collector = test_collector();
        let hash = PoolHash::new(&[3u8; 32]);
        collector.add_events(300);

        let mut out = [0u8; SECURITY_STRENGTH_BYTES];
        let first = pool.drain(&collector, &hash, &mut out, SECURITY_STRENGTH_BITS, true);
        assert_eq!(first, SECURITY_STRENGTH_BITS);

        // No new events: the residual is all that may come back.
        let second = pool.drain(&collector, &hash, &mut out, SECURITY_STRENGTH_BITS, true);
        assert!(second <= 300 - first);
    }

    #[test]
    fn test_emergency_reserve_enforced() {
        let pool = EntropyPool::new();
        let collector = test_collector();
        let hash = PoolHash::new(&[5u8; 32]);
        let reserve = collector.emergency_reserve_bits();

        // Just below request + reserve: nothing is delivered.
        collector.set_events(collector.entropy_to_events(reserve + 7));
        let mut out = [0u8; SECURITY_STRENGTH_BYTES];
        assert_eq!(pool.drain(&collector, &hash, &mut out, 8, false), 0);

        // At request + reserve: exactly the request is delivered.
        collector.set_events(collector.entropy_to_events(reserve + 8));
        assert_eq!(pool.drain(&collector, &hash, &mut out, 8, false), 8);
    }

    #[test]
    fn test_consecutive_drains_differ() {
        let pool = EntropyPool::new();
        let collector = test_collector();
        let hash = PoolHash::new(&[8u8; 32]);
        pool.mix_bytes(b"some boot-time device data");
        collector.add_events(2048);

        let mut first = [0u8; SECURITY_STRENGTH_BYTES];
        let mut second = [0u8; SECURITY_STRENGTH_BYTES];
        let a = pool.drain(&collector, &hash, &mut first, SECURITY_STRENGTH_BITS, true);
        let b = pool.drain(&collector, &hash, &mut second, SECURITY_STRENGTH_BITS, true);
        assert_eq!(a, SECURITY_STRENGTH_BITS);
        assert_eq!(b, SECURITY_STRENGTH_BITS);
        // The digest feedback advanced the pool between the calls.
        assert_ne!(first, second);
    }
}
