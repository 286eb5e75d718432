//! Batched entropy caches.
//!
//! Small per-shard buffers of pre-generated random words so single-word
//! consumers do not pay a full DRNG generate call each time. A shard is a
//! logical stand-in for a CPU: callers hash themselves onto one, and
//! contention only occurs within a shard.
//!
//! Until the primary DRNG is fully seeded, the cached words were produced
//! by a less-than-fully-seeded generator, so the caches are invalidated
//! wholesale at the fully-seeded transition. The reader/writer gate below
//! keeps that one-time invalidation from interleaving with a
//! partially-completed refill; once fully seeded the gate is skipped,
//! since the invalidation can never occur again.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use zeroize::Zeroize;

use crate::config::DRNG_BLOCK_BYTES;
use crate::util::{lock, read_lock, write_lock};

const BATCH_WORDS_U64: usize = DRNG_BLOCK_BYTES / 8;
const BATCH_WORDS_U32: usize = DRNG_BLOCK_BYTES / 4;

struct BatchU64 {
    words: [u64; BATCH_WORDS_U64],
    position: usize,
}

struct BatchU32 {
    words: [u32; BATCH_WORDS_U32],
    position: usize,
}

pub(crate) struct BatchedEntropy {
    shards_u64: Vec<Mutex<BatchU64>>,
    shards_u32: Vec<Mutex<BatchU32>>,
    invalidate_gate: RwLock<()>,
    invalidated: AtomicBool,
}

impl BatchedEntropy {
    pub(crate) fn new(shards: usize) -> Self {
        let shards = shards.max(1);
        Self {
            shards_u64: (0..shards)
                .map(|_| {
                    Mutex::new(BatchU64 {
                        words: [0u64; BATCH_WORDS_U64],
                        position: 0,
                    })
                })
                .collect(),
            shards_u32: (0..shards)
                .map(|_| {
                    Mutex::new(BatchU32 {
                        words: [0u32; BATCH_WORDS_U32],
                        position: 0,
                    })
                })
                .collect(),
            invalidate_gate: RwLock::new(()),
            invalidated: AtomicBool::new(false),
        }
    }

    /// Returns one 64-bit word from the shard's cache, refilling the whole
    /// buffer through `refill` when the cursor wraps.
    pub(crate) fn get_u64<E>(
        &self,
        shard: usize,
        fully_seeded: bool,
        refill: impl FnOnce(&mut [u8]) -> Result<(), E>,
    ) -> Result<u64, E> {
        let _gate = if fully_seeded {
            None
        } else {
            Some(read_lock(&self.invalidate_gate))
        };

        let mut batch = lock(&self.shards_u64[shard % self.shards_u64.len()]);
        if batch.position % BATCH_WORDS_U64 == 0 {
            let mut bytes = [0u8; DRNG_BLOCK_BYTES];
            refill(&mut bytes)?;
            for (word, chunk) in batch.words.iter_mut().zip(bytes.chunks_exact(8)) {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                *word = u64::from_le_bytes(raw);
            }
            bytes.zeroize();
            batch.position = 0;
        }
        let word = batch.words[batch.position];
        batch.position += 1;
        Ok(word)
    }

    /// Returns one 32-bit word from the shard's cache.
    pub(crate) fn get_u32<E>(
        &self,
        shard: usize,
        fully_seeded: bool,
        refill: impl FnOnce(&mut [u8]) -> Result<(), E>,
    ) -> Result<u32, E> {
        let _gate = if fully_seeded {
            None
        } else {
            Some(read_lock(&self.invalidate_gate))
        };

        let mut batch = lock(&self.shards_u32[shard % self.shards_u32.len()]);
        if batch.position % BATCH_WORDS_U32 == 0 {
            let mut bytes = [0u8; DRNG_BLOCK_BYTES];
            refill(&mut bytes)?;
            for (word, chunk) in batch.words.iter_mut().zip(bytes.chunks_exact(4)) {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(chunk);
                *word = u32::from_le_bytes(raw);
            }
            bytes.zeroize();
            batch.position = 0;
        }
        let word = batch.words[batch.position];
        batch.position += 1;
        Ok(word)
    }

    /// Resets every cache cursor so the next access refills from the now
    /// fully-seeded hierarchy. Runs exactly once; later calls are no-ops.
    pub(crate) fn invalidate_all(&self) {
        if self.invalidated.swap(true, Ordering::AcqRel) {
            return;
        }
        let _gate = write_lock(&self.invalidate_gate);
        for shard in &self.shards_u64 {
            lock(shard).position = 0;
        }
        for shard in &self.shards_u32 {
            lock(shard).position = 0;
        }
    }

    pub(crate) fn invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::convert::Infallible;

    fn counting_refill(counter: &Cell<u32>) -> impl FnOnce(&mut [u8]) -> Result<(), Infallible> + '_ {
        move |buf| {
            counter.set(counter.get() + 1);
            for (i, b) in buf.iter_mut().enumerate() {
                *b = (i as u8).wrapping_add(counter.get() as u8);
            }
            Ok(())
        }
    }

    #[test]
    fn test_refill_amortized_over_batch() {
        let cache = BatchedEntropy::new(1);
        let refills = Cell::new(0);
        for _ in 0..BATCH_WORDS_U64 {
            cache.get_u64(0, false, counting_refill(&refills)).unwrap();
        }
        assert_eq!(refills.get(), 1);
        // The next word wraps the cursor and refills.
        cache.get_u64(0, false, counting_refill(&refills)).unwrap();
        assert_eq!(refills.get(), 2);
    }

    #[test]
    fn test_invalidation_forces_refill() {
        let cache = BatchedEntropy::new(1);
        let refills = Cell::new(0);
        cache.get_u64(0, false, counting_refill(&refills)).unwrap();
        cache.get_u64(0, false, counting_refill(&refills)).unwrap();
        assert_eq!(refills.get(), 1);

        cache.invalidate_all();
        cache.get_u64(0, true, counting_refill(&refills)).unwrap();
        assert_eq!(refills.get(), 2);
    }

    #[test]
    fn test_invalidation_is_idempotent() {
        let cache = BatchedEntropy::new(2);
        assert!(!cache.invalidated());
        cache.invalidate_all();
        assert!(cache.invalidated());
        // Second call must be a no-op, not a deadlock or reset storm.
        cache.invalidate_all();
        assert!(cache.invalidated());
    }

    #[test]
    fn test_u32_and_u64_caches_are_independent() {
        let cache = BatchedEntropy::new(1);
        let refills64 = Cell::new(0);
        let refills32 = Cell::new(0);
        cache.get_u64(0, false, counting_refill(&refills64)).unwrap();
        cache.get_u32(0, false, counting_refill(&refills32)).unwrap();
        assert_eq!(refills64.get(), 1);
        assert_eq!(refills32.get(), 1);
    }

    #[test]
    fn test_shard_index_wraps() {
        let cache = BatchedEntropy::new(2);
        let refills = Cell::new(0);
        // Shard 5 maps onto 5 % 2 == 1; no panic, normal refill.
        cache.get_u32(5, false, counting_refill(&refills)).unwrap();
        assert_eq!(refills.get(), 1);
    }

    #[test]
    fn test_refill_failure_leaves_cursor_unchanged() {
        let cache = BatchedEntropy::new(1);
        let failed: Result<u64, &str> = cache.get_u64(0, false, |_| Err("backend down"));
        assert!(failed.is_err());

        // The cursor still points at the refill boundary; a working
        // backend serves the word on retry.
        let refills = Cell::new(0);
        cache.get_u64(0, false, counting_refill(&refills)).unwrap();
        assert_eq!(refills.get(), 1);
    }
}
