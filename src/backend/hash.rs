//! Keyed digest used to compress the entropy pool.
//!
//! The key is derived at startup from the bootstrap RNG, so identical
//! machines with identical pool contents still compress to different seeds.

use zeroize::{Zeroize, ZeroizeOnDrop};

use super::BackendError;

/// Keyed BLAKE3 compression of the entropy pool contents.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct PoolHash {
    key: [u8; blake3::KEY_LEN],
}

impl PoolHash {
    pub fn new(key: &[u8; blake3::KEY_LEN]) -> Self {
        Self { key: *key }
    }

    /// Digest width in bytes.
    pub fn digest_size(&self) -> usize {
        blake3::OUT_LEN
    }

    /// Compresses `inbuf` into one digest block.
    pub fn digest(&self, inbuf: &[u8]) -> Result<[u8; blake3::OUT_LEN], BackendError> {
        Ok(*blake3::keyed_hash(&self.key, inbuf).as_bytes())
    }
}
