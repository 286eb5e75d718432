//! Cipher backend for the DRNG hierarchy and the pool digest.
//!
//! The rest of the crate treats these types as opaque: allocate, seed,
//! generate, digest. Swapping the underlying primitives (for example to an
//! SP800-90A DRBG construction) only touches this module.

use core::fmt;

mod chacha;
mod hash;

pub use chacha::ChaChaDrng;
pub use hash::PoolHash;

/// Errors surfaced by the cipher backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendError {
    /// Allocation failed (unsupported security strength).
    Alloc,
    /// Seeding the DRNG state failed.
    Seed,
    /// Random data generation failed.
    Generate,
    /// The generator exhausted its nonce space and must be reseeded.
    Exhausted,
    /// Pool digest computation failed.
    Hash,
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Alloc => write!(f, "DRNG allocation failed"),
            BackendError::Seed => write!(f, "DRNG seeding failed"),
            BackendError::Generate => write!(f, "DRNG generation failed"),
            BackendError::Exhausted => write!(f, "DRNG nonce space exhausted"),
            BackendError::Hash => write!(f, "pool digest failed"),
        }
    }
}

impl std::error::Error for BackendError {}
