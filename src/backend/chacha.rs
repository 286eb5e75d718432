//! ChaCha20 DRNG core.
//!
//! The generator keeps a 256-bit key and a 96-bit counter. Seeding chains
//! the new material through BLAKE3 together with the previous key, so no
//! injected input can ever reduce the accumulated state:
//!
//! ```text
//! key = BLAKE3(input || key)
//! ```
//!
//! Generation produces the ChaCha20 keystream for the current key with the
//! counter as nonce. The counter is never reset; once it would leave the
//! 95-bit range the generator refuses further output instead of reusing a
//! nonce.

use zeroize::{Zeroize, ZeroizeOnDrop};

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::{ChaCha20, Key, Nonce};

use super::BackendError;
use crate::config::SECURITY_STRENGTH_BYTES;

/// Nonce value at which the generator gives up rather than wrap.
const NONCE_OVERFLOW: u128 = 1 << 95;

/// Deterministic random number generator over the ChaCha20 keystream.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ChaChaDrng {
    key: [u8; SECURITY_STRENGTH_BYTES],
    counter: u128,
}

impl ChaChaDrng {
    /// Allocates a fresh, unseeded generator for the given security
    /// strength in bytes. Only the native 256-bit strength is supported.
    pub fn new(sec_strength_bytes: usize) -> Result<Self, BackendError> {
        if sec_strength_bytes != SECURITY_STRENGTH_BYTES {
            return Err(BackendError::Alloc);
        }
        Ok(Self {
            key: [0u8; SECURITY_STRENGTH_BYTES],
            counter: 0,
        })
    }

    /// Mixes seed material of arbitrary length into the key state.
    pub fn seed(&mut self, inbuf: &[u8]) -> Result<(), BackendError> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(inbuf);
        hasher.update(&self.key);
        self.key = *hasher.finalize().as_bytes();
        Ok(())
    }

    /// Fills `outbuf` with generator output. Returns the number of bytes
    /// written, which is always `outbuf.len()` on success.
    pub fn generate(&mut self, outbuf: &mut [u8]) -> Result<usize, BackendError> {
        if self.counter + 1 >= NONCE_OVERFLOW {
            return Err(BackendError::Exhausted);
        }
        self.counter += 1;

        let mut nonce = [0u8; 12];
        nonce.copy_from_slice(&self.counter.to_le_bytes()[..12]);

        outbuf.fill(0);
        let mut cipher = ChaCha20::new(Key::from_slice(&self.key), Nonce::from_slice(&nonce));
        cipher.apply_keystream(outbuf);
        nonce.zeroize();
        Ok(outbuf.len())
    }

    /// Like [`generate`](Self::generate), with the contract that the output
    /// carries one bit of entropy per data bit, provided the caller seeded
    /// at least as much entropy as it draws. The entropy accounting that
    /// makes the claim true lives in the primary DRNG; the keystream itself
    /// is computed the same way.
    pub fn generate_full_entropy(&mut self, outbuf: &mut [u8]) -> Result<usize, BackendError> {
        self.generate(outbuf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_strength_rejected() {
        assert!(ChaChaDrng::new(16).is_err());
        assert!(ChaChaDrng::new(SECURITY_STRENGTH_BYTES).is_ok());
    }

    #[test]
    fn test_deterministic_after_identical_seed() {
        let mut a = ChaChaDrng::new(SECURITY_STRENGTH_BYTES).unwrap();
        let mut b = ChaChaDrng::new(SECURITY_STRENGTH_BYTES).unwrap();
        a.seed(b"seed material").unwrap();
        b.seed(b"seed material").unwrap();

        let mut out_a = [0u8; 64];
        let mut out_b = [0u8; 64];
        assert_eq!(a.generate(&mut out_a).unwrap(), 64);
        assert_eq!(b.generate(&mut out_b).unwrap(), 64);
        assert_eq!(out_a, out_b);
        assert!(out_a.iter().any(|&x| x != 0));
    }

    #[test]
    fn test_counter_advances_output() {
        let mut drng = ChaChaDrng::new(SECURITY_STRENGTH_BYTES).unwrap();
        drng.seed(&[0xAB; 32]).unwrap();

        let mut first = [0u8; 32];
        let mut second = [0u8; 32];
        drng.generate(&mut first).unwrap();
        drng.generate(&mut second).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_reseed_changes_stream() {
        let mut a = ChaChaDrng::new(SECURITY_STRENGTH_BYTES).unwrap();
        let mut b = ChaChaDrng::new(SECURITY_STRENGTH_BYTES).unwrap();
        a.seed(&[1u8; 32]).unwrap();
        b.seed(&[1u8; 32]).unwrap();
        b.seed(&[2u8; 32]).unwrap();

        let mut out_a = [0u8; 32];
        let mut out_b = [0u8; 32];
        a.generate(&mut out_a).unwrap();
        b.generate(&mut out_b).unwrap();
        assert_ne!(out_a, out_b);
    }
}
