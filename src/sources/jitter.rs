//! CPU jitter noise source.
//!
//! Harvests entropy from execution timing variance: cache misses, pipeline
//! stalls, branch mispredictions, scheduler preemption. This is the
//! hardware-independent fallback among the fast sources; it works anywhere
//! the timestamp counter resolves individual runs of a short busy loop.
//!
//! Raw jitter is biased, so eight timing samples are folded into each
//! output bit through their XOR parity. The entropy credited for the
//! result is a deliberately conservative configuration value.

use super::{timer, SourceError};

/// CPU jitter entropy source.
pub struct JitterSource {
    _private: (),
}

impl JitterSource {
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// A tiny amount of CPU-intensive work to induce measurable jitter.
    #[inline(always)]
    fn jitter_loop() {
        let mut x = 0u64;
        for i in 0..10 {
            x = x.wrapping_add(i);
            core::hint::black_box(x);
        }
    }

    /// Fills `dest` with folded jitter samples.
    pub fn fill(&mut self, dest: &mut [u8]) -> Result<(), SourceError> {
        // Verify the timer resolves this loop at all.
        let t1 = timer::timestamp();
        Self::jitter_loop();
        let t2 = timer::timestamp();
        if t1 == t2 && t1 == 0 {
            return Err(SourceError::Unavailable);
        }

        for byte in dest.iter_mut() {
            let mut acc = 0u8;
            for _ in 0..8 {
                let mut folded = 0u64;
                for _ in 0..8 {
                    let start = timer::timestamp();
                    Self::jitter_loop();
                    let end = timer::timestamp();
                    folded ^= end.wrapping_sub(start);
                }
                // Parity-compress eight samples into one bit.
                let bit = (folded.count_ones() % 2) as u8;
                acc = (acc << 1) | bit;
            }
            *byte = acc;
        }

        Ok(())
    }
}

impl Default for JitterSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_fill() {
        let mut source = JitterSource::new();
        let mut buf = [0u8; 32];
        match source.fill(&mut buf) {
            Ok(()) => {
                assert!(
                    buf.iter().any(|&x| x != 0),
                    "jitter source produced all zeros"
                );
            }
            Err(SourceError::Unavailable) => {
                // Acceptable only where no cycle counter exists.
            }
            Err(e) => panic!("jitter source failed: {e}"),
        }
    }
}
