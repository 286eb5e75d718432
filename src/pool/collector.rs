//! Noise event collector.
//!
//! Converts high-frequency, weakly-entropic events (timer interrupts,
//! input events, device feeds) into pool insertions. Clearly non-random
//! sequences are rejected by the stuck test: the first, second and third
//! discrete derivatives of the event timestamps must all be non-zero, or
//! the source is assumed to have stalled rather than jittered.
//!
//! Everything in here is called from the hottest event paths in the
//! process, so no operation can fail, block or allocate.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::config::{Config, SECURITY_STRENGTH_BITS};

use super::{EntropyPool, POOL_SIZE_BITS};

/// Collector status shared by the event hot path, the drain and the
/// reseed machinery.
pub(crate) struct CollectorState {
    /// Accepted (non-stuck) events since the last drain.
    num_events: AtomicU32,
    /// Accepted-event count that triggers a reseed attempt.
    num_events_thresh: AtomicU32,
    /// Stuck test: timestamp of the previous event.
    last_time: AtomicU32,
    /// Stuck test: first derivative of the previous event.
    last_delta: AtomicU32,
    /// Stuck test: second derivative of the previous event.
    last_delta2: AtomicU32,
    /// At-most-one-concurrent-reseed guard.
    reseed_in_progress: AtomicBool,
    /// Whether the timestamp source resolved at initialization probes.
    highres_timer: bool,
    /// Accepted events assumed to carry one security strength of entropy,
    /// after oversampling correction.
    events_per_strength: u32,
    emergency_reserve_bits: u32,
}

impl CollectorState {
    pub(crate) fn new(cfg: &Config, highres_timer: bool) -> Self {
        let oversample = if highres_timer {
            1
        } else {
            cfg.lowres_oversampling.max(1)
        };
        Self {
            num_events: AtomicU32::new(0),
            num_events_thresh: AtomicU32::new(0),
            last_time: AtomicU32::new(0),
            last_delta: AtomicU32::new(0),
            last_delta2: AtomicU32::new(0),
            reseed_in_progress: AtomicBool::new(false),
            highres_timer,
            events_per_strength: cfg.events_per_strength.max(1) * oversample,
            emergency_reserve_bits: cfg.emergency_reserve_bits,
        }
    }

    pub(crate) fn highres_timer(&self) -> bool {
        self.highres_timer
    }

    pub(crate) fn emergency_reserve_bits(&self) -> u32 {
        self.emergency_reserve_bits
    }

    /// Converts an entropy amount in bits into the event count estimated
    /// to carry it.
    pub(crate) fn entropy_to_events(&self, entropy_bits: u32) -> u32 {
        let events = u64::from(entropy_bits) * u64::from(self.events_per_strength)
            / u64::from(SECURITY_STRENGTH_BITS);
        events.min(u64::from(u32::MAX)) as u32
    }

    /// Converts an accepted-event count into an entropy estimate in bits.
    pub(crate) fn events_to_entropy(&self, events: u32) -> u32 {
        let bits = u64::from(events) * u64::from(SECURITY_STRENGTH_BITS)
            / u64::from(self.events_per_strength);
        bits.min(u64::from(u32::MAX)) as u32
    }

    /// Entropy estimate for the pool contents, capped at the pool size.
    pub(crate) fn avail_entropy_bits(&self) -> u32 {
        self.events_to_entropy(self.num_events.load(Ordering::Relaxed))
            .min(POOL_SIZE_BITS)
    }

    pub(crate) fn set_entropy_threshold(&self, entropy_bits: u32) {
        self.num_events_thresh
            .store(self.entropy_to_events(entropy_bits), Ordering::Relaxed);
    }

    pub(crate) fn threshold_crossed(&self, event_count: u32) -> bool {
        event_count >= self.num_events_thresh.load(Ordering::Relaxed)
    }

    pub(crate) fn take_events(&self) -> u32 {
        self.num_events.swap(0, Ordering::Relaxed)
    }

    pub(crate) fn add_events(&self, events: u32) {
        self.num_events.fetch_add(events, Ordering::Relaxed);
    }

    pub(crate) fn set_events(&self, events: u32) {
        self.num_events.store(events, Ordering::Relaxed);
    }

    /// Claims the reseed guard. Exactly one caller wins until
    /// [`end_reseed`](Self::end_reseed); losers must treat the refusal as
    /// transient and retry on a later threshold crossing.
    pub(crate) fn try_begin_reseed(&self) -> bool {
        self.reseed_in_progress
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    pub(crate) fn end_reseed(&self) {
        self.reseed_in_progress.store(false, Ordering::Release);
    }

    /// Stuck test over the 1st, 2nd and 3rd discrete derivatives of the
    /// event timestamps. Any zero derivative flags the event as stuck.
    fn stuck(&self, now_time: u32) -> bool {
        let delta = now_time.wrapping_sub(self.last_time.swap(now_time, Ordering::Relaxed));
        let delta2 = delta.wrapping_sub(self.last_delta.swap(delta, Ordering::Relaxed));
        let delta3 = delta2.wrapping_sub(self.last_delta2.swap(delta2, Ordering::Relaxed));

        delta == 0 || delta2 == 0 || delta3 == 0
    }

    /// Removes one event from the accepted counter unless a concurrent
    /// drain already claimed it.
    fn give_back_event(&self) {
        let mut current = self.num_events.load(Ordering::Relaxed);
        while current != 0 {
            match self.num_events.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Hot path: records one noise event.
    ///
    /// The timestamp is always mixed into the pool (a stuck value does no
    /// harm there), but a stuck event is not counted. With a
    /// low-resolution timer the auxiliary context words are mixed as well
    /// to compensate for the weaker timestamp.
    ///
    /// Returns the accepted-event count when the event was accepted, so
    /// the caller can run its reseed-trigger check; `None` for a stuck
    /// event.
    pub(crate) fn record_event(
        &self,
        pool: &EntropyPool,
        now_time: u32,
        aux: &[u32],
    ) -> Option<u32> {
        let count = self.num_events.fetch_add(1, Ordering::Relaxed) + 1;

        pool.mix_word(now_time);
        if self.highres_timer {
            if self.stuck(now_time) {
                self.give_back_event();
                return None;
            }
        } else {
            for &word in aux {
                pool.mix_word(word);
            }
        }
        Some(count)
    }

    /// Mixes externally supplied, non-entropic context data (device
    /// serials, boot parameters). Counts nothing and triggers nothing; the
    /// point is to keep otherwise identical devices from starting with
    /// identical pools.
    pub(crate) fn record_device_event(&self, pool: &EntropyPool, buf: &[u8], stamps: &[u32]) {
        pool.mix_bytes(buf);
        for &stamp in stamps {
            pool.mix_word(stamp);
        }
    }
}
