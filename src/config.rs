//! Configuration for the entropy subsystem.
//!
//! Every constant in here is a policy choice tied to a deployment's threat
//! model, not an algorithmic necessity. The defaults reproduce the
//! calibration the subsystem was reviewed with; override them only with a
//! documented rationale.

/// Security strength of the DRNG hierarchy in bytes (SP800-57 level for a
/// 256-bit generator). The pool drain, the seed buffers and the seeding
/// thresholds are all sized from this.
pub const SECURITY_STRENGTH_BYTES: usize = 32;

/// Security strength in bits.
pub const SECURITY_STRENGTH_BITS: u32 = (SECURITY_STRENGTH_BYTES * 8) as u32;

/// Minimum seed entropy in bits before the primary DRNG counts as minimally
/// seeded (SP800-131A / TR-02102 floor).
pub const MIN_SEED_BITS: u32 = 128;

/// Entropy in bits for the very first seeding step at startup.
pub const INIT_SEED_BITS: u32 = 32;

/// Maximum bytes served from a secondary DRNG in one generate call. Larger
/// requests are chunked so a single caller cannot monopolize an instance
/// lock. SP800-90A would permit 1<<16; this is the safer margin.
pub const DRNG_MAX_REQUEST: usize = 1 << 12;

/// Number of generate calls a secondary DRNG may serve before a reseed from
/// the primary DRNG is forced. Must fit an i32 because the live counter is
/// an `AtomicI32` that tolerates transient underflow.
pub const DRNG_RESEED_THRESHOLD: i32 = 1 << 17;

/// Block size used for read staging and the batched caches; covers the
/// largest output block of the supported DRNG cores.
pub const DRNG_BLOCK_BYTES: usize = 64;

/// Runtime calibration knobs.
///
/// Populated by the host application and handed to
/// [`EntropySubsystem::new`](crate::EntropySubsystem::new). Fields set to 0
/// where noted fall back to an auto-detected value.
#[derive(Debug, Clone)]
pub struct Config {
    /// Accepted noise events assumed to carry one full security strength
    /// (256 bits) of entropy. 256 means one bit per event. Raising this
    /// makes the estimator more conservative.
    pub events_per_strength: u32,

    /// Multiplier applied to `events_per_strength` when no high-resolution
    /// timer is available and events are far less entropic.
    pub lowres_oversampling: u32,

    /// Entropy in bits withheld from low-assurance drains so high-assurance
    /// consumers are never starved.
    pub emergency_reserve_bits: u32,

    /// Entropy in bits credited to 256 data bits pulled from the CPU/arch
    /// RNG (e.g. RDRAND). Conservative because the hardware design cannot
    /// be reviewed. 0 disables the source.
    pub arch_entropy_bits: u32,

    /// Entropy in bits credited to 256 data bits from the CPU jitter
    /// source. 0 disables the source.
    pub jitter_entropy_bits: u32,

    /// Maximum seconds between reseeds of a secondary DRNG, enforced on the
    /// next generate call. 0 means a reseed attempt before every request.
    pub reseed_max_secs: u64,

    /// Additional seconds added per locality domain after its first full
    /// seeding, so the domains do not all drain the pool at once.
    pub domain_stagger_secs: u64,

    /// Number of secondary DRNG locality domains. 0 = auto (available
    /// parallelism).
    pub domains: usize,

    /// Number of batched-entropy cache shards. 0 = auto (available
    /// parallelism).
    pub shards: usize,

    /// Available-entropy estimate in bits above which blocked
    /// high-assurance readers are woken.
    pub read_wakeup_bits: u32,

    /// Available-entropy estimate in bits below which throttled entropy
    /// providers (hardware RNG feeders) are woken.
    pub write_wakeup_bits: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            events_per_strength: SECURITY_STRENGTH_BITS,
            lowres_oversampling: 10,
            emergency_reserve_bits: SECURITY_STRENGTH_BITS * 2,
            arch_entropy_bits: SECURITY_STRENGTH_BITS >> 5,
            jitter_entropy_bits: SECURITY_STRENGTH_BITS >> 4,
            reseed_max_secs: 600,
            domain_stagger_secs: 100,
            domains: 0,
            shards: 0,
            read_wakeup_bits: crate::pool::POOL_WORD_BITS * 2,
            write_wakeup_bits: SECURITY_STRENGTH_BITS * 4,
        }
    }
}

impl Config {
    pub(crate) fn resolved_domains(&self) -> usize {
        if self.domains != 0 {
            return self.domains;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }

    pub(crate) fn resolved_shards(&self) -> usize {
        if self.shards != 0 {
            return self.shards;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}
