//! The entropy subsystem context and its public API.
//!
//! One [`EntropySubsystem`] owns the whole hierarchy: pool, collector,
//! primary and secondary DRNGs, bootstrap generator and batched caches.
//! There are no ambient singletons; hosts create the context once at
//! process start and thread it through their event and consumer layers.
//!
//! # Bring-up
//!
//! [`EntropySubsystem::new`] allocates everything (the only unrecoverable
//! failure) and leaves the subsystem in its boot window: bulk reads are
//! served by the bootstrap generator while noise events accumulate.
//! [`EntropySubsystem::activate`] then performs the late initialization
//! (zero-credit injection of the bootstrap state, first seeding of
//! instance 0) and retires the bootstrap generator for good.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use zeroize::Zeroize;

use crate::backend::{BackendError, PoolHash};
use crate::config::{
    Config, DRNG_BLOCK_BYTES, DRNG_MAX_REQUEST, INIT_SEED_BITS, MIN_SEED_BITS,
    SECURITY_STRENGTH_BITS, SECURITY_STRENGTH_BYTES,
};
use crate::drng::batch::BatchedEntropy;
use crate::drng::bootstrap::BootstrapRng;
use crate::drng::primary::PrimaryDrng;
use crate::drng::secondary::SecondaryDrng;
use crate::drng::SeedStage;
use crate::pool::collector::CollectorState;
use crate::pool::{EntropyPool, POOL_SIZE_BITS};
use crate::sources::jitter::JitterSource;
use crate::sources::{arch, timer};
use crate::util::lock;
use crate::worker;

/// Poll interval for blocked waiters; wakeups are edge-triggered from the
/// lock-free event path, so waits confirm their predicate on a bounded
/// cadence instead of trusting every notification to arrive.
const WAIT_POLL: Duration = Duration::from_millis(100);

/// Errors surfaced by the public API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Non-blocking request could not be satisfied yet; retry later.
    WouldBlock,
    /// Another reseed holds the guard; transient, retry later.
    ReseedInProgress,
    /// A blocked wait was cancelled by subsystem shutdown.
    Interrupted,
    /// Ready-callback registration after the generator already became
    /// ready.
    AlreadySeeded,
    /// Administrative argument out of range.
    InvalidArgument,
    /// Operation requires administrative privilege.
    PermissionDenied,
    /// Subsystem startup failed beyond DRNG allocation.
    Startup,
    /// Cipher backend failure.
    Backend(BackendError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::WouldBlock => write!(f, "insufficient entropy, try again"),
            Error::ReseedInProgress => write!(f, "reseed already in progress"),
            Error::Interrupted => write!(f, "wait interrupted by shutdown"),
            Error::AlreadySeeded => write!(f, "generator already seeded"),
            Error::InvalidArgument => write!(f, "invalid argument"),
            Error::PermissionDenied => write!(f, "operation not permitted"),
            Error::Startup => write!(f, "subsystem startup failed"),
            Error::Backend(err) => write!(f, "backend failure: {err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<BackendError> for Error {
    fn from(err: BackendError) -> Self {
        Error::Backend(err)
    }
}

/// Handle for unregistering a ready callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyToken(u64);

/// Diagnostic snapshot of the subsystem.
#[derive(Debug, Clone)]
pub struct Status {
    pub drng_core: &'static str,
    pub pool_digest: &'static str,
    pub security_strength_bits: u32,
    pub pool_size_bits: u32,
    pub available_entropy_bits: u32,
    pub secondary_instances: usize,
    pub seed_stage: SeedStage,
    pub high_resolution_timer: bool,
    pub bootstrap_active: bool,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DRNG core: {}", self.drng_core)?;
        writeln!(f, "DRNG security strength: {} bits", self.security_strength_bits)?;
        writeln!(f, "entropy pool digest: {}", self.pool_digest)?;
        writeln!(f, "entropy pool size: {} bits", self.pool_size_bits)?;
        writeln!(f, "available entropy estimate: {} bits", self.available_entropy_bits)?;
        writeln!(f, "secondary DRNG instances: {}", self.secondary_instances)?;
        writeln!(f, "seed stage: {:?}", self.seed_stage)?;
        writeln!(f, "high-resolution timer: {}", self.high_resolution_timer)?;
        write!(f, "bootstrap RNG active: {}", self.bootstrap_active)
    }
}

struct WaitQueue {
    mutex: Mutex<()>,
    cv: Condvar,
}

impl WaitQueue {
    fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            cv: Condvar::new(),
        }
    }

    fn notify_all(&self) {
        self.cv.notify_all();
    }

    /// Blocks until `pred` holds or the subsystem shuts down.
    fn wait(&self, pred: impl Fn() -> bool, shutdown: &AtomicBool) -> Result<(), Error> {
        let mut guard = lock(&self.mutex);
        loop {
            if shutdown.load(Ordering::Acquire) {
                return Err(Error::Interrupted);
            }
            if pred() {
                return Ok(());
            }
            guard = match self.cv.wait_timeout(guard, WAIT_POLL) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

/// State shared between API callers and the reseed worker.
pub(crate) struct Shared {
    cfg: Config,
    pool: EntropyPool,
    collector: CollectorState,
    hash: PoolHash,
    primary: PrimaryDrng,
    secondaries: Vec<SecondaryDrng>,
    bootstrap: Mutex<BootstrapRng>,
    /// One-way: flips true when activation retires the bootstrap RNG.
    primary_available: AtomicBool,
    activation_started: AtomicBool,
    /// Latched once every secondary instance and the primary itself are
    /// fully seeded; event-triggered reseeding stops at that point.
    all_domains_seeded: AtomicBool,
    /// Live copy of the reseed interval ceiling; grows slightly as
    /// domains come up so idle systems stop draining the pool.
    reseed_max_secs: AtomicU64,
    batch: BatchedEntropy,
    jitter: Mutex<JitterSource>,
    ready_callbacks: Mutex<Vec<(u64, Box<dyn FnOnce() + Send>)>>,
    next_callback_id: AtomicU64,
    last_input_value: AtomicU32,
    read_wait: WaitQueue,
    write_wait: WaitQueue,
    stage_wait: WaitQueue,
    shutdown: AtomicBool,
    boot_id: Mutex<Option<[u8; 16]>>,
}

impl Shared {
    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Should blocked entropy providers be writing?
    fn need_entropy(&self) -> bool {
        self.collector.avail_entropy_bits() < self.cfg.write_wakeup_bits
            && self.primary.entropy_bits() < SECURITY_STRENGTH_BITS
    }

    /// Can a blocked high-assurance reader make progress?
    fn have_entropy_full(&self) -> bool {
        self.collector.avail_entropy_bits() >= self.cfg.read_wakeup_bits
            || self.primary.entropy_bits() >= SECURITY_STRENGTH_BITS
    }

    fn current_secondary(&self) -> &SecondaryDrng {
        let instance = &self.secondaries[current_shard() % self.secondaries.len()];
        if instance.is_fully_seeded() {
            instance
        } else {
            // Instance 0 is the first to reach full seed at boot.
            &self.secondaries[0]
        }
    }

    fn read_arch_seed(&self, outbuf: &mut [u8; SECURITY_STRENGTH_BYTES]) -> u32 {
        if self.cfg.arch_entropy_bits == 0 {
            return 0;
        }
        match arch::fill(outbuf) {
            Ok(()) => {
                let bits = self.cfg.arch_entropy_bits.min(SECURITY_STRENGTH_BITS);
                log::debug!("obtained {bits} bits of entropy from CPU RNG noise source");
                bits
            }
            Err(_) => 0,
        }
    }

    fn read_jitter_seed(&self, outbuf: &mut [u8; SECURITY_STRENGTH_BYTES]) -> u32 {
        if self.cfg.jitter_entropy_bits == 0 {
            return 0;
        }
        let mut jitter = lock(&self.jitter);
        match jitter.fill(outbuf) {
            Ok(()) => {
                let bits = self.cfg.jitter_entropy_bits.min(SECURITY_STRENGTH_BITS);
                log::debug!("obtained {bits} bits of entropy from jitter noise source");
                bits
            }
            Err(err) => {
                log::debug!("jitter noise source yielded nothing: {err}");
                0
            }
        }
    }

    /// Seeds the primary DRNG, runs any stage transition side effects and
    /// optionally generates output from the freshly seeded state.
    fn primary_inject(
        &self,
        inbuf: &[u8],
        entropy_bits: u32,
        outbuf: Option<&mut [u8]>,
        fullentropy: bool,
    ) -> Result<usize, Error> {
        let result = self.primary.inject(inbuf, entropy_bits, outbuf, fullentropy);
        if self.have_entropy_full() {
            self.read_wait.notify_all();
        }
        match result {
            Ok((written, transition)) => {
                if let Some((from, to)) = transition {
                    self.handle_stage_change(from, to);
                }
                Ok(written)
            }
            Err(err) => Err(Error::Backend(err)),
        }
    }

    /// Side effects of a seed-stage transition: raise the collector
    /// threshold to the next stage, fire ready callbacks and wake waiters
    /// at minimal seeding, invalidate the batched caches at full seeding.
    fn handle_stage_change(&self, from: SeedStage, to: SeedStage) {
        if to == SeedStage::InitSeeded {
            self.collector.set_entropy_threshold(MIN_SEED_BITS);
        }
        if from < SeedStage::MinSeeded && to >= SeedStage::MinSeeded {
            self.collector.set_entropy_threshold(SECURITY_STRENGTH_BITS);
            self.fire_ready_callbacks();
            self.stage_wait.notify_all();
            self.read_wait.notify_all();
        }
        if to == SeedStage::FullySeeded {
            self.batch.invalidate_all();
            self.stage_wait.notify_all();
            self.read_wait.notify_all();
        }
    }

    fn fire_ready_callbacks(&self) {
        let callbacks = std::mem::take(&mut *lock(&self.ready_callbacks));
        // Run outside the registry lock so a callback may register or
        // unregister others.
        for (_, callback) in callbacks {
            callback();
        }
    }

    /// Reseeds the primary DRNG from the internal noise sources and
    /// generates output in the same critical section. The caller must
    /// hold the reseed guard; it is released here no matter the outcome.
    fn seed_primary_from_noise(
        &self,
        outbuf: &mut [u8],
        fullentropy: bool,
        drain_all: bool,
    ) -> Result<usize, Error> {
        // Fast path: enough unconsumed entropy in the primary already.
        if self.primary.entropy_bits() >= (outbuf.len() as u32).saturating_mul(8) {
            if let Ok(written) = self.primary.generate(outbuf, fullentropy) {
                if written == outbuf.len() {
                    self.collector.end_reseed();
                    return Ok(written);
                }
            }
        }

        let mut pool_buf = [0u8; SECURITY_STRENGTH_BYTES];
        let mut arch_buf = [0u8; SECURITY_STRENGTH_BYTES];
        let mut jitter_buf = [0u8; SECURITY_STRENGTH_BYTES];

        let mut total_bits = self.pool.drain(
            &self.collector,
            &self.hash,
            &mut pool_buf,
            SECURITY_STRENGTH_BITS,
            drain_all,
        );
        total_bits += self.read_arch_seed(&mut arch_buf);
        total_bits += self.read_jitter_seed(&mut jitter_buf);

        log::debug!("reseeding primary DRNG from noise sources with {total_bits} bits of entropy");

        // Concatenate the sources plus a raw timestamp (zero entropy,
        // mixed in only for diffusion).
        let mut seed_material = [0u8; SECURITY_STRENGTH_BYTES * 3 + 4];
        seed_material[..SECURITY_STRENGTH_BYTES].copy_from_slice(&pool_buf);
        seed_material[SECURITY_STRENGTH_BYTES..SECURITY_STRENGTH_BYTES * 2]
            .copy_from_slice(&arch_buf);
        seed_material[SECURITY_STRENGTH_BYTES * 2..SECURITY_STRENGTH_BYTES * 3]
            .copy_from_slice(&jitter_buf);
        seed_material[SECURITY_STRENGTH_BYTES * 3..]
            .copy_from_slice(&timer::timestamp_u32().to_le_bytes());
        pool_buf.zeroize();
        arch_buf.zeroize();
        jitter_buf.zeroize();

        let result = self.primary_inject(&seed_material, total_bits, Some(outbuf), fullentropy);
        seed_material.zeroize();

        // A drained pool is the moment to let throttled providers back in.
        if self.need_entropy() {
            self.write_wait.notify_all();
        }

        self.collector.end_reseed();
        result
    }

    /// Claims the reseed guard and performs a primary reseed. Losing the
    /// race is transient and non-fatal.
    fn seed_primary_guarded(
        &self,
        outbuf: &mut [u8],
        fullentropy: bool,
        drain_all: bool,
    ) -> Result<usize, Error> {
        if !self.collector.try_begin_reseed() {
            return Err(Error::ReseedInProgress);
        }
        self.seed_primary_from_noise(outbuf, fullentropy, drain_all)
    }

    /// Seeds one secondary instance with fresh material pulled through the
    /// primary DRNG.
    fn seed_secondary(&self, instance: &SecondaryDrng, guard_held: bool) {
        let mut seedbuf = [0u8; SECURITY_STRENGTH_BYTES];
        // The emergency reserve only binds once the primary holds full
        // strength; below that, every reseed may empty the pool so the
        // seeding ladder can climb on whatever has accumulated.
        let drain_all =
            !instance.is_fully_seeded() || self.primary.stage() < SeedStage::FullySeeded;
        let result = if guard_held {
            self.seed_primary_from_noise(&mut seedbuf, false, drain_all)
        } else {
            self.seed_primary_guarded(&mut seedbuf, false, drain_all)
        };
        match result {
            Ok(filled) => {
                // Inject even a zero-byte result: the state update alone
                // is worthwhile.
                instance.inject(&seedbuf[..filled], timer::coarse_secs(), true);
                seedbuf.zeroize();
            }
            Err(Error::ReseedInProgress) => {
                // Lost the race. The request counter may dip below zero
                // until the winning reseed restores it.
            }
            Err(_) => instance.retry_reseed_soon(),
        }
    }

    /// One pass of the deferred reseed work: seed the first secondary
    /// instance that is not yet fully seeded, with per-domain staggering
    /// once an instance comes up. Once every instance and the primary are
    /// fully seeded the event trigger is latched off.
    pub(crate) fn seed_pass(&self) {
        for (domain, instance) in self.secondaries.iter().enumerate() {
            if !instance.is_fully_seeded() {
                log::debug!(
                    "reseed triggered by noise source for secondary DRNG in domain {domain}"
                );
                self.seed_secondary(instance, true);
                if domain > 0 && instance.is_fully_seeded() {
                    // Keep the domains from draining the pool in lockstep,
                    // and relax the interval ceiling for idle systems.
                    instance.defer_next_reseed(domain as u64 * self.cfg.domain_stagger_secs);
                    self.reseed_max_secs.fetch_add(100, Ordering::Relaxed);
                }
                return;
            }
        }

        if self.primary.stage() < SeedStage::FullySeeded {
            // Every instance is up but the primary still lacks full
            // strength: keep pulling noise through it.
            self.seed_secondary(&self.secondaries[0], true);
            return;
        }

        self.all_domains_seeded.store(true, Ordering::Relaxed);
        self.collector.end_reseed();
    }

    /// Bulk generation: secondary DRNG when available, bootstrap RNG
    /// before that. `allow_reseed` is cleared on the batched-cache refill
    /// path, which must not recurse into the seeding machinery.
    fn bulk_generate_inner(&self, outbuf: &mut [u8], allow_reseed: bool) -> Result<(), Error> {
        if outbuf.is_empty() {
            return Ok(());
        }

        if !self.primary_available.load(Ordering::Acquire) {
            let mut bootstrap = lock(&self.bootstrap);
            // Re-check: activation may have completed meanwhile.
            if !self.primary_available.load(Ordering::Acquire) {
                bootstrap.generate(&self.pool, outbuf);
                return Ok(());
            }
        }

        let instance = self.current_secondary();
        let mut processed = 0;
        while processed < outbuf.len() {
            // Large requests stay cancellable between chunks.
            if processed > 0 && self.is_shutdown() {
                return Err(Error::Interrupted);
            }
            let todo = (outbuf.len() - processed).min(DRNG_MAX_REQUEST);
            if allow_reseed {
                let now = timer::coarse_secs();
                let max_secs = self.reseed_max_secs.load(Ordering::Relaxed);
                if instance.should_reseed(now, max_secs) {
                    self.seed_secondary(instance, false);
                }
            }
            match instance.generate(&mut outbuf[processed..processed + todo]) {
                Ok(written) if written > 0 => processed += written,
                Ok(_) => return Err(Error::Backend(BackendError::Generate)),
                Err(err) => {
                    log::warn!("getting random data from secondary DRNG failed: {err}");
                    return Err(Error::Backend(err));
                }
            }
        }
        Ok(())
    }

    fn bulk_generate(&self, outbuf: &mut [u8]) -> Result<(), Error> {
        self.bulk_generate_inner(outbuf, true)
    }

    /// High-assurance read: forces a reseed and returns at most as many
    /// bytes as the primary DRNG holds entropy for.
    fn read_high_assurance(&self, outbuf: &mut [u8], nonblock: bool) -> Result<usize, Error> {
        if outbuf.is_empty() {
            return Ok(0);
        }
        let todo = outbuf.len().min(DRNG_BLOCK_BYTES);
        loop {
            if self.primary_available.load(Ordering::Acquire) {
                match self.seed_primary_guarded(&mut outbuf[..todo], true, true) {
                    Ok(written) if written > 0 => {
                        log::debug!("read {written} bytes of full entropy data from primary DRNG");
                        return Ok(written);
                    }
                    Ok(_) => {}
                    Err(Error::ReseedInProgress) => {}
                    Err(Error::Backend(err)) => {
                        log::warn!("reading data from primary DRNG failed: {err}");
                    }
                    Err(err) => return Err(err),
                }
            }
            if nonblock {
                return Err(Error::WouldBlock);
            }
            self.read_wait.wait(
                || self.primary_available.load(Ordering::Acquire) && self.have_entropy_full(),
                &self.shutdown,
            )?;
        }
    }

    /// Chunked injection of caller-supplied data into the primary DRNG.
    /// Data without an entropy claim additionally forces every secondary
    /// instance to reseed on its next request.
    fn write_common(&self, buffer: &[u8], entropy_bits: u32) -> Result<usize, Error> {
        if !self.primary_available.load(Ordering::Acquire) {
            return Err(Error::WouldBlock);
        }
        let original_bits = entropy_bits;
        let mut remaining_bits = entropy_bits;
        let mut written = 0;
        for chunk in buffer.chunks(DRNG_BLOCK_BYTES) {
            let credit = remaining_bits.min((chunk.len() as u32).saturating_mul(8));
            self.primary_inject(chunk, credit, None, false)?;
            remaining_bits -= credit;
            written += chunk.len();
        }

        if original_bits == 0 {
            for instance in &self.secondaries {
                instance.set_force_reseed();
            }
        }
        Ok(written)
    }

    fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.read_wait.notify_all();
        self.write_wait.notify_all();
        self.stage_wait.notify_all();
    }
}

/// Per-thread shard index, assigned round-robin on first use. A logical
/// stand-in for CPU affinity.
fn current_shard() -> usize {
    static NEXT_SHARD: AtomicUsize = AtomicUsize::new(0);
    thread_local! {
        static SHARD: Cell<usize> = const { Cell::new(usize::MAX) };
    }
    SHARD.with(|slot| {
        let mut shard = slot.get();
        if shard == usize::MAX {
            shard = NEXT_SHARD.fetch_add(1, Ordering::Relaxed);
            slot.set(shard);
        }
        shard
    })
}

/// The entropy subsystem.
pub struct EntropySubsystem {
    shared: Arc<Shared>,
    reseed_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl EntropySubsystem {
    /// Allocates the subsystem. DRNG allocation is the single
    /// unrecoverable failure; everything else degrades at runtime.
    ///
    /// The subsystem starts in its boot window: feed it noise events and
    /// call [`activate`](Self::activate) once the event sources are wired
    /// up.
    pub fn new(config: Config) -> Result<Self, Error> {
        let highres = timer::have_highres_timer();
        if !highres {
            log::warn!(
                "operating without high-resolution timer, applying event oversampling factor {}",
                config.lowres_oversampling
            );
        }
        let collector = CollectorState::new(&config, highres);
        collector.set_entropy_threshold(INIT_SEED_BITS);

        let pool = EntropyPool::new();
        let mut bootstrap = BootstrapRng::new();

        let primary = PrimaryDrng::new().map_err(Error::Backend)?;
        log::info!("primary DRNG allocated");

        let domains = config.resolved_domains();
        let now = timer::coarse_secs();
        let mut secondaries = Vec::with_capacity(domains);
        for domain in 0..domains {
            secondaries.push(SecondaryDrng::new(now).map_err(Error::Backend)?);
            log::debug!("secondary DRNG for domain {domain} allocated");
        }

        // Key the pool digest from the bootstrap generator so identical
        // machines with identical pool contents compress differently.
        let mut key = [0u8; blake3::KEY_LEN];
        bootstrap.generate(&pool, &mut key);
        let hash = PoolHash::new(&key);
        key.zeroize();

        let shards = config.resolved_shards();
        let reseed_max_secs = AtomicU64::new(config.reseed_max_secs);
        let shared = Arc::new(Shared {
            cfg: config,
            pool,
            collector,
            hash,
            primary,
            secondaries,
            bootstrap: Mutex::new(bootstrap),
            primary_available: AtomicBool::new(false),
            activation_started: AtomicBool::new(false),
            all_domains_seeded: AtomicBool::new(false),
            reseed_max_secs,
            batch: BatchedEntropy::new(shards),
            jitter: Mutex::new(JitterSource::new()),
            ready_callbacks: Mutex::new(Vec::new()),
            next_callback_id: AtomicU64::new(0),
            last_input_value: AtomicU32::new(0),
            read_wait: WaitQueue::new(),
            write_wait: WaitQueue::new(),
            stage_wait: WaitQueue::new(),
            shutdown: AtomicBool::new(false),
            boot_id: Mutex::new(None),
        });

        let (reseed_tx, reseed_rx) = mpsc::channel();
        let worker = worker::spawn(Arc::clone(&shared), reseed_rx).map_err(|err| {
            log::warn!("spawning reseed worker failed: {err}");
            Error::Startup
        })?;

        Ok(Self {
            shared,
            reseed_tx: Some(reseed_tx),
            worker: Some(worker),
        })
    }

    /// Late initialization: injects the bootstrap state into the primary
    /// DRNG with zero entropy credit (its event data is the same data the
    /// pool is credited for), seeds instance 0 and retires the bootstrap
    /// generator. Idempotent; call once the event sources are wired up so
    /// boot-time events have had a chance to accumulate.
    pub fn activate(&self) -> Result<(), Error> {
        let sh = &self.shared;
        if sh.activation_started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let (mut state, delivered) = {
            let bootstrap = lock(&sh.bootstrap);
            (*bootstrap.state_bytes(), bootstrap.bytes_delivered())
        };
        if let Err(err) = sh.primary_inject(&state, 0, None, false) {
            state.zeroize();
            sh.activation_started.store(false, Ordering::Release);
            return Err(err);
        }
        state.zeroize();

        sh.seed_secondary(&sh.secondaries[0], false);
        sh.primary_available.store(true, Ordering::Release);
        log::info!("retiring bootstrap RNG - {delivered} bytes delivered");
        lock(&sh.bootstrap).wipe();
        Ok(())
    }

    /// Bulk, never-blocking read. Served by the secondary DRNG hierarchy,
    /// or by the bootstrap RNG during the boot window.
    pub fn get_random_bytes(&self, outbuf: &mut [u8]) -> Result<(), Error> {
        let stage = self.shared.primary.stage();
        if stage < SeedStage::MinSeeded {
            log::debug!(
                "serving {} bytes from an insufficiently seeded generator",
                outbuf.len()
            );
        }
        self.shared.bulk_generate(outbuf)
    }

    /// Arch-RNG-preferred fill: takes hardware words while they flow and
    /// falls back to the bulk path for the remainder.
    pub fn get_random_bytes_arch(&self, outbuf: &mut [u8]) -> Result<(), Error> {
        let mut filled = 0;
        while filled < outbuf.len() {
            match arch::random_u64() {
                Some(word) => {
                    let take = (outbuf.len() - filled).min(8);
                    outbuf[filled..filled + take].copy_from_slice(&word.to_le_bytes()[..take]);
                    filled += take;
                }
                None => break,
            }
        }
        if filled < outbuf.len() {
            self.shared.bulk_generate(&mut outbuf[filled..])?;
        }
        Ok(())
    }

    /// High-assurance read: every returned byte is backed by the entropy
    /// estimate, via a forced reseed-and-generate on the primary DRNG.
    /// Returns the number of bytes delivered, which may be less than
    /// requested. Blocks until entropy is available unless `nonblock`,
    /// in which case [`Error::WouldBlock`] is returned instead.
    pub fn read_high_assurance(&self, outbuf: &mut [u8], nonblock: bool) -> Result<usize, Error> {
        self.shared.read_high_assurance(outbuf, nonblock)
    }

    /// Suspends the caller until the primary DRNG is at least minimally
    /// seeded. Cancelled distinctly by shutdown.
    pub fn wait_for_random_bytes(&self) -> Result<(), Error> {
        let sh = &self.shared;
        sh.stage_wait
            .wait(|| sh.primary.stage() >= SeedStage::MinSeeded, &sh.shutdown)
    }

    /// Fast single-word read through the batched cache, preferring a
    /// direct hardware-RNG word when one is available.
    pub fn get_random_u32(&self) -> Result<u32, Error> {
        if let Some(word) = arch::random_u32() {
            return Ok(word);
        }
        let sh = &self.shared;
        let fully_seeded = sh.primary.stage() == SeedStage::FullySeeded;
        sh.batch.get_u32(current_shard(), fully_seeded, |buf| {
            sh.bulk_generate_inner(buf, false)
        })
    }

    /// Fast single-word read, 64-bit variant.
    pub fn get_random_u64(&self) -> Result<u64, Error> {
        if let Some(word) = arch::random_u64() {
            return Ok(word);
        }
        let sh = &self.shared;
        let fully_seeded = sh.primary.stage() == SeedStage::FullySeeded;
        sh.batch.get_u64(current_shard(), fully_seeded, |buf| {
            sh.bulk_generate_inner(buf, false)
        })
    }

    /// Entry point from the interrupt-like event layer. Never blocks,
    /// never fails; at most it wins the reseed guard and signals the
    /// background worker.
    pub fn add_interrupt_randomness(&self, event_id: u32, context: u32) {
        let sh = &self.shared;
        let now = timer::timestamp_u32();
        let Some(count) = sh.collector.record_event(&sh.pool, now, &[event_id, context]) else {
            return;
        };

        // Wake blocked readers once in a while as the estimate grows.
        if sh.pool.write_counter() & 0x3f == 0
            && count >= sh.collector.entropy_to_events(sh.cfg.read_wakeup_bits)
        {
            sh.read_wait.notify_all();
        }

        if sh.all_domains_seeded.load(Ordering::Relaxed) {
            return;
        }
        if !sh.primary_available.load(Ordering::Acquire) {
            return;
        }
        if !sh.collector.threshold_crossed(count) {
            return;
        }
        if !sh.collector.try_begin_reseed() {
            return;
        }
        match &self.reseed_tx {
            Some(tx) if tx.send(()).is_ok() => {}
            _ => sh.collector.end_reseed(),
        }
    }

    /// Entry point from the human-input layer. Auto-repeated values are
    /// dropped before mixing.
    pub fn add_input_randomness(&self, kind: u32, code: u32, value: u32) {
        let sh = &self.shared;
        if sh.last_input_value.swap(value, Ordering::Relaxed) == value {
            return;
        }
        let word = (kind << 4) ^ code ^ (code >> 4) ^ value;
        sh.pool.mix_word(word);
    }

    /// Mixes device-identity data into the pool without any entropy
    /// claim, so identical devices do not share identical initial pools.
    pub fn add_device_randomness(&self, buffer: &[u8]) {
        let sh = &self.shared;
        sh.collector.record_device_event(
            &sh.pool,
            buffer,
            &[timer::timestamp_u32(), timer::coarse_secs() as u32],
        );
    }

    /// Feed from an external true-RNG driver. The caller is throttled
    /// while the subsystem is saturated with entropy and resumes once the
    /// estimate drops; shutdown cancels the wait with
    /// [`Error::Interrupted`].
    pub fn add_hwgenerator_randomness(
        &self,
        buffer: &[u8],
        entropy_bits: u32,
    ) -> Result<(), Error> {
        let sh = &self.shared;
        if !sh.primary_available.load(Ordering::Acquire) {
            return Ok(());
        }
        sh.write_wait.wait(|| sh.need_entropy(), &sh.shutdown)?;
        sh.primary_inject(buffer, entropy_bits, None, false)?;
        Ok(())
    }

    /// Registers a one-shot callback fired when the primary DRNG reaches
    /// minimal seeding. Returns [`Error::AlreadySeeded`] if that already
    /// happened.
    pub fn register_ready_callback(
        &self,
        callback: impl FnOnce() + Send + 'static,
    ) -> Result<ReadyToken, Error> {
        let sh = &self.shared;
        if sh.primary.stage() >= SeedStage::MinSeeded {
            return Err(Error::AlreadySeeded);
        }
        let mut callbacks = lock(&sh.ready_callbacks);
        // Re-check under the registry lock: the transition may have fired
        // the list while we were waiting for it.
        if sh.primary.stage() >= SeedStage::MinSeeded {
            return Err(Error::AlreadySeeded);
        }
        let id = sh.next_callback_id.fetch_add(1, Ordering::Relaxed);
        callbacks.push((id, Box::new(callback)));
        Ok(ReadyToken(id))
    }

    /// Removes a registered callback. Returns false if it already fired
    /// or was never registered.
    pub fn unregister_ready_callback(&self, token: ReadyToken) -> bool {
        let mut callbacks = lock(&self.shared.ready_callbacks);
        let before = callbacks.len();
        callbacks.retain(|(id, _)| *id != token.0);
        callbacks.len() != before
    }

    /// Unprivileged data injection: mixed into the primary DRNG with zero
    /// entropy credit; forces the secondary instances to pick up fresh
    /// state on their next request.
    pub fn write_data(&self, buffer: &[u8]) -> Result<usize, Error> {
        self.shared.write_common(buffer, 0)
    }

    /// Privileged injection with an explicit entropy claim. The claim is
    /// silently capped at the data length.
    pub fn add_entropy(
        &self,
        buffer: &[u8],
        entropy_bits: u32,
        privileged: bool,
    ) -> Result<usize, Error> {
        if !privileged {
            return Err(Error::PermissionDenied);
        }
        let capped = entropy_bits.min((buffer.len() as u32).saturating_mul(8));
        self.shared.write_common(buffer, capped)
    }

    /// Current pool entropy estimate in bits.
    pub fn available_entropy_bits(&self) -> u32 {
        self.shared.collector.avail_entropy_bits()
    }

    /// Privileged adjustment of the accepted-event credit, clamped to the
    /// pool capacity.
    pub fn add_entropy_credit(&self, delta_bits: i64, privileged: bool) -> Result<(), Error> {
        if !privileged {
            return Err(Error::PermissionDenied);
        }
        if delta_bits.unsigned_abs() > u64::from(POOL_SIZE_BITS) {
            return Err(Error::InvalidArgument);
        }
        let sh = &self.shared;
        let current = i64::from(sh.collector.avail_entropy_bits());
        let updated = (current + delta_bits).clamp(0, i64::from(POOL_SIZE_BITS)) as u32;
        sh.collector
            .set_events(sh.collector.entropy_to_events(updated));
        Ok(())
    }

    /// Privileged zeroing of the accepted-event credit.
    pub fn clear_entropy_credit(&self, privileged: bool) -> Result<(), Error> {
        if !privileged {
            return Err(Error::PermissionDenied);
        }
        self.shared.collector.set_events(0);
        Ok(())
    }

    /// A fresh random RFC-4122 v4 identifier. Not persisted anywhere.
    pub fn random_uuid(&self) -> Result<[u8; 16], Error> {
        let mut uuid = [0u8; 16];
        self.shared.bulk_generate(&mut uuid)?;
        uuid[6] = (uuid[6] & 0x0F) | 0x40;
        uuid[8] = (uuid[8] & 0x3F) | 0x80;
        Ok(uuid)
    }

    /// The v4 identifier in canonical string form.
    pub fn random_uuid_string(&self) -> Result<String, Error> {
        Ok(format_uuid(&self.random_uuid()?))
    }

    /// Stable per-process identifier, generated lazily on first request.
    pub fn boot_id(&self) -> Result<[u8; 16], Error> {
        let mut slot = lock(&self.shared.boot_id);
        if let Some(id) = *slot {
            return Ok(id);
        }
        let mut id = [0u8; 16];
        self.shared.bulk_generate(&mut id)?;
        id[6] = (id[6] & 0x0F) | 0x40;
        id[8] = (id[8] & 0x3F) | 0x80;
        *slot = Some(id);
        Ok(id)
    }

    /// Diagnostic snapshot.
    pub fn status(&self) -> Status {
        let sh = &self.shared;
        Status {
            drng_core: "ChaCha20 DRNG",
            pool_digest: "keyed BLAKE3",
            security_strength_bits: SECURITY_STRENGTH_BITS,
            pool_size_bits: POOL_SIZE_BITS,
            available_entropy_bits: sh.collector.avail_entropy_bits(),
            secondary_instances: sh.secondaries.len(),
            seed_stage: sh.primary.stage(),
            high_resolution_timer: sh.collector.highres_timer(),
            bootstrap_active: !sh.primary_available.load(Ordering::Acquire),
        }
    }

    /// Current seeding stage of the primary DRNG.
    pub fn seed_stage(&self) -> SeedStage {
        self.shared.primary.stage()
    }

    /// Adjusts the secondary reseed interval ceiling at runtime. Zero
    /// means a reseed attempt before every generate request.
    pub fn set_reseed_max_secs(&self, secs: u64) {
        self.shared.reseed_max_secs.store(secs, Ordering::Relaxed);
    }

    /// `rand_core` adapter over the bulk path.
    pub fn rng(&self) -> SubsystemRng<'_> {
        SubsystemRng { subsystem: self }
    }

    /// Releases every blocked waiter with [`Error::Interrupted`] and stops
    /// the reseed worker. Also performed on drop.
    pub fn shutdown(&self) {
        self.shared.begin_shutdown();
    }
}

impl Drop for EntropySubsystem {
    fn drop(&mut self) {
        self.shared.begin_shutdown();
        // Closing the channel ends the worker loop.
        self.reseed_tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn format_uuid(raw: &[u8; 16]) -> String {
    let s = hex::encode(raw);
    format!(
        "{}-{}-{}-{}-{}",
        &s[..8],
        &s[8..12],
        &s[12..16],
        &s[16..20],
        &s[20..]
    )
}

/// [`rand_core::RngCore`] view of the subsystem.
///
/// The infallible trait methods follow the `rand_core` contract and panic
/// on a backend failure; use [`RngCore::try_fill_bytes`] where failures
/// must be handled.
pub struct SubsystemRng<'a> {
    subsystem: &'a EntropySubsystem,
}

impl rand_core::RngCore for SubsystemRng<'_> {
    fn next_u32(&mut self) -> u32 {
        match self.subsystem.get_random_u32() {
            Ok(word) => word,
            Err(err) => panic!("entropy subsystem failure: {err}"),
        }
    }

    fn next_u64(&mut self) -> u64 {
        match self.subsystem.get_random_u64() {
            Ok(word) => word,
            Err(err) => panic!("entropy subsystem failure: {err}"),
        }
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        if let Err(err) = self.subsystem.get_random_bytes(dest) {
            panic!("entropy subsystem failure: {err}");
        }
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.subsystem
            .get_random_bytes(dest)
            .map_err(rand_core::Error::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn test_config() -> Config {
        Config {
            // Deterministic seeding arithmetic: pool entropy only.
            arch_entropy_bits: 0,
            jitter_entropy_bits: 0,
            domains: 1,
            shards: 1,
            ..Config::default()
        }
    }

    fn test_subsystem() -> EntropySubsystem {
        EntropySubsystem::new(test_config()).unwrap()
    }

    /// Feeds `n` accepted synthetic events with quadratically growing
    /// timestamp gaps, which keep every derivative of the stuck test
    /// non-zero.
    struct EventFeeder {
        t: u32,
        i: u32,
    }

    impl EventFeeder {
        fn new() -> Self {
            Self { t: 0, i: 0 }
        }

        fn feed(&mut self, subsystem: &EntropySubsystem, n: u32) {
            let sh = &subsystem.shared;
            let mut accepted = 0;
            while accepted < n {
                self.i += 1;
                self.t = self.t.wrapping_add(self.i * self.i + 7);
                if sh.collector.record_event(&sh.pool, self.t, &[]).is_some() {
                    accepted += 1;
                }
            }
        }
    }

    /// Runs one deferred reseed pass synchronously, as the worker thread
    /// would.
    fn run_reseed(subsystem: &EntropySubsystem) {
        assert!(subsystem.shared.collector.try_begin_reseed());
        subsystem.shared.seed_pass();
    }

    #[test]
    fn test_bulk_read_before_any_seeding() {
        let subsystem = test_subsystem();
        let mut buf = vec![0u8; 1024];
        subsystem.get_random_bytes(&mut buf).unwrap();
        assert!(buf.iter().any(|&b| b != 0));
        assert!(subsystem.status().bootstrap_active);
        assert_eq!(subsystem.seed_stage(), SeedStage::Unseeded);
    }

    #[test]
    fn test_activation_retires_bootstrap() {
        let subsystem = test_subsystem();
        subsystem.activate().unwrap();
        assert!(!subsystem.status().bootstrap_active);
        // Idempotent.
        subsystem.activate().unwrap();

        let mut buf = [0u8; 128];
        subsystem.get_random_bytes(&mut buf).unwrap();
        assert!(buf.iter().any(|&b| b != 0));
    }

    #[test]
    fn test_init_threshold_reaches_init_stage_only() {
        let subsystem = test_subsystem();
        subsystem.activate().unwrap();
        assert_eq!(subsystem.seed_stage(), SeedStage::Unseeded);

        let mut feeder = EventFeeder::new();
        // Exactly the init threshold: 32 bits at one bit per event.
        feeder.feed(&subsystem, 32);
        run_reseed(&subsystem);

        assert_eq!(subsystem.seed_stage(), SeedStage::InitSeeded);
    }

    #[test]
    fn test_min_seed_fires_callbacks_and_wakes_waiters() {
        let subsystem = Arc::new(test_subsystem());
        subsystem.activate().unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let fired_cb = Arc::clone(&fired);
        subsystem
            .register_ready_callback(move || {
                fired_cb.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let waiter = {
            let subsystem = Arc::clone(&subsystem);
            std::thread::spawn(move || subsystem.wait_for_random_bytes())
        };

        let mut feeder = EventFeeder::new();
        feeder.feed(&subsystem, 32);
        run_reseed(&subsystem);
        assert_eq!(subsystem.seed_stage(), SeedStage::InitSeeded);

        // Next stage: 128 bits.
        feeder.feed(&subsystem, 128);
        run_reseed(&subsystem);
        assert_eq!(subsystem.seed_stage(), SeedStage::MinSeeded);

        assert_eq!(waiter.join().unwrap(), Ok(()));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // Late registration reports the state instead of queuing.
        assert_eq!(
            subsystem.register_ready_callback(|| {}).map(|_| ()),
            Err(Error::AlreadySeeded)
        );
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregistered_callback_never_fires() {
        let subsystem = test_subsystem();
        subsystem.activate().unwrap();

        let kept = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicUsize::new(0));
        let kept_cb = Arc::clone(&kept);
        let dropped_cb = Arc::clone(&dropped);
        subsystem
            .register_ready_callback(move || {
                kept_cb.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        let token = subsystem
            .register_ready_callback(move || {
                dropped_cb.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        assert!(subsystem.unregister_ready_callback(token));

        subsystem.add_entropy(&[0x55u8; 16], 128, true).unwrap();
        assert_eq!(subsystem.seed_stage(), SeedStage::MinSeeded);
        assert_eq!(kept.load(Ordering::SeqCst), 1);
        assert_eq!(dropped.load(Ordering::SeqCst), 0);
        // Unregistering twice reports the callback gone.
        assert!(!subsystem.unregister_ready_callback(token));
    }

    #[test]
    fn test_full_seed_invalidates_batched_cache() {
        let subsystem = test_subsystem();
        subsystem.activate().unwrap();

        // Pre-fill the cache while under-seeded (skip machines where the
        // hardware bypass serves words without touching the cache).
        if !arch::available() {
            subsystem.get_random_u32().unwrap();
        }
        assert!(!subsystem.shared.batch.invalidated());

        subsystem
            .add_entropy(&[0xA5u8; SECURITY_STRENGTH_BYTES], 256, true)
            .unwrap();
        assert_eq!(subsystem.seed_stage(), SeedStage::FullySeeded);
        assert!(subsystem.shared.batch.invalidated());
    }

    #[test]
    fn test_high_assurance_read_capped_by_entropy_estimate() {
        let subsystem = test_subsystem();
        subsystem.activate().unwrap();
        subsystem
            .add_entropy(&[0x77u8; SECURITY_STRENGTH_BYTES], 256, true)
            .unwrap();
        assert_eq!(subsystem.seed_stage(), SeedStage::FullySeeded);

        subsystem.shared.primary.set_entropy_bits(16);
        let mut buf = [0u8; 32];
        match subsystem.read_high_assurance(&mut buf, true) {
            Ok(n) => assert!(n <= 2, "delivered {n} bytes against a 16-bit estimate"),
            Err(Error::WouldBlock) => {}
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    #[test]
    fn test_high_assurance_nonblocking_while_reseed_held() {
        let subsystem = test_subsystem();
        subsystem.activate().unwrap();

        assert!(subsystem.shared.collector.try_begin_reseed());
        let mut buf = [0u8; 16];
        assert_eq!(
            subsystem.read_high_assurance(&mut buf, true),
            Err(Error::WouldBlock)
        );
        subsystem.shared.collector.end_reseed();
    }

    #[test]
    fn test_shutdown_interrupts_waiters() {
        let subsystem = Arc::new(test_subsystem());
        subsystem.activate().unwrap();

        let waiter = {
            let subsystem = Arc::clone(&subsystem);
            std::thread::spawn(move || subsystem.wait_for_random_bytes())
        };
        // Give the waiter a moment to block, then cancel it.
        std::thread::sleep(Duration::from_millis(50));
        subsystem.shutdown();
        assert_eq!(waiter.join().unwrap(), Err(Error::Interrupted));
    }

    #[test]
    fn test_admin_operations_enforce_privilege() {
        let subsystem = test_subsystem();
        subsystem.activate().unwrap();

        assert_eq!(
            subsystem.add_entropy(&[1, 2, 3], 24, false),
            Err(Error::PermissionDenied)
        );
        assert_eq!(
            subsystem.add_entropy_credit(64, false),
            Err(Error::PermissionDenied)
        );
        assert_eq!(
            subsystem.clear_entropy_credit(false),
            Err(Error::PermissionDenied)
        );

        // Unprivileged writes stay open, with zero credit.
        let stage = subsystem.seed_stage();
        subsystem.write_data(&[9u8; 100]).unwrap();
        assert_eq!(subsystem.seed_stage(), stage);
    }

    #[test]
    fn test_entropy_credit_adjustment_clamps() {
        let subsystem = test_subsystem();
        subsystem.activate().unwrap();

        subsystem.add_entropy_credit(100, true).unwrap();
        assert_eq!(subsystem.available_entropy_bits(), 100);

        // Clamped at pool capacity.
        subsystem
            .add_entropy_credit(i64::from(POOL_SIZE_BITS), true)
            .unwrap();
        assert_eq!(subsystem.available_entropy_bits(), POOL_SIZE_BITS);

        subsystem.add_entropy_credit(-(2 * i64::from(POOL_SIZE_BITS)), true).unwrap_err();
        subsystem.clear_entropy_credit(true).unwrap();
        assert_eq!(subsystem.available_entropy_bits(), 0);
    }

    #[test]
    fn test_zero_credit_write_forces_secondary_reseed() {
        let subsystem = test_subsystem();
        subsystem.activate().unwrap();
        // Settle the instance budget.
        let mut buf = [0u8; 64];
        subsystem.get_random_bytes(&mut buf).unwrap();

        subsystem.write_data(&[1u8; 32]).unwrap();
        // The flag shows on the next should_reseed evaluation.
        assert!(subsystem.shared.secondaries[0].should_reseed(0, 600));
    }

    #[test]
    fn test_input_randomness_deduplicates_repeats() {
        let subsystem = test_subsystem();
        let sh = &subsystem.shared;

        subsystem.add_input_randomness(1, 30, 7);
        let counter = sh.pool.write_counter();
        // Auto-repeat of the same value must not mix.
        subsystem.add_input_randomness(1, 30, 7);
        assert_eq!(sh.pool.write_counter(), counter);
        subsystem.add_input_randomness(1, 30, 8);
        assert!(sh.pool.write_counter() > counter);
    }

    #[test]
    fn test_uuid_shape() {
        let subsystem = test_subsystem();
        let uuid = subsystem.random_uuid().unwrap();
        assert_eq!(uuid[6] >> 4, 4);
        assert_eq!(uuid[8] >> 6, 0b10);

        let text = subsystem.random_uuid_string().unwrap();
        assert_eq!(text.len(), 36);
        assert_eq!(text.matches('-').count(), 4);

        // boot_id is stable across calls; a fresh UUID is not.
        assert_eq!(subsystem.boot_id().unwrap(), subsystem.boot_id().unwrap());
        assert_ne!(subsystem.random_uuid().unwrap(), uuid);
    }

    #[test]
    fn test_batched_words_served_during_boot_window() {
        let subsystem = test_subsystem();
        // No activation at all: words still flow (bootstrap-backed unless
        // hardware serves them directly).
        subsystem.get_random_u32().unwrap();
        subsystem.get_random_u64().unwrap();
    }

    #[test]
    fn test_rng_core_adapter() {
        use rand_core::RngCore;

        let subsystem = test_subsystem();
        subsystem.activate().unwrap();
        let mut rng = subsystem.rng();
        let mut buf = [0u8; 64];
        rng.try_fill_bytes(&mut buf).unwrap();
        assert!(buf.iter().any(|&b| b != 0));
        let _ = rng.next_u32();
        let _ = rng.next_u64();
    }

    #[test]
    fn test_hwgenerator_feed_credits_primary() {
        let subsystem = test_subsystem();
        subsystem.activate().unwrap();

        subsystem
            .add_hwgenerator_randomness(&[0xC3u8; SECURITY_STRENGTH_BYTES], 256)
            .unwrap();
        assert_eq!(subsystem.seed_stage(), SeedStage::FullySeeded);
    }

    #[test]
    fn test_seed_pass_latches_off_event_triggering() {
        let subsystem = test_subsystem();
        subsystem.activate().unwrap();

        let mut feeder = EventFeeder::new();
        // Walk the full ladder: 32, 128, 256 bits.
        for events in [32u32, 128, 256] {
            feeder.feed(&subsystem, events);
            run_reseed(&subsystem);
        }
        assert_eq!(subsystem.seed_stage(), SeedStage::FullySeeded);

        // One more pass marks every domain seeded and latches the
        // trigger off.
        run_reseed(&subsystem);
        assert!(subsystem.shared.all_domains_seeded.load(Ordering::Relaxed));
        // The guard was released by the latching pass.
        assert!(subsystem.shared.collector.try_begin_reseed());
        subsystem.shared.collector.end_reseed();
    }
}
