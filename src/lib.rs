//! Layered entropy management.
//!
//! `noisepool` collects weak, noisy timing and event data into an
//! LFSR-mixed pool, estimates the accumulated entropy, and feeds a
//! two-tier deterministic generator hierarchy with strict seeding
//! guarantees: no byte leaves the high-assurance path before provable
//! entropy accumulation backs it.
//!
//! # Architecture
//!
//! - [`pool`]: the lock-free entropy pool and the noise-event collector
//!   with stuck-event rejection.
//! - [`drng`]: the primary DRNG (sole pool consumer, seeding-stage
//!   authority), per-domain secondary DRNGs for bulk output, the
//!   boot-window bootstrap RNG and the batched single-word caches.
//! - [`sources`]: opportunistic fast noise sources (CPU jitter, hardware
//!   RNG instructions, timestamping).
//! - [`backend`]: the opaque cipher primitives (ChaCha20 stream core,
//!   keyed BLAKE3 pool digest).
//! - [`subsystem`]: the [`EntropySubsystem`] context object and the whole
//!   public API surface.
//!
//! # Example
//!
//! ```no_run
//! use noisepool::{Config, EntropySubsystem};
//!
//! let rng = EntropySubsystem::new(Config::default())?;
//! // Wire up event feeds, then:
//! rng.activate()?;
//!
//! let mut key = [0u8; 32];
//! rng.get_random_bytes(&mut key)?;
//! # Ok::<(), noisepool::Error>(())
//! ```

pub mod backend;
pub mod config;
pub mod drng;
pub mod pool;
pub mod sources;
pub mod subsystem;

mod util;
mod worker;

pub use backend::BackendError;
pub use config::Config;
pub use drng::SeedStage;
pub use subsystem::{EntropySubsystem, Error, ReadyToken, Status, SubsystemRng};
