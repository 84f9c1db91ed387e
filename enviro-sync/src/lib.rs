//! Enviro Sync - Concurrency Primitives for the Enviro Engine
//!
//! The container, image and volume managers serialise mutations per resource
//! ID through [`KeyedLock`], and the event, log and stats streams decouple
//! their producers from slower readers through [`RingBuffer`].
//!
//! # Performance-First Design Patterns:
//! - Per-key blocking, so unrelated resources never contend
//! - Short critical sections on shared tables, never held across a wait
//! - Fixed, pre-allocated buffer storage with overwrite instead of backpressure

pub mod config;
pub mod error;
pub mod stats;
pub mod sync;
pub mod workload;

pub use config::{KeyedLockConfig, RingBufferConfig, SyncConfig};
pub use error::SyncError;
pub use stats::{LockSnapshot, RingSnapshot};
pub use sync::{KeyGuard, KeyedLock, RingBuffer};
pub use workload::{run_workload, WorkloadOptions, WorkloadReport};

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber.
///
/// Honours `RUST_LOG`; defaults to `info`.  Fails if a subscriber is
/// already installed.
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
