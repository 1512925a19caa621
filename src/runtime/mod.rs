//! Worker pool and engine plumbing.
//!
//! - [`config`]: pool configuration and validation
//! - [`env_config`]: environment and TOML overrides
//! - [`builder`]: [`EngineBuilder`], [`AioEngine`], and [`EngineHandle`]
//! - [`job_queue`]: the shared job FIFO and pool counters
//! - [`worker_pool`]: worker threads, the creator thread, and retirement
//! - [`global`]: the process-wide engine
//!
//! # Engine Builder
//!
//! The engine is configured with a move-based builder. Each method consumes
//! `self` and returns the updated builder.
//!
//! ```ignore
//! use streamaio::runtime::EngineBuilder;
//! use std::time::Duration;
//!
//! let engine = EngineBuilder::new()
//!     .target_workers(2)
//!     .max_workers(8)
//!     .idle_lifetime(Duration::from_secs(10))
//!     .build()?;
//! ```

pub mod builder;
pub mod config;
pub mod env_config;
pub mod global;
pub mod job_queue;
pub mod worker_pool;

pub use builder::{AioEngine, EngineBuilder, EngineHandle};
pub use config::{BuildError, PoolConfig};
pub use job_queue::{JobQueue, PoolStats};
pub use worker_pool::{PoolHandle, WorkerPool};
