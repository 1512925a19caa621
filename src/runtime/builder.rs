//! Engine builder and handles.
//!
//! ```ignore
//! use streamaio::runtime::EngineBuilder;
//!
//! let engine = EngineBuilder::from_env()?
//!     .target_workers(2)
//!     .max_workers(16)
//!     .build()?;
//! let channel = Channel::new(&engine.handle(), endpoint);
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::config::{BuildError, PoolConfig};
use super::env_config;
use super::job_queue::PoolStats;
use super::worker_pool::{PoolHandle, WorkerPool};
use crate::error::Result;
use crate::observability::EngineMetrics;

/// Builder for constructing an [`AioEngine`].
///
/// Later calls win: start from [`from_env`](Self::from_env) (or
/// [`from_toml_file`](Self::from_toml_file)) and explicit setters override
/// whatever the environment said.
#[derive(Clone, Debug)]
pub struct EngineBuilder {
    config: PoolConfig,
}

impl EngineBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
        }
    }

    /// Start from defaults with `STREAMAIO_*` environment overrides applied.
    pub fn from_env() -> std::result::Result<Self, BuildError> {
        let mut config = PoolConfig::default();
        env_config::apply_env_overrides(&mut config)?;
        Ok(Self { config })
    }

    /// Start from a TOML file, then apply environment overrides on top.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(path: &std::path::Path) -> std::result::Result<Self, BuildError> {
        let toml = env_config::parse_toml_file(path)?;
        let mut config = PoolConfig::default();
        env_config::apply_toml_config(&mut config, &toml);
        env_config::apply_env_overrides(&mut config)?;
        Ok(Self { config })
    }

    /// Start from an existing configuration.
    #[must_use]
    pub fn with_config(config: PoolConfig) -> Self {
        Self { config }
    }

    /// Set the number of workers kept resident while idle.
    #[must_use]
    pub fn target_workers(mut self, n: usize) -> Self {
        self.config.target_workers = n;
        self
    }

    /// Set the hard upper bound on worker threads.
    #[must_use]
    pub fn max_workers(mut self, n: usize) -> Self {
        self.config.max_workers = n;
        self
    }

    /// Set how long an idle worker above target lingers before retiring.
    #[must_use]
    pub fn idle_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.idle_lifetime = lifetime;
        self
    }

    /// Set how many workers may be starting at once.
    #[must_use]
    pub fn max_starting(mut self, n: usize) -> Self {
        self.config.max_starting = n;
        self
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub fn thread_stack_size(mut self, size: usize) -> Self {
        self.config.thread_stack_size = size;
        self
    }

    /// Service a ready channel on the submitting thread.
    #[must_use]
    pub fn inline_submit(mut self, enable: bool) -> Self {
        self.config.inline_submit = enable;
        self
    }

    /// Register a callback to run when a worker thread starts.
    #[must_use]
    pub fn on_thread_start<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.on_thread_start = Some(Arc::new(f));
        self
    }

    /// Register a callback to run when a worker thread stops.
    #[must_use]
    pub fn on_thread_stop<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.config.on_thread_stop = Some(Arc::new(f));
        self
    }

    /// The configuration built so far.
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Build an engine from this configuration.
    pub fn build(self) -> Result<AioEngine> {
        AioEngine::with_config(self.config)
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The completion engine: a worker pool plus its counters.
///
/// Dropping the engine shuts the pool down and waits briefly for workers.
pub struct AioEngine {
    pool: WorkerPool,
    handle: EngineHandle,
}

impl AioEngine {
    /// Construct an engine from the given configuration.
    pub fn with_config(config: PoolConfig) -> Result<Self> {
        let metrics = Arc::new(EngineMetrics::new());
        let inline_submit = config.inline_submit;
        let pool = WorkerPool::new(config, Arc::clone(&metrics))?;
        let handle = EngineHandle {
            pool: pool.handle(),
            metrics,
            inline_submit,
        };
        Ok(Self { pool, handle })
    }

    /// Returns a handle channels use to reach the engine.
    #[must_use]
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Engine counters.
    #[must_use]
    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.handle.metrics
    }

    /// Pool counter snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Returns a reference to the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        self.pool.config()
    }

    /// Returns `true` once shutdown has begun.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.pool.is_shutdown()
    }

    /// Stop accepting work. Already scheduled service tasks still run.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    /// Shut down and wait up to `timeout` for the workers to exit.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        self.pool.shutdown_and_wait(timeout)
    }
}

impl fmt::Debug for AioEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AioEngine")
            .field("pool", &self.pool)
            .field("inline_submit", &self.handle.inline_submit)
            .finish()
    }
}

/// Shared handle to an engine, held by every channel it services.
#[derive(Clone)]
pub struct EngineHandle {
    pool: PoolHandle,
    metrics: Arc<EngineMetrics>,
    inline_submit: bool,
}

impl EngineHandle {
    /// Engine counters.
    #[must_use]
    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    /// Pool counter snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Returns `true` once shutdown has begun.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.pool.is_shutdown()
    }

    /// Whether ready channels are serviced on the submitting thread.
    #[must_use]
    pub const fn inline_submit(&self) -> bool {
        self.inline_submit
    }

    pub(crate) fn enqueue<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.enqueue(job)
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("pool", &self.pool)
            .field("inline_submit", &self.inline_submit)
            .finish()
    }
}
