//! Elastic worker pool draining the [`JobQueue`].
//!
// Allow clippy lints that are allowed at the crate level but not picked up in this module
#![allow(clippy::must_use_candidate)]
//!
//! # Thread lifecycle
//!
//! ```text
//! Starting ──▶ Idle ⇄ Running ──▶ … ──▶ Retired
//! ```
//!
//! The pool starts with no workers. Enqueueing a job either wakes an idle
//! worker or asks a dedicated creator thread for a new one; the submitting
//! thread never spawns. The creator brings the pool up to `target_workers`,
//! then adds workers only while more jobs are queued than idle and starting
//! workers can take, never exceeding `max_workers` and never having more than
//! `max_starting` workers starting at once.
//!
//! A worker that waits `idle_lifetime` without a job retires if the pool is
//! above target. Worker ids are small integers reused after retirement.
//!
//! # Shutdown
//!
//! [`WorkerPool::shutdown`] closes the queue. Workers finish every job already
//! queued before exiting. [`WorkerPool::shutdown_and_wait`] also waits for the
//! threads and runs any jobs left behind on the calling thread.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use super::config::PoolConfig;
use super::job_queue::{Job, JobQueue, PoolStats, QueueState};
use crate::error::{Error, ErrorKind, Result};
use crate::observability::EngineMetrics;
use crate::tracing_compat::{debug, trace, warn};

struct PoolInner {
    config: PoolConfig,
    queue: JobQueue,
    metrics: Arc<EngineMetrics>,
    creator_running: AtomicBool,
    threads: Mutex<Vec<JoinHandle<()>>>,
    /// Spawn attempts that fail before reaching the OS.
    #[cfg(test)]
    failing_spawns: std::sync::atomic::AtomicUsize,
}

impl PoolInner {
    /// Creation rule: below target always, above it only for backlog.
    fn wants_worker(&self, state: &QueueState) -> bool {
        state.workers < self.config.max_workers
            && (state.workers < self.config.target_workers
                || state.jobs.len() > state.idle + state.starting)
    }
}

/// The worker pool.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

/// Cloneable handle for enqueueing onto a [`WorkerPool`].
#[derive(Clone)]
pub struct PoolHandle {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Validate `config` and start the creator thread. No workers are
    /// spawned until the first job arrives.
    pub fn new(mut config: PoolConfig, metrics: Arc<EngineMetrics>) -> Result<Self> {
        config.normalize();
        config.validate()?;
        let inner = Arc::new(PoolInner {
            queue: JobQueue::new(config.max_workers),
            config,
            metrics,
            creator_running: AtomicBool::new(true),
            threads: Mutex::new(Vec::new()),
            #[cfg(test)]
            failing_spawns: std::sync::atomic::AtomicUsize::new(0),
        });

        let creator_inner = Arc::clone(&inner);
        let creator = thread::Builder::new()
            .name(format!("{}-creator", inner.config.thread_name_prefix))
            .spawn(move || {
                creator_loop(&creator_inner);
                creator_inner.creator_running.store(false, Ordering::Release);
            })
            .map_err(|err| {
                Error::new(ErrorKind::SpawnFailed)
                    .with_message("failed to spawn worker creator thread")
                    .with_source(err)
            })?;
        inner.threads.lock().push(creator);

        debug!(
            target_workers = inner.config.target_workers,
            max_workers = inner.config.max_workers,
            idle_lifetime_ms = inner.config.idle_lifetime.as_millis() as u64,
            "worker pool started"
        );
        Ok(Self { inner })
    }

    /// A cloneable handle to this pool.
    #[must_use]
    pub fn handle(&self) -> PoolHandle {
        PoolHandle {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Queue a job. Fails with [`ErrorKind::Shutdown`] once the pool is
    /// shutting down.
    pub fn enqueue<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.queue.push(Box::new(job))
    }

    /// Counter snapshot.
    pub fn stats(&self) -> PoolStats {
        self.inner.queue.stats()
    }

    /// The configuration the pool runs with (after normalization).
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Returns `true` once shutdown has begun.
    pub fn is_shutdown(&self) -> bool {
        self.inner.queue.is_closed()
    }

    /// Stop accepting jobs. Queued jobs still run.
    pub fn shutdown(&self) {
        if !self.inner.queue.is_closed() {
            debug!("worker pool shutting down");
        }
        self.inner.queue.close();
    }

    /// Shut down and wait up to `timeout` for every thread to exit.
    ///
    /// Returns `true` if all threads exited in time.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        shutdown_and_wait_inner(&self.inner, timeout)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
        let _ = self.shutdown_and_wait(Duration::from_secs(5));
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("config", &self.inner.config)
            .field("queue", &self.inner.queue)
            .finish()
    }
}

impl PoolHandle {
    /// Queue a job.
    pub fn enqueue<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.queue.push(Box::new(job))
    }

    /// Counter snapshot.
    pub fn stats(&self) -> PoolStats {
        self.inner.queue.stats()
    }

    /// The configuration the pool runs with.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Returns `true` once shutdown has begun.
    pub fn is_shutdown(&self) -> bool {
        self.inner.queue.is_closed()
    }

    /// Stop accepting jobs.
    pub fn shutdown(&self) {
        self.inner.queue.close();
    }

    /// Shut down and wait for the threads.
    pub fn shutdown_and_wait(&self, timeout: Duration) -> bool {
        shutdown_and_wait_inner(&self.inner, timeout)
    }
}

impl fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolHandle")
            .field("stats", &self.stats())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

fn shutdown_and_wait_inner(inner: &Arc<PoolInner>, timeout: Duration) -> bool {
    inner.queue.close();
    let deadline = Instant::now() + timeout;
    let on_pool_thread = thread::current()
        .name()
        .is_some_and(|name| name.starts_with(inner.config.thread_name_prefix.as_str()));

    // Waiting on ourselves would never finish.
    if !on_pool_thread {
        loop {
            let workers = inner.queue.lock().workers;
            if workers == 0 && !inner.creator_running.load(Ordering::Acquire) {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            thread::sleep(Duration::from_millis(5).min(remaining));
        }

        let handles: Vec<JoinHandle<()>> = inner.threads.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }

    // Jobs queued after the last worker left, or while none had started.
    let leftovers: Vec<Job> = {
        let mut state = inner.queue.lock();
        if state.workers > 0 {
            return false;
        }
        state.jobs.drain(..).collect()
    };
    if !leftovers.is_empty() {
        debug!(jobs = leftovers.len(), "running jobs left at shutdown");
    }
    for job in leftovers {
        run_job(inner, None, job);
    }
    true
}

fn creator_loop(inner: &Arc<PoolInner>) {
    let queue = &inner.queue;
    let mut state = queue.lock();
    loop {
        if state.shutdown {
            break;
        }
        if !state.spawn_requested {
            queue.wait_for_spawn_request(&mut state);
            continue;
        }
        if !inner.wants_worker(&state) {
            state.spawn_requested = false;
            continue;
        }
        if state.starting >= inner.config.max_starting {
            // A worker finishing startup wakes us.
            queue.wait_for_spawn_request(&mut state);
            continue;
        }

        let id = state.ids.allocate();
        state.workers += 1;
        state.starting += 1;
        let spawned = MutexGuard::unlocked(&mut state, || spawn_worker(inner, id));
        match spawned {
            Ok(()) => {
                inner.metrics.workers_spawned.increment();
                debug!(worker_id = id, workers = state.workers, "worker spawned");
            }
            Err(err) => {
                state.workers -= 1;
                state.starting -= 1;
                state.ids.release(id);
                state.spawn_requested = false;
                inner.metrics.spawn_failures.increment();
                warn!(worker_id = id, error = %err, "failed to spawn worker");
            }
        }
    }
    trace!("worker creator exiting");
}

fn spawn_worker(inner: &Arc<PoolInner>, id: usize) -> std::io::Result<()> {
    #[cfg(test)]
    if inner
        .failing_spawns
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
    {
        return Err(std::io::Error::other("thread limit reached"));
    }

    let worker_inner = Arc::clone(inner);
    let mut builder =
        thread::Builder::new().name(format!("{}-{}", inner.config.thread_name_prefix, id));
    if inner.config.thread_stack_size > 0 {
        builder = builder.stack_size(inner.config.thread_stack_size);
    }
    let handle = builder.spawn(move || {
        if let Some(callback) = &worker_inner.config.on_thread_start {
            callback();
        }
        worker_loop(&worker_inner, id);
        if let Some(callback) = &worker_inner.config.on_thread_stop {
            callback();
        }
    })?;

    let mut threads = inner.threads.lock();
    threads.retain(|handle| !handle.is_finished());
    threads.push(handle);
    Ok(())
}

fn worker_loop(inner: &Arc<PoolInner>, id: usize) {
    let queue = &inner.queue;
    let lifetime = inner.config.idle_lifetime;
    let mut state = queue.lock();
    state.starting -= 1;
    if state.spawn_requested {
        queue.notify_creator();
    }
    trace!(worker_id = id, "worker running");

    loop {
        if let Some(job) = state.jobs.pop_front() {
            MutexGuard::unlocked(&mut state, || run_job(inner, Some(id), job));
            continue;
        }
        if state.shutdown {
            debug!(worker_id = id, "worker exiting for shutdown");
            break;
        }

        state.idle += 1;
        let timed_out = queue.wait_for_work(&mut state, lifetime).timed_out();
        state.idle -= 1;

        if timed_out
            && state.jobs.is_empty()
            && !state.shutdown
            && state.workers > inner.config.target_workers
        {
            inner.metrics.workers_retired.increment();
            debug!(worker_id = id, workers = state.workers - 1, "idle worker retired");
            break;
        }
    }

    state.workers -= 1;
    state.ids.release(id);
}

fn run_job(inner: &PoolInner, worker_id: Option<usize>, job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        inner.metrics.job_panics.increment();
        warn!(worker_id = ?worker_id, "job panicked; worker continues");
    }
}
