//! Shared FIFO of buffer-service jobs and the pool counters that size it.
//!
//! One lock guards the jobs together with the idle/starting/worker counts so
//! every sizing decision sees a consistent picture. Workers park on
//! `work_cv`; the creator thread parks on `spawn_cv`.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard, WaitTimeoutResult};

use crate::error::{Error, Result};
use crate::tracing_compat::trace;

/// A scheduled unit of work.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Worker threads alive, including ones still starting.
    pub workers: usize,
    /// Workers parked waiting for a job.
    pub idle: usize,
    /// Workers spawned but not yet running their loop.
    pub starting: usize,
    /// Jobs waiting for a worker.
    pub queued: usize,
}

/// Reusable small-integer worker ids, lowest free id first.
#[derive(Debug, Default)]
pub(crate) struct IdAllocator {
    free: BTreeSet<usize>,
    next: usize,
}

impl IdAllocator {
    pub(crate) fn allocate(&mut self) -> usize {
        if let Some(id) = self.free.pop_first() {
            return id;
        }
        let id = self.next;
        self.next += 1;
        id
    }

    pub(crate) fn release(&mut self, id: usize) {
        debug_assert!(id < self.next, "released an id that was never handed out");
        self.free.insert(id);
    }
}

pub(crate) struct QueueState {
    pub(crate) jobs: VecDeque<Job>,
    pub(crate) workers: usize,
    pub(crate) idle: usize,
    pub(crate) starting: usize,
    /// Set by `push` when the creator should consider adding a worker.
    pub(crate) spawn_requested: bool,
    pub(crate) shutdown: bool,
    pub(crate) ids: IdAllocator,
}

impl QueueState {
    pub(crate) fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers,
            idle: self.idle,
            starting: self.starting,
            queued: self.jobs.len(),
        }
    }
}

/// The process-wide job FIFO.
pub struct JobQueue {
    state: Mutex<QueueState>,
    work_cv: Condvar,
    spawn_cv: Condvar,
    max_workers: usize,
}

impl JobQueue {
    pub(crate) fn new(max_workers: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                workers: 0,
                idle: 0,
                starting: 0,
                spawn_requested: false,
                shutdown: false,
                ids: IdAllocator::default(),
            }),
            work_cv: Condvar::new(),
            spawn_cv: Condvar::new(),
            max_workers,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock()
    }

    /// Append a job.
    ///
    /// Wakes one idle worker if there is one. When more jobs are waiting than
    /// idle and starting workers can absorb, and the pool is below its
    /// maximum, asks the creator for another worker. Never spawns on the
    /// calling thread.
    pub(crate) fn push(&self, job: Job) -> Result<()> {
        let mut state = self.state.lock();
        if state.shutdown {
            return Err(Error::shutdown());
        }
        state.jobs.push_back(job);
        if state.idle > 0 {
            self.work_cv.notify_one();
        }
        if state.jobs.len() > state.idle + state.starting && state.workers < self.max_workers {
            if !state.spawn_requested {
                trace!(queued = state.jobs.len(), workers = state.workers, "requesting worker");
            }
            state.spawn_requested = true;
            self.spawn_cv.notify_one();
        }
        Ok(())
    }

    /// Park a worker until a job arrives or `timeout` elapses.
    pub(crate) fn wait_for_work(
        &self,
        state: &mut MutexGuard<'_, QueueState>,
        timeout: Duration,
    ) -> WaitTimeoutResult {
        self.work_cv.wait_for(state, timeout)
    }

    /// Park the creator until a spawn request or shutdown.
    pub(crate) fn wait_for_spawn_request(&self, state: &mut MutexGuard<'_, QueueState>) {
        self.spawn_cv.wait(state);
    }

    /// Nudge the creator, e.g. after a starting worker frees a throttle slot.
    pub(crate) fn notify_creator(&self) {
        self.spawn_cv.notify_one();
    }

    /// Stop accepting jobs and wake everything parked on the queue.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        drop(state);
        self.work_cv.notify_all();
        self.spawn_cv.notify_all();
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Jobs waiting for a worker.
    pub fn len(&self) -> usize {
        self.state.lock().jobs.len()
    }

    /// True when no job is waiting.
    pub fn is_empty(&self) -> bool {
        self.state.lock().jobs.is_empty()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> PoolStats {
        self.state.lock().stats()
    }

    /// Upper bound on worker threads.
    pub const fn max_workers(&self) -> usize {
        self.max_workers
    }
}

impl fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("JobQueue")
            .field("stats", &state.stats())
            .field("spawn_requested", &state.spawn_requested)
            .field("shutdown", &state.shutdown)
            .field("max_workers", &self.max_workers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn ids_are_reused_lowest_first() {
        crate::test_utils::init_test_logging();
        crate::test_phase!("ids_are_reused_lowest_first");
        let mut ids = IdAllocator::default();
        assert_eq!(ids.allocate(), 0);
        assert_eq!(ids.allocate(), 1);
        assert_eq!(ids.allocate(), 2);
        ids.release(2);
        ids.release(0);
        assert_eq!(ids.allocate(), 0);
        assert_eq!(ids.allocate(), 2);
        assert_eq!(ids.allocate(), 3);
        crate::test_complete!("ids_are_reused_lowest_first");
    }

    #[test]
    fn push_requests_worker_when_nobody_idle() {
        crate::test_utils::init_test_logging();
        let queue = JobQueue::new(2);
        queue.push(Box::new(|| {})).expect("push");
        let state = queue.lock();
        assert!(state.spawn_requested);
        assert_eq!(state.jobs.len(), 1);
    }

    #[test]
    fn push_does_not_request_past_max() {
        crate::test_utils::init_test_logging();
        let queue = JobQueue::new(1);
        queue.lock().workers = 1;
        queue.push(Box::new(|| {})).expect("push");
        assert!(!queue.lock().spawn_requested);
    }

    #[test]
    fn idle_worker_absorbs_push() {
        crate::test_utils::init_test_logging();
        let queue = JobQueue::new(4);
        {
            let mut state = queue.lock();
            state.workers = 1;
            state.idle = 1;
        }
        queue.push(Box::new(|| {})).expect("push");
        assert!(!queue.lock().spawn_requested);
        queue.push(Box::new(|| {})).expect("push");
        assert!(queue.lock().spawn_requested, "second job exceeds idle capacity");
    }

    #[test]
    fn closed_queue_rejects_jobs() {
        crate::test_utils::init_test_logging();
        let queue = JobQueue::new(1);
        queue.close();
        assert!(queue.is_closed());
        let err = queue.push(Box::new(|| {})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Shutdown);
        assert!(queue.is_empty());
        assert_eq!(queue.stats(), PoolStats::default());
    }
}
