//! Engine metrics.
//!
//! Counters and gauges for op throughput, channel races, and worker churn.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    value: AtomicU64,
}

impl Counter {
    pub(crate) const fn new(name: &'static str) -> Self {
        Self {
            name,
            value: AtomicU64::new(0),
        }
    }

    /// Increments the counter by 1.
    pub fn increment(&self) {
        self.add(1);
    }

    /// Adds a value to the counter.
    pub fn add(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    /// Returns the current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Returns the counter name.
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

/// A gauge that can go up and down.
#[derive(Debug)]
pub struct Gauge {
    name: &'static str,
    value: AtomicI64,
}

impl Gauge {
    pub(crate) const fn new(name: &'static str) -> Self {
        Self {
            name,
            value: AtomicI64::new(0),
        }
    }

    /// Increments the gauge by 1.
    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrements the gauge by 1.
    pub fn decrement(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    /// Returns the current value.
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Returns the gauge name.
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

/// The engine's counter set, shared by the dispatcher and the worker pool.
#[derive(Debug)]
pub struct EngineMetrics {
    /// Ops accepted by `submit`.
    pub ops_submitted: Counter,
    /// Ops completed normally (including partial completions).
    pub ops_completed: Counter,
    /// Ops completed with a cancelled status.
    pub ops_cancelled: Counter,
    /// Ops completed with a channel error.
    pub ops_failed: Counter,
    /// Bytes moved across all ops.
    pub bytes_transferred: Counter,
    /// Attempts that would-blocked without progress.
    pub empty_results: Counter,
    /// Immediate retries after an empty result on a still-ready channel.
    pub empty_retries: Counter,
    /// Buffer service tasks placed on the job queue.
    pub jobs_scheduled: Counter,
    /// Worker threads started.
    pub workers_spawned: Counter,
    /// Worker threads retired after idling.
    pub workers_retired: Counter,
    /// Worker spawn attempts that failed.
    pub spawn_failures: Counter,
    /// Jobs that panicked on a worker.
    pub job_panics: Counter,
    /// Ops currently owned by the engine.
    pub ops_in_flight: Gauge,
}

impl EngineMetrics {
    /// Creates a zeroed counter set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ops_submitted: Counter::new("streamaio_ops_submitted_total"),
            ops_completed: Counter::new("streamaio_ops_completed_total"),
            ops_cancelled: Counter::new("streamaio_ops_cancelled_total"),
            ops_failed: Counter::new("streamaio_ops_failed_total"),
            bytes_transferred: Counter::new("streamaio_bytes_transferred_total"),
            empty_results: Counter::new("streamaio_empty_results_total"),
            empty_retries: Counter::new("streamaio_empty_retries_total"),
            jobs_scheduled: Counter::new("streamaio_jobs_scheduled_total"),
            workers_spawned: Counter::new("streamaio_workers_spawned_total"),
            workers_retired: Counter::new("streamaio_workers_retired_total"),
            spawn_failures: Counter::new("streamaio_spawn_failures_total"),
            job_panics: Counter::new("streamaio_job_panics_total"),
            ops_in_flight: Gauge::new("streamaio_ops_in_flight"),
        }
    }

    fn counters(&self) -> [&Counter; 12] {
        [
            &self.ops_submitted,
            &self.ops_completed,
            &self.ops_cancelled,
            &self.ops_failed,
            &self.bytes_transferred,
            &self.empty_results,
            &self.empty_retries,
            &self.jobs_scheduled,
            &self.workers_spawned,
            &self.workers_retired,
            &self.spawn_failures,
            &self.job_panics,
        ]
    }

    /// Exports all metrics in Prometheus text format.
    #[must_use]
    pub fn export_prometheus(&self) -> String {
        use std::fmt::Write;

        let mut output = String::new();
        for counter in self.counters() {
            let _ = writeln!(output, "# TYPE {} counter", counter.name());
            let _ = writeln!(output, "{} {}", counter.name(), counter.get());
        }
        let gauge = &self.ops_in_flight;
        let _ = writeln!(output, "# TYPE {} gauge", gauge.name());
        let _ = writeln!(output, "{} {}", gauge.name(), gauge.get());
        output
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
