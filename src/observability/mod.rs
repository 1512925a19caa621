//! Observability for the completion engine.
//!
//! Logging goes through [`tracing_compat`](crate::tracing_compat); this module
//! holds the counters the engine maintains alongside it.

pub mod metrics;

pub use metrics::{Counter, EngineMetrics, Gauge};
