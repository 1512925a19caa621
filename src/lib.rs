//! Streamaio: a completion engine for asynchronous I/O on byte-stream channels.
//!
//! # Overview
//!
//! Callers submit read and write requests against a [`Channel`]. Each channel
//! keeps one FIFO of pending requests per direction; when the channel reports
//! ready, a service task drains that FIFO with non-blocking attempts on an
//! elastic pool of worker threads. Every request resolves exactly once, with
//! the bytes it moved and an `Ok`, `Cancelled`, or `Failed` status.
//!
//! # Guarantees
//!
//! - **FIFO per direction**: requests on the same buffer complete in
//!   submission order
//! - **Exactly-once completion**: normal completion and cancellation race on
//!   one atomic transition; the loser is a no-op
//! - **No lost wakeups**: a readiness edge that lands while a buffer is
//!   parked always reschedules it
//! - **Bytes are never dropped**: cancelling a request that already moved data
//!   reports a short successful completion
//! - **Bounded pool**: worker count never exceeds the configured maximum and
//!   converges back to the target after idle periods
//!
//! # Module Structure
//!
//! - [`aio`]: requests, handles, channels, buffers, and the service loop
//! - [`runtime`]: worker pool, job queue, configuration, and the engine
//! - [`observability`]: engine counters
//! - [`error`]: error types
//! - [`tracing_compat`]: logging facade
//!
//! # Example
//!
//! ```ignore
//! use streamaio::{AsyncOp, Channel, EngineBuilder, MemoryPipe};
//!
//! let engine = EngineBuilder::new().target_workers(2).build()?;
//! let channel = Channel::new(&engine.handle(), MemoryPipe::new());
//! let pending = channel.submit(AsyncOp::read(1024))?;
//! channel.feed(b"hello");
//! let completion = pending.wait();
//! assert_eq!(completion.data(), b"hello");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod aio;
pub mod error;
pub mod observability;
pub mod runtime;
pub mod tracing_compat;

#[cfg(test)]
pub mod test_utils;

pub use aio::{
    AsyncOp, Attempt, AttemptContext, CancelState, Channel, Completion, CompletionPolicy,
    Credential, Direction, Endpoint, MemoryPipe, OpHandle, OpId, OpKind, OpStatus, ServiceState,
};
pub use error::{Error, ErrorKind, Result};
pub use observability::EngineMetrics;
pub use runtime::{AioEngine, BuildError, EngineBuilder, EngineHandle, PoolConfig, PoolStats};
