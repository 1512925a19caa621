//! Completion-based I/O on byte-stream channels.
//!
//! Callers build an [`AsyncOp`], submit it to a [`Channel`], and get back an
//! [`OpHandle`] that resolves with exactly one [`Completion`]. Each channel
//! direction keeps a FIFO [`Buffer`] of pending ops; when the channel becomes
//! ready a service task drains that FIFO on the engine's worker pool.

pub mod buffer;
pub mod channel;
pub(crate) mod dispatch;
pub mod op;
pub mod pipe;

pub use buffer::{Buffer, ServiceState};
pub use channel::{Attempt, AttemptContext, Channel, Direction, Endpoint};
pub use dispatch::MAX_EMPTY_RETRIES;
pub use op::{
    AsyncOp, CancelState, Completion, CompletionPolicy, Credential, OpHandle, OpId, OpKind,
    OpStatus,
};
pub use pipe::{MemoryPipe, SendRecord};
