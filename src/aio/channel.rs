//! Channels and the endpoint interface the engine drives.
//!
//! A [`Channel`] wraps a protocol-level [`Endpoint`] (a stream socket, a pipe,
//! anything byte-oriented) and owns one [`Buffer`] per direction. The engine
//! only ever calls the endpoint's non-blocking `attempt_*` primitives; the
//! channel's own blocking mode just picks the default completion policy.
//!
//! Endpoints report readiness edges by calling [`Channel::notify_ready`]
//! after data arrives or send space frees up.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::buffer::{Buffer, ServiceState};
use super::dispatch;
use super::op::{AsyncOp, CancelSite, CompletionPolicy, Credential, OpHandle, OpId};
use crate::error::Result;
use crate::runtime::EngineHandle;

/// One half of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Data flowing in from the peer.
    Receive,
    /// Data flowing out to the peer.
    Send,
}

/// Result of a single non-blocking I/O attempt.
#[derive(Debug)]
pub enum Attempt {
    /// `n` bytes moved. A short count means the channel ran dry (receive) or
    /// full (send) part way through.
    Progress(usize),
    /// Nothing moved; the channel is not ready after all.
    WouldBlock,
    /// The peer closed its side; no more data will arrive.
    Eof,
    /// Hard error. Ends the op.
    Failed(io::Error),
}

/// Per-attempt information handed to the endpoint.
#[derive(Debug)]
pub struct AttemptContext<'a> {
    /// Op being serviced.
    pub op_id: OpId,
    /// Security context captured when the op was submitted.
    pub credential: Option<&'a Credential>,
    /// More send data is queued behind this attempt; endpoints may batch.
    pub more_coming: bool,
}

/// The protocol-layer half of a channel.
///
/// Implementations must never block in `attempt_receive`/`attempt_send`:
/// if no progress is possible they return [`Attempt::WouldBlock`].
/// `is_ready` is called with the direction's buffer lock held and must not
/// call back into the channel.
pub trait Endpoint: Send + Sync + 'static {
    /// Data available (receive) or space available (send).
    fn is_ready(&self, direction: Direction) -> bool;

    /// Copy available data into `buf`.
    fn attempt_receive(&self, buf: &mut [u8], cx: &AttemptContext<'_>) -> Attempt;

    /// Copy as much of `buf` as fits into the send side.
    fn attempt_send(&self, buf: &[u8], cx: &AttemptContext<'_>) -> Attempt;

    /// Listening channels accept connections, not data.
    fn is_listening(&self) -> bool {
        false
    }
}

/// A byte-stream channel serviced by the completion engine.
pub struct Channel<E: Endpoint> {
    endpoint: E,
    engine: EngineHandle,
    receive: Buffer,
    send: Buffer,
    nonblocking: AtomicBool,
}

impl<E: Endpoint> Channel<E> {
    /// Wrap `endpoint` and register it with `engine`.
    pub fn new(engine: &EngineHandle, endpoint: E) -> Arc<Self> {
        Arc::new(Self {
            endpoint,
            engine: engine.clone(),
            receive: Buffer::new(Direction::Receive),
            send: Buffer::new(Direction::Send),
            nonblocking: AtomicBool::new(true),
        })
    }

    /// The wrapped endpoint.
    pub const fn endpoint(&self) -> &E {
        &self.endpoint
    }

    /// The engine servicing this channel.
    pub const fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Queue an op.
    ///
    /// Reads go to the receive buffer, writes to the send buffer. Fails with
    /// [`ErrorKind::InvalidChannelState`](crate::ErrorKind::InvalidChannelState)
    /// on a listening channel, and with
    /// [`ErrorKind::Shutdown`](crate::ErrorKind::Shutdown) once the engine has
    /// stopped; in both cases nothing is queued.
    pub fn submit(self: &Arc<Self>, op: AsyncOp) -> Result<OpHandle> {
        dispatch::submit(self, op)
    }

    /// Report that `direction` may have become ready.
    ///
    /// Idempotent: a buffer that already has a service task scheduled ignores
    /// the call beyond noting it.
    pub fn notify_ready(self: &Arc<Self>, direction: Direction) {
        dispatch::notify_ready(self, direction);
    }

    /// Endpoint readiness for `direction`.
    pub fn is_ready(&self, direction: Direction) -> bool {
        self.endpoint.is_ready(direction)
    }

    /// Whether the endpoint is a listening channel.
    pub fn is_listening(&self) -> bool {
        self.endpoint.is_listening()
    }

    /// Set the externally visible blocking mode.
    ///
    /// Attempts are always non-blocking; the mode only picks the default
    /// completion policy for sends. A blocking channel keeps a short write at
    /// the head of the queue until all of it is accepted. Reads complete on a
    /// short transfer in either mode.
    pub fn set_nonblocking(&self, nonblocking: bool) {
        self.nonblocking.store(nonblocking, Ordering::Relaxed);
    }

    /// Externally visible blocking mode.
    pub fn is_nonblocking(&self) -> bool {
        self.nonblocking.load(Ordering::Relaxed)
    }

    /// Completion policy for ops in `direction` that do not set their own.
    pub fn default_policy(&self, direction: Direction) -> CompletionPolicy {
        if direction == Direction::Send && !self.is_nonblocking() {
            CompletionPolicy::Fill
        } else {
            CompletionPolicy::Partial
        }
    }

    /// Number of ops waiting on `direction`.
    pub fn queued(&self, direction: Direction) -> usize {
        self.buffer(direction).len()
    }

    /// Whether op `id` is still waiting on `direction`.
    pub fn is_queued(&self, direction: Direction, id: OpId) -> bool {
        self.buffer(direction).contains(id)
    }

    /// Scheduling state of `direction`'s buffer.
    pub fn service_state(&self, direction: Direction) -> ServiceState {
        self.buffer(direction).service_state()
    }

    pub(crate) const fn buffer(&self, direction: Direction) -> &Buffer {
        match direction {
            Direction::Receive => &self.receive,
            Direction::Send => &self.send,
        }
    }
}

impl<E: Endpoint> CancelSite for Channel<E> {
    fn cancel_queued(&self, direction: Direction, id: OpId) -> Option<AsyncOp> {
        self.buffer(direction).remove(id)
    }
}

impl<E: Endpoint + fmt::Debug> fmt::Debug for Channel<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("endpoint", &self.endpoint)
            .field("receive", &self.receive)
            .field("send", &self.send)
            .field("nonblocking", &self.is_nonblocking())
            .finish_non_exhaustive()
    }
}
