//! Asynchronous read/write requests and their completion handles.
//!
//! An [`AsyncOp`] is built by the submitter and handed to
//! [`Channel::submit`](super::Channel::submit), which returns an [`OpHandle`].
//! From then on the engine owns the op; the submitter observes it only through
//! the handle, which resolves exactly once with a [`Completion`].
//!
//! # Cancellation protocol
//!
//! Every op carries a small atomic state machine:
//!
//! ```text
//!            claim                 rearm
//!   Armed ──────────▶ InFlight ──────────▶ Armed
//!     │                  │
//!     │ cancel           │ cancel
//!     ▼                  ▼
//!  Cancelled       CancelPending ──(attempt boundary)──▶ completion
//! ```
//!
//! The worker claims an op (`Armed → InFlight`) before touching the channel;
//! a canceller flips `Armed → Cancelled`. Both race on the same transition, so
//! exactly one side decides the outcome. A cancel that lands while the op is in
//! flight is parked as `CancelPending` and honoured when the attempt returns.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::channel::Direction;
use crate::error::Error;
use crate::observability::EngineMetrics;
use crate::tracing_compat::trace;

/// Opaque security context captured at submission and shown to the endpoint
/// on every attempt.
pub type Credential = Arc<dyn Any + Send + Sync>;

static NEXT_OP_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a submitted op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpId(u64);

impl OpId {
    fn next() -> Self {
        Self(NEXT_OP_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// Whether an op reads from or writes to its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Receive bytes into the op's buffer.
    Read,
    /// Send bytes from the op's buffer.
    Write,
}

impl OpKind {
    /// The channel direction this op is queued on.
    #[must_use]
    pub const fn direction(self) -> Direction {
        match self {
            Self::Read => Direction::Receive,
            Self::Write => Direction::Send,
        }
    }
}

/// When an op that has made some progress is reported complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompletionPolicy {
    /// Complete as soon as the channel would block after any progress
    /// (non-blocking stream semantics).
    #[default]
    Partial,
    /// Keep attempting while the channel stays ready. A write stays at the
    /// head of the queue until the span is full, EOF, or a hard error
    /// (blocking stream semantics). A read completes with whatever it holds
    /// once the channel runs dry.
    Fill,
}

/// Terminal status of an op.
#[derive(Debug, Clone)]
pub enum OpStatus {
    /// Completed; `transferred` may be short of the requested span.
    Ok,
    /// Cancelled before any byte moved.
    Cancelled,
    /// The channel reported a hard error.
    Failed(Error),
}

/// The single result delivered for every submitted op.
#[derive(Debug)]
pub struct Completion {
    id: OpId,
    kind: OpKind,
    transferred: usize,
    status: OpStatus,
    eof: bool,
    buffer: Vec<u8>,
    offset: usize,
}

impl Completion {
    /// The op this completion belongs to.
    #[must_use]
    pub const fn id(&self) -> OpId {
        self.id
    }

    /// Read or write.
    #[must_use]
    pub const fn kind(&self) -> OpKind {
        self.kind
    }

    /// Bytes moved before the op finished.
    #[must_use]
    pub const fn transferred(&self) -> usize {
        self.transferred
    }

    /// Terminal status.
    #[must_use]
    pub const fn status(&self) -> &OpStatus {
        &self.status
    }

    /// True for [`OpStatus::Ok`].
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self.status, OpStatus::Ok)
    }

    /// True for [`OpStatus::Cancelled`].
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.status, OpStatus::Cancelled)
    }

    /// The channel reached end-of-stream while servicing this op.
    #[must_use]
    pub const fn is_eof(&self) -> bool {
        self.eof
    }

    /// The error, for [`OpStatus::Failed`].
    #[must_use]
    pub const fn error(&self) -> Option<&Error> {
        match &self.status {
            OpStatus::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// The bytes actually transferred (received data for reads, the sent
    /// prefix for writes).
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.buffer[self.offset..self.offset + self.transferred]
    }

    /// Returns the op's buffer to the caller.
    #[must_use]
    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }
}

// ---------------------------------------------------------------------------
// Cancellation state machine
// ---------------------------------------------------------------------------

const ARMED: u8 = 0;
const IN_FLIGHT: u8 = 1;
const CANCEL_PENDING: u8 = 2;
const CANCELLED: u8 = 3;
const DONE: u8 = 4;

/// Observable state of an op's cancellation cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelState {
    /// Queued; either the worker or a canceller may claim it.
    Armed,
    /// Claimed by a worker; an I/O attempt may be running.
    InFlight,
    /// Cancel requested while in flight; honoured at the next attempt boundary.
    CancelPending,
    /// Claimed by a canceller.
    Cancelled,
    /// Completion delivered.
    Done,
}

/// What a cancel request achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CancelRequest {
    /// The canceller won; it must pull the op out of its queue.
    Claimed,
    /// The op is in flight; the worker will finish it at the next boundary.
    Deferred,
    /// Already cancelled or completed.
    Ignored,
}

struct CancelCell(AtomicU8);

impl CancelCell {
    const fn new() -> Self {
        Self(AtomicU8::new(ARMED))
    }

    fn state(&self) -> CancelState {
        match self.0.load(Ordering::Acquire) {
            ARMED => CancelState::Armed,
            IN_FLIGHT => CancelState::InFlight,
            CANCEL_PENDING => CancelState::CancelPending,
            CANCELLED => CancelState::Cancelled,
            _ => CancelState::Done,
        }
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.0
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn request_cancel(&self) -> CancelRequest {
        let mut current = self.0.load(Ordering::Acquire);
        loop {
            let next = match current {
                ARMED => CANCELLED,
                IN_FLIGHT => CANCEL_PENDING,
                _ => return CancelRequest::Ignored,
            };
            match self
                .0
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) if next == CANCELLED => return CancelRequest::Claimed,
                Ok(_) => return CancelRequest::Deferred,
                Err(actual) => current = actual,
            }
        }
    }

    fn finish(&self) {
        self.0.store(DONE, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Shared state between the op and its handle
// ---------------------------------------------------------------------------

/// Where a queued op can be pulled back out for cancellation.
pub(crate) trait CancelSite: Send + Sync {
    /// Remove op `id` from the `direction` queue if it is still there.
    fn cancel_queued(&self, direction: Direction, id: OpId) -> Option<AsyncOp>;
}

#[derive(Default)]
struct CompletionSlot {
    completion: Option<Completion>,
    fired: bool,
    taken: bool,
    waker: Option<Waker>,
}

struct OpShared {
    id: OpId,
    kind: OpKind,
    cancel: CancelCell,
    slot: Mutex<CompletionSlot>,
    done: Condvar,
    site: Mutex<Option<Weak<dyn CancelSite>>>,
}

impl OpShared {
    fn deliver(&self, completion: Completion) {
        self.cancel.finish();
        let waker = {
            let mut slot = self.slot.lock();
            debug_assert!(!slot.fired, "op completed twice");
            slot.fired = true;
            slot.completion = Some(completion);
            self.done.notify_all();
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

// ---------------------------------------------------------------------------
// AsyncOp
// ---------------------------------------------------------------------------

/// A pending asynchronous read or write.
///
/// The span is `buffer[offset..]`. Reads fill it, writes drain it.
pub struct AsyncOp {
    shared: Arc<OpShared>,
    buffer: Vec<u8>,
    offset: usize,
    done: usize,
    policy: Option<CompletionPolicy>,
    credential: Option<Credential>,
    final_segment: bool,
    metrics: Option<Arc<EngineMetrics>>,
    completed: bool,
}

impl AsyncOp {
    fn new(kind: OpKind, buffer: Vec<u8>, offset: usize) -> Self {
        let offset = offset.min(buffer.len());
        Self {
            shared: Arc::new(OpShared {
                id: OpId::next(),
                kind,
                cancel: CancelCell::new(),
                slot: Mutex::new(CompletionSlot::default()),
                done: Condvar::new(),
                site: Mutex::new(None),
            }),
            buffer,
            offset,
            done: 0,
            policy: None,
            credential: None,
            final_segment: true,
            metrics: None,
            completed: false,
        }
    }

    /// A read of up to `len` bytes into a fresh buffer.
    #[must_use]
    pub fn read(len: usize) -> Self {
        Self::new(OpKind::Read, vec![0; len], 0)
    }

    /// A read into `buffer[offset..]`.
    #[must_use]
    pub fn read_into(buffer: Vec<u8>, offset: usize) -> Self {
        Self::new(OpKind::Read, buffer, offset)
    }

    /// A write of all of `data`.
    #[must_use]
    pub fn write(data: impl Into<Vec<u8>>) -> Self {
        Self::new(OpKind::Write, data.into(), 0)
    }

    /// A write of `data[offset..]`.
    #[must_use]
    pub fn write_from(data: Vec<u8>, offset: usize) -> Self {
        Self::new(OpKind::Write, data, offset)
    }

    /// Override the channel's completion policy for this op.
    #[must_use]
    pub fn with_policy(mut self, policy: CompletionPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Attach the submitter's security context.
    #[must_use]
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Mark this write as one segment of a larger message with more to follow.
    #[must_use]
    pub fn more_segments(mut self) -> Self {
        self.final_segment = false;
        self
    }

    /// The op's id.
    #[must_use]
    pub fn id(&self) -> OpId {
        self.shared.id
    }

    /// Read or write.
    #[must_use]
    pub fn kind(&self) -> OpKind {
        self.shared.kind
    }

    /// Requested span length.
    #[must_use]
    pub fn span(&self) -> usize {
        self.buffer.len() - self.offset
    }

    /// Bytes moved so far.
    #[must_use]
    pub const fn transferred(&self) -> usize {
        self.done
    }

    /// Bytes still to move.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.span() - self.done
    }

    /// Explicit policy, if one was set.
    #[must_use]
    pub const fn policy(&self) -> Option<CompletionPolicy> {
        self.policy
    }

    /// Captured security context.
    #[must_use]
    pub const fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// False when more segments of the same message follow this write.
    #[must_use]
    pub const fn is_final_segment(&self) -> bool {
        self.final_segment
    }

    /// Current cancellation state.
    #[must_use]
    pub fn cancel_state(&self) -> CancelState {
        self.shared.cancel.state()
    }

    pub(crate) fn handle(&self) -> OpHandle {
        OpHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Hand the op to the engine: remember where it is queued and start
    /// counting it as in flight.
    pub(crate) fn attach(&mut self, metrics: Arc<EngineMetrics>, site: Weak<dyn CancelSite>) {
        metrics.ops_submitted.increment();
        metrics.ops_in_flight.increment();
        self.metrics = Some(metrics);
        *self.shared.site.lock() = Some(site);
    }

    pub(crate) fn unfilled_mut(&mut self) -> &mut [u8] {
        let start = self.offset + self.done;
        &mut self.buffer[start..]
    }

    pub(crate) fn unsent(&self) -> &[u8] {
        &self.buffer[self.offset + self.done..]
    }

    pub(crate) fn advance(&mut self, n: usize) {
        self.done += n.min(self.remaining());
    }

    /// `Armed → InFlight`. Fails when a canceller got there first.
    pub(crate) fn claim(&self) -> bool {
        self.shared.cancel.transition(ARMED, IN_FLIGHT)
    }

    /// `InFlight → Armed` before going back on the queue. Fails when a cancel
    /// arrived during the attempt.
    pub(crate) fn rearm(&self) -> bool {
        self.shared.cancel.transition(IN_FLIGHT, ARMED)
    }

    pub(crate) fn cancel_pending(&self) -> bool {
        self.shared.cancel.state() == CancelState::CancelPending
    }

    /// Deliver the completion. Consumes the op so it can fire only once.
    pub(crate) fn complete(mut self, status: OpStatus, eof: bool) {
        self.deliver(status, eof);
    }

    /// Finish a cancelled op. Bytes already moved are reported as a short
    /// successful completion rather than discarded.
    pub(crate) fn finish_cancelled(mut self) {
        let status = if self.done > 0 {
            OpStatus::Ok
        } else {
            OpStatus::Cancelled
        };
        self.deliver(status, false);
    }

    fn deliver(&mut self, status: OpStatus, eof: bool) {
        if self.completed {
            return;
        }
        self.completed = true;
        if let Some(metrics) = self.metrics.take() {
            metrics.ops_in_flight.decrement();
            metrics.bytes_transferred.add(self.done as u64);
            match &status {
                OpStatus::Ok => metrics.ops_completed.increment(),
                OpStatus::Cancelled => metrics.ops_cancelled.increment(),
                OpStatus::Failed(_) => metrics.ops_failed.increment(),
            }
        }
        trace!(
            op_id = self.shared.id.as_u64(),
            transferred = self.done,
            status = ?status,
            eof,
            "op completed"
        );
        let completion = Completion {
            id: self.shared.id,
            kind: self.shared.kind,
            transferred: self.done,
            status,
            eof,
            buffer: std::mem::take(&mut self.buffer),
            offset: self.offset,
        };
        self.shared.deliver(completion);
    }
}

impl Drop for AsyncOp {
    fn drop(&mut self) {
        if !self.completed {
            // Dropped by a teardown path (channel freed with ops still queued).
            let status = if self.done > 0 {
                OpStatus::Ok
            } else {
                OpStatus::Cancelled
            };
            self.deliver(status, false);
        }
    }
}

impl fmt::Debug for AsyncOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncOp")
            .field("id", &self.shared.id)
            .field("kind", &self.shared.kind)
            .field("span", &self.span())
            .field("transferred", &self.done)
            .field("policy", &self.policy)
            .field("final_segment", &self.final_segment)
            .field("credential", &self.credential.is_some())
            .field("cancel", &self.shared.cancel.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// OpHandle
// ---------------------------------------------------------------------------

/// Submitter-side handle for an op owned by the engine.
///
/// Resolves exactly once. It can be waited on from a thread or awaited as a
/// [`Future`]. Dropping the handle does not cancel the op.
pub struct OpHandle {
    shared: Arc<OpShared>,
}

impl OpHandle {
    /// The op's id.
    #[must_use]
    pub fn id(&self) -> OpId {
        self.shared.id
    }

    /// Read or write.
    #[must_use]
    pub fn kind(&self) -> OpKind {
        self.shared.kind
    }

    /// Current cancellation state.
    #[must_use]
    pub fn cancel_state(&self) -> CancelState {
        self.shared.cancel.state()
    }

    /// Request cancellation.
    ///
    /// If the op is still queued it is removed and completes with
    /// [`OpStatus::Cancelled`] (or [`OpStatus::Ok`] with the bytes already
    /// moved). If a worker is mid-attempt, the cancel takes effect when the
    /// attempt returns. Otherwise this is a no-op.
    pub fn cancel(&self) {
        match self.shared.cancel.request_cancel() {
            CancelRequest::Claimed => {
                let site = self.shared.site.lock().as_ref().and_then(Weak::upgrade);
                let Some(site) = site else {
                    // Channel already gone; its teardown completes the op.
                    return;
                };
                let direction = self.shared.kind.direction();
                if let Some(op) = site.cancel_queued(direction, self.shared.id) {
                    trace!(op_id = self.shared.id.as_u64(), "cancelled queued op");
                    op.finish_cancelled();
                }
                // Not found: a worker popped it and will see the failed claim.
            }
            CancelRequest::Deferred => {
                trace!(op_id = self.shared.id.as_u64(), "cancel deferred to attempt boundary");
            }
            CancelRequest::Ignored => {}
        }
    }

    /// Whether the completion has been delivered.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.shared.slot.lock().fired
    }

    /// Block until the op completes and return its completion.
    #[must_use]
    pub fn wait(self) -> Completion {
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(completion) = slot.completion.take() {
                slot.taken = true;
                return completion;
            }
            self.shared.done.wait(&mut slot);
        }
    }

    /// Block until the op completes or `timeout` elapses.
    ///
    /// Returns `true` if the op completed.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut slot = self.shared.slot.lock();
        while !slot.fired {
            if self.shared.done.wait_until(&mut slot, deadline).timed_out() {
                return slot.fired;
            }
        }
        true
    }

    /// Take the completion if it has been delivered, otherwise give the
    /// handle back.
    pub fn try_wait(self) -> Result<Completion, Self> {
        let taken = {
            let mut slot = self.shared.slot.lock();
            let taken = slot.completion.take();
            if taken.is_some() {
                slot.taken = true;
            }
            taken
        };
        taken.ok_or(self)
    }
}

impl Future for OpHandle {
    type Output = Completion;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Completion> {
        let mut slot = self.shared.slot.lock();
        if let Some(completion) = slot.completion.take() {
            slot.taken = true;
            return Poll::Ready(completion);
        }
        assert!(!slot.taken, "OpHandle polled after completion");
        match &mut slot.waker {
            Some(existing) if existing.will_wake(cx.waker()) => {}
            waker => *waker = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

impl fmt::Debug for OpHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpHandle")
            .field("id", &self.shared.id)
            .field("kind", &self.shared.kind)
            .field("cancel", &self.shared.cancel.state())
            .field("done", &self.is_done())
            .finish()
    }
}
