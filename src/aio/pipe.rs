//! In-memory loopback endpoint.
//!
//! [`MemoryPipe`] holds an inbound byte queue (what the peer sent us) and an
//! outbound byte queue bounded by a send capacity. Readiness is derived from
//! those queues. A few fault knobs let callers provoke the races the engine
//! has to survive: spurious would-blocks and injected hard errors.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use super::channel::{Attempt, AttemptContext, Channel, Direction, Endpoint};

/// Send capacity of [`MemoryPipe::new`].
pub const DEFAULT_SEND_CAPACITY: usize = 64 * 1024;

/// What the pipe saw on one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRecord {
    /// Bytes accepted.
    pub accepted: usize,
    /// The batching hint passed with the attempt.
    pub more_coming: bool,
    /// The credential, if it was a `String`.
    pub credential: Option<String>,
}

#[derive(Debug)]
struct PipeState {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    send_capacity: usize,
    peer_closed: bool,
    listening: bool,
    fail_next: Option<io::ErrorKind>,
    spurious: usize,
    send_log: Vec<SendRecord>,
}

/// An [`Endpoint`] backed by in-memory queues.
#[derive(Debug)]
pub struct MemoryPipe {
    state: Mutex<PipeState>,
}

impl MemoryPipe {
    /// An empty, connected pipe.
    #[must_use]
    pub fn new() -> Self {
        Self::with_send_capacity(DEFAULT_SEND_CAPACITY)
    }

    /// A pipe whose outbound side holds at most `capacity` unread bytes.
    #[must_use]
    pub fn with_send_capacity(capacity: usize) -> Self {
        Self {
            state: Mutex::new(PipeState {
                inbound: VecDeque::new(),
                outbound: Vec::new(),
                send_capacity: capacity,
                peer_closed: false,
                listening: false,
                fail_next: None,
                spurious: 0,
                send_log: Vec::new(),
            }),
        }
    }

    /// A pipe in listening mode; the engine refuses ops on it.
    #[must_use]
    pub fn listening() -> Self {
        let pipe = Self::new();
        pipe.state.lock().listening = true;
        pipe
    }

    /// Append bytes to the inbound side without signalling readiness.
    pub fn push_incoming(&self, data: &[u8]) {
        self.state.lock().inbound.extend(data.iter().copied());
    }

    /// Drain everything sent so far without signalling readiness.
    pub fn take_outgoing(&self) -> Vec<u8> {
        std::mem::take(&mut self.state.lock().outbound)
    }

    /// Bytes waiting on the inbound side.
    pub fn incoming_len(&self) -> usize {
        self.state.lock().inbound.len()
    }

    /// Bytes sent and not yet taken.
    pub fn outgoing_len(&self) -> usize {
        self.state.lock().outbound.len()
    }

    /// Change the outbound limit.
    pub fn set_send_capacity(&self, capacity: usize) {
        self.state.lock().send_capacity = capacity;
    }

    /// Mark the peer closed; receives hit EOF once the inbound side is empty.
    pub fn set_peer_closed(&self) {
        self.state.lock().peer_closed = true;
    }

    /// The next attempt, in either direction, fails with `kind`.
    pub fn fail_next(&self, kind: io::ErrorKind) {
        self.state.lock().fail_next = Some(kind);
    }

    /// The next `count` attempts would-block even though the pipe reports
    /// ready, as if another reader got there first.
    pub fn spurious_would_block(&self, count: usize) {
        self.state.lock().spurious = count;
    }

    /// Every send attempt that moved bytes, in order.
    pub fn send_log(&self) -> Vec<SendRecord> {
        self.state.lock().send_log.clone()
    }

    fn injected(state: &mut PipeState) -> Option<Attempt> {
        if let Some(kind) = state.fail_next.take() {
            return Some(Attempt::Failed(io::Error::new(kind, "injected pipe failure")));
        }
        if state.spurious > 0 {
            state.spurious -= 1;
            return Some(Attempt::WouldBlock);
        }
        None
    }
}

impl Default for MemoryPipe {
    fn default() -> Self {
        Self::new()
    }
}

impl Endpoint for MemoryPipe {
    fn is_ready(&self, direction: Direction) -> bool {
        let state = self.state.lock();
        match direction {
            Direction::Receive => !state.inbound.is_empty() || state.peer_closed,
            Direction::Send => state.outbound.len() < state.send_capacity,
        }
    }

    fn attempt_receive(&self, buf: &mut [u8], _cx: &AttemptContext<'_>) -> Attempt {
        let mut state = self.state.lock();
        if let Some(attempt) = Self::injected(&mut state) {
            return attempt;
        }
        if state.inbound.is_empty() {
            return if state.peer_closed {
                Attempt::Eof
            } else {
                Attempt::WouldBlock
            };
        }
        let n = buf.len().min(state.inbound.len());
        for (dst, src) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *dst = src;
        }
        Attempt::Progress(n)
    }

    fn attempt_send(&self, buf: &[u8], cx: &AttemptContext<'_>) -> Attempt {
        let mut state = self.state.lock();
        if let Some(attempt) = Self::injected(&mut state) {
            return attempt;
        }
        if state.peer_closed {
            return Attempt::Failed(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "peer closed",
            ));
        }
        let room = state.send_capacity.saturating_sub(state.outbound.len());
        let n = buf.len().min(room);
        if n == 0 {
            return Attempt::WouldBlock;
        }
        state.outbound.extend_from_slice(&buf[..n]);
        let credential = cx
            .credential
            .and_then(|cred| cred.downcast_ref::<String>())
            .cloned();
        state.send_log.push(SendRecord {
            accepted: n,
            more_coming: cx.more_coming,
            credential,
        });
        Attempt::Progress(n)
    }

    fn is_listening(&self) -> bool {
        self.state.lock().listening
    }
}

impl Channel<MemoryPipe> {
    /// Deliver bytes from the peer and signal receive readiness.
    pub fn feed(self: &Arc<Self>, data: &[u8]) {
        self.endpoint().push_incoming(data);
        self.notify_ready(Direction::Receive);
    }

    /// Drain what was sent and signal send readiness.
    pub fn take_sent(self: &Arc<Self>) -> Vec<u8> {
        let sent = self.endpoint().take_outgoing();
        self.notify_ready(Direction::Send);
        sent
    }

    /// Close the peer side and wake receivers so they observe EOF.
    pub fn close_peer(self: &Arc<Self>) {
        self.endpoint().set_peer_closed();
        self.notify_ready(Direction::Receive);
    }
}
