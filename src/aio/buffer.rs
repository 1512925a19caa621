//! Per-direction op queue and service scheduling state.
//!
//! Invariant, checked under the lock: a buffer with queued ops is either
//! [`ServiceState::Scheduled`] or waiting on a channel that is not ready.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::{Mutex, MutexGuard};

use super::channel::Direction;
use super::op::{AsyncOp, OpId};

/// Whether a service task owns the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Nothing queued, nothing scheduled.
    Idle,
    /// A service task is on the job queue or draining right now.
    Scheduled,
    /// Ops are queued but the channel is not ready; the next readiness edge
    /// schedules a task.
    AwaitingReady,
}

pub(crate) struct BufferState {
    /// Pending ops in arrival order.
    pub(crate) ops: VecDeque<AsyncOp>,
    pub(crate) service: ServiceState,
    /// Set when a readiness edge arrives while a task is already scheduled.
    pub(crate) rearm: bool,
}

/// One direction's queue of pending ops.
pub struct Buffer {
    direction: Direction,
    state: Mutex<BufferState>,
}

impl Buffer {
    pub(crate) fn new(direction: Direction) -> Self {
        Self {
            direction,
            state: Mutex::new(BufferState {
                ops: VecDeque::new(),
                service: ServiceState::Idle,
                rearm: false,
            }),
        }
    }

    /// Which half of the channel this is.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock()
    }

    /// Number of queued ops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().ops.len()
    }

    /// True when no ops are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().ops.is_empty()
    }

    /// Whether op `id` is queued.
    #[must_use]
    pub fn contains(&self, id: OpId) -> bool {
        self.state.lock().ops.iter().any(|op| op.id() == id)
    }

    /// Current scheduling state.
    #[must_use]
    pub fn service_state(&self) -> ServiceState {
        self.state.lock().service
    }

    /// Pull a queued op out for cancellation.
    pub(crate) fn remove(&self, id: OpId) -> Option<AsyncOp> {
        let mut state = self.state.lock();
        let pos = state.ops.iter().position(|op| op.id() == id)?;
        let op = state.ops.remove(pos);
        // Nothing left to wait for. A Scheduled task is left alone and will
        // find the queue empty.
        if state.ops.is_empty() && state.service == ServiceState::AwaitingReady {
            state.service = ServiceState::Idle;
        }
        op
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Buffer")
            .field("direction", &self.direction)
            .field("queued", &state.ops.len())
            .field("service", &state.service)
            .field("rearm", &state.rearm)
            .finish()
    }
}
