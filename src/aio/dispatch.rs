//! Submission, readiness scheduling, and the buffer service loop.
//!
//! Lock discipline: a buffer lock is never held across an endpoint attempt,
//! a completion, or a job-queue operation. The job closure owns an
//! `Arc<Channel>` for as long as the task is queued or running.

use std::sync::{Arc, Weak};

use parking_lot::MutexGuard;

use super::buffer::{BufferState, ServiceState};
use super::channel::{Attempt, AttemptContext, Channel, Direction, Endpoint};
use super::op::{AsyncOp, CancelSite, CompletionPolicy, OpHandle, OpStatus};
use crate::error::{Error, Result};
use crate::tracing_compat::{debug, trace, warn};

/// Immediate retries of a would-blocked attempt while the channel still
/// reports ready. Past this the task yields back to the job queue.
pub const MAX_EMPTY_RETRIES: usize = 4;

enum Serviced {
    /// Completion delivered.
    Done,
    /// No progress possible right now; goes back to the head of the queue.
    Requeue(AsyncOp),
}

pub(crate) fn submit<E: Endpoint>(channel: &Arc<Channel<E>>, mut op: AsyncOp) -> Result<OpHandle> {
    if channel.is_listening() {
        return Err(Error::invalid_channel_state(
            "async I/O is not supported on a listening channel",
        ));
    }
    let engine = channel.engine();
    if engine.is_shutdown() {
        return Err(Error::shutdown());
    }

    let direction = op.kind().direction();
    let handle = op.handle();
    let site: Weak<dyn CancelSite> = Arc::downgrade(channel) as Weak<dyn CancelSite>;
    op.attach(Arc::clone(engine.metrics()), site);

    if op.remaining() == 0 {
        trace!(op_id = op.id().as_u64(), "empty span completes at submission");
        op.complete(OpStatus::Ok, false);
        return Ok(handle);
    }

    let mut state = channel.buffer(direction).lock();
    trace!(
        op_id = op.id().as_u64(),
        direction = ?direction,
        span = op.span(),
        queued = state.ops.len(),
        "op queued"
    );
    state.ops.push_back(op);
    match state.service {
        // The running task re-checks the queue before it lets go.
        ServiceState::Scheduled => {}
        ServiceState::Idle | ServiceState::AwaitingReady => {
            if channel.endpoint().is_ready(direction) {
                state.service = ServiceState::Scheduled;
                state.rearm = false;
                drop(state);
                if engine.inline_submit() {
                    drain(channel, direction);
                } else {
                    schedule(channel, direction);
                }
            } else {
                state.service = ServiceState::AwaitingReady;
            }
        }
    }
    Ok(handle)
}

pub(crate) fn notify_ready<E: Endpoint>(channel: &Arc<Channel<E>>, direction: Direction) {
    let mut state = channel.buffer(direction).lock();
    match state.service {
        ServiceState::Scheduled => {
            state.rearm = true;
            return;
        }
        ServiceState::Idle => return,
        ServiceState::AwaitingReady => {
            if state.ops.is_empty() {
                state.service = ServiceState::Idle;
                return;
            }
            if !channel.endpoint().is_ready(direction) {
                return;
            }
            state.service = ServiceState::Scheduled;
            state.rearm = false;
        }
    }
    drop(state);
    debug!(direction = ?direction, "channel ready, scheduling service");
    schedule(channel, direction);
}

/// Put a service task for `direction` on the job queue. The buffer must
/// already be marked scheduled.
fn schedule<E: Endpoint>(channel: &Arc<Channel<E>>, direction: Direction) {
    let task_channel = Arc::clone(channel);
    let engine = channel.engine();
    let result = engine.enqueue(move || drain(&task_channel, direction));
    if let Err(err) = result {
        warn!(direction = ?direction, error = %err, "could not schedule buffer service");
        abandon(channel, direction);
        return;
    }
    engine.metrics().jobs_scheduled.increment();
}

/// The engine stopped accepting jobs: finish everything queued on the
/// buffer as cancelled so no submitter waits forever.
fn abandon<E: Endpoint>(channel: &Channel<E>, direction: Direction) {
    let ops: Vec<AsyncOp> = {
        let mut state = channel.buffer(direction).lock();
        state.service = ServiceState::Idle;
        state.rearm = false;
        state.ops.drain(..).collect()
    };
    for op in ops {
        op.finish_cancelled();
    }
}

/// Service loop for one buffer. Runs on a worker, or inline on the
/// submitting thread.
pub(crate) fn drain<E: Endpoint>(channel: &Arc<Channel<E>>, direction: Direction) {
    let endpoint = channel.endpoint();
    let mut state = channel.buffer(direction).lock();
    let mut requeued = false;
    loop {
        if state.ops.is_empty() {
            state.service = ServiceState::Idle;
            state.rearm = false;
            return;
        }
        if !endpoint.is_ready(direction) {
            state.service = ServiceState::AwaitingReady;
            state.rearm = false;
            trace!(direction = ?direction, queued = state.ops.len(), "channel not ready, parking buffer");
            return;
        }
        if requeued {
            if state.rearm {
                state.rearm = false;
                requeued = false;
            } else {
                // Ready, yet the head op just came back empty: give other
                // buffers a turn and come back through the job queue.
                drop(state);
                trace!(direction = ?direction, "yielding buffer service");
                schedule(channel, direction);
                return;
            }
        }

        let Some(op) = state.ops.pop_front() else {
            continue;
        };
        if !op.claim() {
            MutexGuard::unlocked(&mut state, || op.finish_cancelled());
            continue;
        }
        let more_coming = !state.ops.is_empty();
        let serviced = MutexGuard::unlocked(&mut state, || service(channel, direction, op, more_coming));
        if let Serviced::Requeue(op) = serviced {
            requeue(&mut state, op);
            requeued = true;
        }
    }
}

fn requeue(state: &mut MutexGuard<'_, BufferState>, op: AsyncOp) {
    if op.rearm() {
        trace!(op_id = op.id().as_u64(), "op back at head of queue");
        state.ops.push_front(op);
    } else {
        MutexGuard::unlocked(state, || op.finish_cancelled());
    }
}

/// Attempt one claimed op until it completes or the channel runs out of
/// readiness. Called without the buffer lock.
fn service<E: Endpoint>(
    channel: &Channel<E>,
    direction: Direction,
    mut op: AsyncOp,
    more_coming: bool,
) -> Serviced {
    let endpoint = channel.endpoint();
    let metrics = channel.engine().metrics();
    let policy = op.policy().unwrap_or_else(|| channel.default_policy(direction));
    let mut retries = 0;

    loop {
        let remaining = op.remaining();
        let credential = op.credential().cloned();
        let cx = AttemptContext {
            op_id: op.id(),
            credential: credential.as_ref(),
            more_coming: direction == Direction::Send && (more_coming || !op.is_final_segment()),
        };
        let attempt = match direction {
            Direction::Receive => endpoint.attempt_receive(op.unfilled_mut(), &cx),
            Direction::Send => endpoint.attempt_send(op.unsent(), &cx),
        };

        match attempt {
            Attempt::Progress(n) if n > 0 => {
                op.advance(n.min(remaining));
                trace!(op_id = op.id().as_u64(), moved = n, total = op.transferred(), "attempt progressed");
                if op.remaining() == 0 || policy == CompletionPolicy::Partial {
                    op.complete(OpStatus::Ok, false);
                    return Serviced::Done;
                }
                if op.cancel_pending() {
                    op.finish_cancelled();
                    return Serviced::Done;
                }
                if endpoint.is_ready(direction) {
                    continue;
                }
                if direction == Direction::Receive {
                    op.complete(OpStatus::Ok, false);
                    return Serviced::Done;
                }
                return Serviced::Requeue(op);
            }
            Attempt::Progress(_) | Attempt::WouldBlock => {}
            Attempt::Eof => {
                op.complete(OpStatus::Ok, true);
                return Serviced::Done;
            }
            Attempt::Failed(err) => {
                debug!(op_id = op.id().as_u64(), error = %err, "attempt failed");
                op.complete(OpStatus::Failed(err.into()), false);
                return Serviced::Done;
            }
        }

        // Would block: something else drained the channel between the
        // readiness check and the attempt.
        metrics.empty_results.increment();
        // A read never waits past data it already holds.
        if op.transferred() > 0
            && (policy == CompletionPolicy::Partial || direction == Direction::Receive)
        {
            op.complete(OpStatus::Ok, false);
            return Serviced::Done;
        }
        if op.cancel_pending() {
            op.finish_cancelled();
            return Serviced::Done;
        }
        if retries < MAX_EMPTY_RETRIES && endpoint.is_ready(direction) {
            retries += 1;
            metrics.empty_retries.increment();
            continue;
        }
        return Serviced::Requeue(op);
    }
}
