//! End-to-end scenarios for submission, readiness, and cancellation.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test --test aio_scenarios -- --nocapture
//! ```

#[macro_use]
mod common;

use common::*;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use streamaio::{
    AsyncOp, Attempt, AttemptContext, CancelState, Channel, CompletionPolicy, Direction,
    Endpoint, MemoryPipe, ServiceState,
};

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[test]
fn three_reads_share_one_readiness_cycle() {
    init_test_logging();
    test_phase!("three_reads_share_one_readiness_cycle");
    let engine = test_engine(2, 4, Duration::from_secs(5));
    let channel = Channel::new(&engine.handle(), MemoryPipe::new());

    let handles: Vec<_> = (0..3)
        .map(|_| channel.submit(AsyncOp::read(100)).expect("submit"))
        .collect();
    assert_eq!(channel.queued(Direction::Receive), 3);
    assert_eq!(
        channel.service_state(Direction::Receive),
        ServiceState::AwaitingReady
    );

    let data = pattern(250);
    channel.feed(&data);

    let completions: Vec<_> = handles.into_iter().map(|h| h.wait()).collect();
    let sizes: Vec<usize> = completions.iter().map(|c| c.transferred()).collect();
    assert_with_log!(sizes == vec![100, 100, 50], "transfer sizes", vec![100, 100, 50], sizes);
    assert!(completions.iter().all(|c| c.is_ok()));
    assert_eq!(completions[0].data(), &data[..100]);
    assert_eq!(completions[1].data(), &data[100..200]);
    assert_eq!(completions[2].data(), &data[200..]);
    assert!(wait_until(TEST_TIMEOUT, || {
        channel.service_state(Direction::Receive) == ServiceState::Idle
    }));
    test_complete!("three_reads_share_one_readiness_cycle");
}

#[test]
fn blocking_channel_completes_short_reads_in_order() {
    init_test_logging();
    test_phase!("blocking_channel_completes_short_reads_in_order");
    let engine = test_engine(1, 2, Duration::from_secs(5));
    let channel = Channel::new(&engine.handle(), MemoryPipe::new());
    channel.set_nonblocking(false);
    assert_eq!(channel.default_policy(Direction::Receive), CompletionPolicy::Partial);
    assert_eq!(channel.default_policy(Direction::Send), CompletionPolicy::Fill);

    let handles: Vec<_> = (0..3)
        .map(|_| channel.submit(AsyncOp::read(100)).expect("submit"))
        .collect();
    let data = pattern(250);
    channel.feed(&data);

    let completions: Vec<_> = handles.into_iter().map(|h| h.wait()).collect();
    let sizes: Vec<usize> = completions.iter().map(|c| c.transferred()).collect();
    assert_with_log!(sizes == vec![100, 100, 50], "transfer sizes", vec![100, 100, 50], sizes);
    assert_eq!(completions[2].data(), &data[200..]);
    assert!(wait_until(TEST_TIMEOUT, || {
        channel.service_state(Direction::Receive) == ServiceState::Idle
    }));
    test_complete!("blocking_channel_completes_short_reads_in_order");
}

#[test]
fn write_on_empty_pool_spawns_to_target() {
    init_test_logging();
    test_phase!("write_on_empty_pool_spawns_to_target");
    let engine = test_engine(2, 4, Duration::from_millis(200));
    assert_eq!(engine.stats().workers, 0);

    let channel = Channel::new(&engine.handle(), MemoryPipe::new());
    let handle = channel.submit(AsyncOp::write(b"payload".to_vec())).expect("submit");
    let completion = handle.wait();
    assert!(completion.is_ok());
    assert_eq!(completion.transferred(), 7);
    assert_eq!(channel.endpoint().take_outgoing(), b"payload");

    assert!(wait_until(TEST_TIMEOUT, || engine.stats().workers == 2));
    assert_eq!(engine.metrics().workers_spawned.get(), 2);

    // Nobody above target, so nobody retires.
    std::thread::sleep(Duration::from_millis(500));
    let stats = engine.stats();
    assert_with_log!(stats.workers == 2, "resident workers", 2, stats.workers);
    assert_eq!(engine.metrics().workers_retired.get(), 0);
    test_complete!("write_on_empty_pool_spawns_to_target");
}

#[test]
fn cancel_queued_op_removes_it() {
    init_test_logging();
    test_phase!("cancel_queued_op_removes_it");
    let engine = test_engine(1, 2, Duration::from_secs(5));
    let channel = Channel::new(&engine.handle(), MemoryPipe::new());

    let keep = channel.submit(AsyncOp::read(4)).expect("keep");
    let doomed = channel.submit(AsyncOp::read(4)).expect("doomed");
    let doomed_id = doomed.id();
    assert!(channel.is_queued(Direction::Receive, doomed_id));

    doomed.cancel();
    assert_eq!(doomed.cancel_state(), CancelState::Done);
    doomed.cancel();
    let completion = doomed.wait();
    assert!(completion.is_cancelled());
    assert_eq!(completion.transferred(), 0);
    assert!(!channel.is_queued(Direction::Receive, doomed_id));
    assert_eq!(channel.queued(Direction::Receive), 1);

    channel.feed(b"abcd");
    let kept = keep.wait();
    assert_eq!(kept.data(), b"abcd");
    assert_eq!(engine.metrics().ops_cancelled.get(), 1);
    test_complete!("cancel_queued_op_removes_it");
}

#[test]
fn listening_channel_rejects_submission() {
    init_test_logging();
    let engine = test_engine(1, 1, Duration::from_secs(5));
    let channel = Channel::new(&engine.handle(), MemoryPipe::listening());
    let err = channel.submit(AsyncOp::write(b"x".to_vec())).unwrap_err();
    assert_eq!(err.kind(), streamaio::ErrorKind::InvalidChannelState);
    assert_eq!(channel.queued(Direction::Send), 0);
}

#[test]
fn send_backpressure_resumes_on_drain() {
    init_test_logging();
    test_phase!("send_backpressure_resumes_on_drain");
    let engine = test_engine(1, 2, Duration::from_secs(5));
    let channel = Channel::new(&engine.handle(), MemoryPipe::with_send_capacity(8));
    channel.set_nonblocking(false);

    let data = pattern(20);
    let handle = channel.submit(AsyncOp::write(data.clone())).expect("submit");
    let mut received = Vec::new();
    assert!(wait_until(TEST_TIMEOUT, || {
        received.extend(channel.take_sent());
        handle.is_done()
    }));
    received.extend(channel.take_sent());
    let completion = handle.wait();
    assert_eq!(completion.transferred(), 20);
    assert_eq!(received, data);
    test_complete!("send_backpressure_resumes_on_drain");
}

#[test]
fn handles_resolve_as_futures() {
    init_test_logging();
    test_phase!("handles_resolve_as_futures");
    let engine = test_engine(1, 2, Duration::from_secs(5));
    let channel = Channel::new(&engine.handle(), MemoryPipe::new());
    let first = channel.submit(AsyncOp::read(3)).expect("first");
    let second = channel.submit(AsyncOp::read(3)).expect("second");

    let feeder = {
        let channel = Arc::clone(&channel);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            channel.feed(b"abcdef");
        })
    };
    let (a, b) = futures_lite::future::block_on(async { (first.await, second.await) });
    feeder.join().expect("feeder panicked");
    assert_eq!(a.data(), b"abc");
    assert_eq!(b.data(), b"def");
    test_complete!("handles_resolve_as_futures");
}

/// Endpoint whose receive attempt parks until the test releases it.
struct GatedEndpoint {
    entered: std::sync::Mutex<Option<mpsc::Sender<()>>>,
    release: std::sync::Mutex<mpsc::Receiver<usize>>,
}

impl Endpoint for GatedEndpoint {
    fn is_ready(&self, direction: Direction) -> bool {
        direction == Direction::Receive
    }

    fn attempt_receive(&self, buf: &mut [u8], _cx: &AttemptContext<'_>) -> Attempt {
        if let Some(tx) = self.entered.lock().expect("entered lock").take() {
            let _ = tx.send(());
        }
        let n = self
            .release
            .lock()
            .expect("release lock")
            .recv()
            .unwrap_or(0)
            .min(buf.len());
        buf[..n].fill(b'g');
        Attempt::Progress(n)
    }

    fn attempt_send(&self, _buf: &[u8], _cx: &AttemptContext<'_>) -> Attempt {
        Attempt::WouldBlock
    }
}

#[test]
fn cancel_during_attempt_keeps_partial_bytes() {
    init_test_logging();
    test_phase!("cancel_during_attempt_keeps_partial_bytes");
    let engine = test_engine(1, 1, Duration::from_secs(5));
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let channel = Channel::new(
        &engine.handle(),
        GatedEndpoint {
            entered: std::sync::Mutex::new(Some(entered_tx)),
            release: std::sync::Mutex::new(release_rx),
        },
    );

    let handle = channel
        .submit(AsyncOp::read(10).with_policy(CompletionPolicy::Fill))
        .expect("submit");
    entered_rx.recv_timeout(TEST_TIMEOUT).expect("attempt started");
    assert_eq!(handle.cancel_state(), CancelState::InFlight);

    handle.cancel();
    assert_eq!(handle.cancel_state(), CancelState::CancelPending);
    assert!(!handle.is_done(), "cancel waits for the attempt boundary");

    release_tx.send(4).expect("release");
    let completion = handle.wait();
    assert_with_log!(completion.is_ok(), "status", "Ok", completion.status());
    assert_eq!(completion.transferred(), 4);
    assert_eq!(completion.data(), b"gggg");
    test_complete!("cancel_during_attempt_keeps_partial_bytes");
}
