//! Integration tests for the stream capture controller
//!
//! All tests run on a paused Tokio clock, so backoff delays and timeouts
//! elapse instantly once every task is idle.

mod mocks;

use ipcam_core::capture::{EventReceiver, StreamController};
use ipcam_core::config::{CaptureConfig, RetryPolicy};
use ipcam_core::descriptor::Resolution;
use ipcam_core::error::{SnapshotError, SourceError, StartError, StateError};
use ipcam_core::source::{DecodedImage, FrameSource, TestPatternSource};
use ipcam_core::types::{
    Command, ErrorKind, FailureReason, Frame, StatusEvent, StreamEvent, StreamState,
};
use mocks::{create_test_image, test_descriptor, MockFrameSource};
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tokio_test::{assert_err, assert_ok};

/// Generous bound on any single wait, in virtual time
const WAIT: Duration = Duration::from_secs(600);

async fn next_event(rx: &EventReceiver) -> StreamEvent {
    match timeout(WAIT, rx.recv()).await {
        Ok(Some(event)) => event,
        Ok(None) => panic!("event channel closed"),
        Err(_) => panic!("timed out waiting for an event"),
    }
}

async fn next_status(rx: &EventReceiver) -> StatusEvent {
    loop {
        if let StreamEvent::Status(status) = next_event(rx).await {
            return status;
        }
    }
}

/// Next status event, skipping `Error` reports
async fn next_transition(rx: &EventReceiver) -> StatusEvent {
    loop {
        let status = next_status(rx).await;
        if !matches!(status, StatusEvent::Error { .. }) {
            return status;
        }
    }
}

async fn next_frame(rx: &EventReceiver) -> Frame {
    loop {
        if let StreamEvent::Frame(frame) = next_event(rx).await {
            return frame;
        }
    }
}

async fn wait_for_state<S: FrameSource>(
    controller: &StreamController<S>,
    mut pred: impl FnMut(&StreamState) -> bool,
) -> StreamState {
    let mut rx = controller.watch_state();
    let state = timeout(WAIT, rx.wait_for(|s| pred(s)))
        .await
        .expect("timed out waiting for state")
        .expect("state channel closed");
    *state
}

async fn wait_stopped<S: FrameSource>(controller: &StreamController<S>) {
    timeout(WAIT, controller.stopped())
        .await
        .expect("capture loop did not exit");
}

fn statuses(events: &[StreamEvent]) -> Vec<StatusEvent> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Status(status) => Some(status.clone()),
            StreamEvent::Frame(_) => None,
        })
        .collect()
}

fn refused() -> Result<(), SourceError> {
    Err(SourceError::refused("connection refused"))
}

fn fast_retries(max_retries: Option<u32>) -> CaptureConfig {
    CaptureConfig::default().with_retry(RetryPolicy::default().with_max_retries(max_retries))
}

#[tokio::test(start_paused = true)]
async fn test_streams_frames_in_order() {
    let source = MockFrameSource::new();
    let stats = source.stats();
    let controller = StreamController::new(source, CaptureConfig::default());
    let rx = controller.subscribe();

    assert_ok!(controller.start(test_descriptor()));
    assert_eq!(controller.state(), StreamState::Connecting);

    assert_eq!(next_status(&rx).await, StatusEvent::Connected);
    assert_eq!(controller.state(), StreamState::Streaming);
    for expected in 0..5 {
        let frame = next_frame(&rx).await;
        assert_eq!(frame.sequence, expected);
        assert_eq!((frame.width, frame.height), (4, 4));
        assert_eq!(frame.data.len(), 4 * 4 * 3);
    }

    assert_ok!(controller.stop());
    assert_eq!(controller.state(), StreamState::Stopping);
    wait_stopped(&controller).await;
    assert_eq!(controller.state(), StreamState::Idle);

    let trailing = statuses(&rx.drain());
    assert_eq!(
        trailing.last(),
        Some(&StatusEvent::Disconnected {
            reason: "stopped".to_string()
        })
    );
    assert_eq!(stats.opens(), 1);
    assert_eq!(stats.closes(), 1);
    assert_eq!(controller.stats().frames_delivered, stats.frames());
}

#[tokio::test(start_paused = true)]
async fn test_restart_resets_sequence_and_snapshot() {
    let controller = StreamController::new(MockFrameSource::new(), CaptureConfig::default());
    let rx = controller.subscribe();

    assert_ok!(controller.start(test_descriptor()));
    assert_eq!(next_status(&rx).await, StatusEvent::Connected);
    for _ in 0..3 {
        next_frame(&rx).await;
    }
    assert_ok!(controller.stop());
    wait_stopped(&controller).await;
    rx.drain();

    assert_ok!(controller.start(test_descriptor()));
    assert_eq!(next_status(&rx).await, StatusEvent::Connected);
    assert_eq!(controller.snapshot(), Err(SnapshotError::NoFrame));
    assert_eq!(next_frame(&rx).await.sequence, 0);
}

#[tokio::test(start_paused = true)]
async fn test_commands_rejected_in_wrong_state() {
    let controller = StreamController::new(
        MockFrameSource::new().with_open_delay(Duration::from_secs(5)),
        CaptureConfig::default(),
    );

    let err = assert_err!(controller.pause());
    assert_eq!(
        err,
        StateError {
            command: Command::Pause,
            state: StreamState::Idle
        }
    );
    assert_err!(controller.resume());
    assert!(matches!(controller.snapshot(), Err(SnapshotError::State(_))));

    // Stop without a session is a no-op
    assert_ok!(controller.stop());
    assert_eq!(controller.state(), StreamState::Idle);

    assert_ok!(controller.start(test_descriptor()));
    let err = assert_err!(controller.start(test_descriptor()));
    assert_eq!(
        err,
        StartError::State(StateError {
            command: Command::Start,
            state: StreamState::Connecting
        })
    );
    assert_err!(controller.pause());
    assert_err!(controller.resume());
    assert!(matches!(controller.snapshot(), Err(SnapshotError::State(_))));

    assert_ok!(controller.stop());
    // A second stop while stopping is also a no-op
    assert_ok!(controller.stop());
    wait_stopped(&controller).await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_immediately_after_start() {
    let source = MockFrameSource::new();
    let stats = source.stats();
    let controller = StreamController::new(source, CaptureConfig::default());
    let rx = controller.subscribe();

    assert_ok!(controller.start(test_descriptor()));
    assert_ok!(controller.stop());
    wait_stopped(&controller).await;

    assert_eq!(controller.state(), StreamState::Idle);
    assert!(statuses(&rx.drain()).is_empty());
    assert_eq!(stats.opens(), 0);

    // The source was handed back, so a new session can start
    assert_ok!(controller.start(test_descriptor()));
    assert_eq!(next_status(&rx).await, StatusEvent::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_stop_interrupts_slow_open() {
    let source = MockFrameSource::new().with_open_delay(Duration::from_secs(60));
    let stats = source.stats();
    let controller = StreamController::new(source, CaptureConfig::default());
    let rx = controller.subscribe();

    assert_ok!(controller.start(test_descriptor()));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(stats.opens(), 1);
    assert_eq!(controller.state(), StreamState::Connecting);

    let requested = Instant::now();
    assert_ok!(controller.stop());
    wait_stopped(&controller).await;

    assert!(requested.elapsed() < Duration::from_secs(1));
    assert_eq!(controller.state(), StreamState::Idle);
    assert!(
        !statuses(&rx.drain())
            .iter()
            .any(|s| matches!(s, StatusEvent::Connected | StatusEvent::Disconnected { .. }))
    );
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_returns_latest_frame() {
    let controller = StreamController::new(MockFrameSource::new(), CaptureConfig::default());
    let rx = controller.subscribe();

    assert_ok!(controller.start(test_descriptor()));
    assert!(matches!(controller.snapshot(), Err(SnapshotError::State(_))));

    assert_eq!(next_status(&rx).await, StatusEvent::Connected);
    assert_eq!(controller.snapshot(), Err(SnapshotError::NoFrame));

    next_frame(&rx).await;
    let latest = next_frame(&rx).await;
    let snapshot = assert_ok!(controller.snapshot());
    assert_eq!(snapshot, latest);

    assert_ok!(controller.stop());
    wait_stopped(&controller).await;
    assert!(matches!(controller.snapshot(), Err(SnapshotError::State(_))));
}

#[tokio::test(start_paused = true)]
async fn test_pause_withholds_frames_until_resume() {
    let controller = StreamController::new(MockFrameSource::new(), CaptureConfig::default());
    let rx = controller.subscribe();

    assert_ok!(controller.start(test_descriptor()));
    assert_eq!(next_status(&rx).await, StatusEvent::Connected);
    let before = next_frame(&rx).await;

    assert_ok!(controller.pause());
    assert_eq!(controller.state(), StreamState::Paused);
    assert_err!(controller.pause());

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(rx.drain().iter().all(|e| !e.is_frame()));

    // The last delivered frame stays available while paused
    assert_eq!(assert_ok!(controller.snapshot()), before);

    assert_ok!(controller.resume());
    assert_eq!(controller.state(), StreamState::Streaming);
    assert_eq!(next_frame(&rx).await.sequence, before.sequence + 1);
}

#[tokio::test(start_paused = true)]
async fn test_connection_loss_while_paused_reconnects() {
    let source = MockFrameSource::new()
        .with_frames([Err(SourceError::ConnectionLost("cable unplugged".to_string()))]);
    let stats = source.stats();
    let controller = StreamController::new(source, CaptureConfig::default());
    let rx = controller.subscribe();

    assert_ok!(controller.start(test_descriptor()));
    assert_eq!(next_status(&rx).await, StatusEvent::Connected);
    assert_ok!(controller.pause());

    assert_eq!(
        next_status(&rx).await,
        StatusEvent::Error {
            kind: ErrorKind::ConnectionLost,
            message: "connection lost: cable unplugged".to_string()
        }
    );
    match next_status(&rx).await {
        StatusEvent::Disconnected { reason } => assert!(reason.contains("cable unplugged")),
        other => panic!("expected Disconnected, got {:?}", other),
    }
    // First reconnect attempt is immediate
    assert_eq!(next_status(&rx).await, StatusEvent::Connected);

    assert_eq!(
        wait_for_state(&controller, |s| *s == StreamState::Streaming).await,
        StreamState::Streaming
    );
    assert_eq!(stats.opens(), 2);
    assert_eq!(controller.stats().reconnects, 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_decode_errors_are_skipped() {
    let inconsistent = DecodedImage {
        width: 4,
        height: 4,
        format: ipcam_core::types::PixelFormat::Rgb24,
        data: vec![0; 5],
    };
    let source = MockFrameSource::new().with_frames([
        Err(SourceError::TransientDecode("bad slice".to_string())),
        Ok(create_test_image(4, 4, [255, 0, 0])),
        Ok(inconsistent),
        Err(SourceError::TransientDecode("missing reference".to_string())),
        Ok(create_test_image(4, 4, [0, 255, 0])),
    ]);
    let stats = source.stats();
    let controller = StreamController::new(source, CaptureConfig::default());
    let rx = controller.subscribe();

    assert_ok!(controller.start(test_descriptor()));
    assert_eq!(next_status(&rx).await, StatusEvent::Connected);

    let first = next_frame(&rx).await;
    let second = next_frame(&rx).await;
    assert_eq!((first.sequence, &first.data[..3]), (0, &[255, 0, 0][..]));
    assert_eq!((second.sequence, &second.data[..3]), (1, &[0, 255, 0][..]));

    assert_eq!(controller.state(), StreamState::Streaming);
    assert_eq!(controller.stats().decode_errors, 3);
    assert_eq!(controller.stats().reconnects, 0);
    assert_eq!(stats.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_trace_after_two_refusals() {
    let source = MockFrameSource::new().with_opens([refused(), refused()]);
    let stats = source.stats();
    let controller = StreamController::new(source, CaptureConfig::default());
    let rx = controller.subscribe();
    let started = Instant::now();

    assert_ok!(controller.start(test_descriptor()));

    assert!(matches!(
        next_status(&rx).await,
        StatusEvent::Error {
            kind: ErrorKind::ConnectionRefused,
            ..
        }
    ));
    assert_eq!(
        next_transition(&rx).await,
        StatusEvent::Retrying {
            attempt: 1,
            delay: Duration::from_secs(1)
        }
    );
    assert_eq!(
        next_transition(&rx).await,
        StatusEvent::Retrying {
            attempt: 2,
            delay: Duration::from_secs(2)
        }
    );
    assert_eq!(next_transition(&rx).await, StatusEvent::Connected);
    assert_eq!(next_frame(&rx).await.sequence, 0);
    assert_eq!(next_frame(&rx).await.sequence, 1);

    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(stats.opens(), 3);
    assert_eq!(controller.state(), StreamState::Streaming);
}

#[tokio::test(start_paused = true)]
async fn test_pause_resume_sequences_stay_legal() {
    let controller = StreamController::new(MockFrameSource::new(), CaptureConfig::default());
    let rx = controller.subscribe();

    assert_ok!(controller.start(test_descriptor()));
    assert_eq!(next_status(&rx).await, StatusEvent::Connected);

    let mut last_sequence = None;
    for round in 0..20u64 {
        if round % 3 == 0 {
            assert_ok!(controller.pause());
            assert_eq!(controller.state(), StreamState::Paused);
            assert_err!(controller.pause());
            tokio::time::sleep(Duration::from_millis(10 + round * 37)).await;
            assert_ok!(controller.resume());
        } else {
            assert_err!(controller.resume());
        }
        assert_eq!(controller.state(), StreamState::Streaming);

        let frame = next_frame(&rx).await;
        if let Some(previous) = last_sequence {
            assert!(frame.sequence > previous);
        }
        last_sequence = Some(frame.sequence);
    }

    assert_ok!(controller.stop());
    wait_stopped(&controller).await;
    assert_eq!(controller.state(), StreamState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_is_capped() {
    let source = MockFrameSource::new().with_opens([refused(), refused(), refused(), refused()]);
    let config = CaptureConfig::default().with_retry(
        RetryPolicy::default().with_delays(Duration::from_secs(1), Duration::from_secs(3)),
    );
    let controller = StreamController::new(source, config);
    let rx = controller.subscribe();

    assert_ok!(controller.start(test_descriptor()));

    let mut delays = Vec::new();
    loop {
        match next_transition(&rx).await {
            StatusEvent::Retrying { delay, .. } => delays.push(delay.as_secs()),
            StatusEvent::Connected => break,
            other => panic!("unexpected {:?}", other),
        }
    }
    assert_eq!(delays, vec![1, 2, 3, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_gives_up_after_max_retries() {
    let source = MockFrameSource::new().with_opens(std::iter::repeat_with(refused).take(10));
    let stats = source.stats();
    let controller = StreamController::new(source, fast_retries(Some(2)));
    let rx = controller.subscribe();

    assert_ok!(controller.start(test_descriptor()));
    let state = wait_for_state(&controller, |s| matches!(s, StreamState::Failed(_))).await;
    assert_eq!(state, StreamState::Failed(FailureReason::MaxRetriesExceeded));

    let trace = statuses(&rx.drain());
    let attempts: Vec<u32> = trace
        .iter()
        .filter_map(|s| match s {
            StatusEvent::Retrying { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(attempts, vec![1, 2]);
    assert!(matches!(
        trace.last(),
        Some(StatusEvent::Error {
            kind: ErrorKind::MaxRetriesExceeded,
            ..
        })
    ));
    assert!(!trace.contains(&StatusEvent::Connected));
    assert_eq!(stats.opens(), 3);

    // Failed accepts a new start
    assert_ok!(controller.start(test_descriptor()));
    assert_ok!(controller.stop());
    wait_stopped(&controller).await;
}

#[tokio::test(start_paused = true)]
async fn test_auth_failure_is_terminal() {
    let source = MockFrameSource::new()
        .with_opens([Err(SourceError::auth_failed("401 Unauthorized"))]);
    let stats = source.stats();
    let controller = StreamController::new(source, CaptureConfig::default());
    let rx = controller.subscribe();

    assert_ok!(controller.start(test_descriptor()));
    let state = wait_for_state(&controller, |s| matches!(s, StreamState::Failed(_))).await;
    assert_eq!(state, StreamState::Failed(FailureReason::AuthenticationFailed));

    let trace = statuses(&rx.drain());
    assert!(matches!(
        trace.as_slice(),
        [StatusEvent::Error {
            kind: ErrorKind::AuthenticationFailed,
            ..
        }]
    ));
    assert_eq!(stats.opens(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_auth_failure_retried_when_enabled() {
    let source = MockFrameSource::new()
        .with_opens([Err(SourceError::auth_failed("401 Unauthorized"))]);
    let config = CaptureConfig::default().with_retry(RetryPolicy {
        retry_auth_failures: true,
        ..RetryPolicy::default()
    });
    let controller = StreamController::new(source, config);
    let rx = controller.subscribe();

    assert_ok!(controller.start(test_descriptor()));
    assert_eq!(
        next_transition(&rx).await,
        StatusEvent::Retrying {
            attempt: 1,
            delay: Duration::from_secs(1)
        }
    );
    assert_eq!(next_transition(&rx).await, StatusEvent::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_open_timeout_counts_as_failure() {
    let source = MockFrameSource::new().with_open_delay(Duration::from_secs(60));
    let config = fast_retries(Some(0)).with_open_timeout(Duration::from_secs(5));
    let controller = StreamController::new(source, config);
    let rx = controller.subscribe();
    let started = Instant::now();

    assert_ok!(controller.start(test_descriptor()));

    assert!(matches!(
        next_status(&rx).await,
        StatusEvent::Error {
            kind: ErrorKind::Timeout,
            ..
        }
    ));
    let state = wait_for_state(&controller, |s| matches!(s, StreamState::Failed(_))).await;
    assert_eq!(state, StreamState::Failed(FailureReason::MaxRetriesExceeded));
    assert!(started.elapsed() >= Duration::from_secs(5));
    assert!(started.elapsed() < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_read_timeout_triggers_reconnect() {
    let source = MockFrameSource::new()
        .with_frames([Ok(create_test_image(4, 4, [1, 2, 3]))])
        .hang_when_done();
    let stats = source.stats();
    let config = CaptureConfig::default().with_read_timeout(Duration::from_secs(2));
    let controller = StreamController::new(source, config);
    let rx = controller.subscribe();

    assert_ok!(controller.start(test_descriptor()));
    assert_eq!(next_status(&rx).await, StatusEvent::Connected);
    next_frame(&rx).await;

    assert!(matches!(
        next_status(&rx).await,
        StatusEvent::Error {
            kind: ErrorKind::Timeout,
            ..
        }
    ));
    assert!(matches!(
        next_status(&rx).await,
        StatusEvent::Disconnected { .. }
    ));
    assert_eq!(next_status(&rx).await, StatusEvent::Connected);
    assert_eq!(stats.opens(), 2);
    assert_eq!(stats.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_consumer_drops_oldest_frames() {
    let config = CaptureConfig::default().with_channel_capacity(3);
    let controller = StreamController::new(MockFrameSource::new(), config);
    let rx = controller.subscribe();

    assert_ok!(controller.start(test_descriptor()));
    tokio::time::sleep(Duration::from_secs(2)).await;

    let stats = controller.stats();
    let events = rx.drain();
    assert!(stats.frames_delivered >= 10);
    assert_eq!(stats.frames_dropped, stats.frames_delivered - 2);

    assert_eq!(events.len(), 3);
    assert_eq!(events[0], StreamEvent::Status(StatusEvent::Connected));
    let sequences: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Frame(frame) => Some(frame.sequence),
            StreamEvent::Status(_) => None,
        })
        .collect();
    assert_eq!(
        sequences,
        vec![stats.frames_delivered - 2, stats.frames_delivered - 1]
    );
}

#[tokio::test(start_paused = true)]
async fn test_dropping_controller_releases_source() {
    let source = MockFrameSource::new();
    let stats = source.stats();
    let controller = StreamController::new(source, CaptureConfig::default());
    let rx = controller.subscribe();

    assert_ok!(controller.start(test_descriptor()));
    assert_eq!(next_status(&rx).await, StatusEvent::Connected);
    next_frame(&rx).await;
    drop(controller);

    let mut trailing = Vec::new();
    while let Some(event) = timeout(WAIT, rx.recv()).await.expect("channel never closed") {
        trailing.push(event);
    }
    assert_eq!(
        statuses(&trailing).last(),
        Some(&StatusEvent::Disconnected {
            reason: "stopped".to_string()
        })
    );
    assert_eq!(stats.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pattern_source_honours_resolution() {
    let controller = StreamController::new(TestPatternSource::new(30), CaptureConfig::default());
    let rx = controller.subscribe();
    let descriptor = test_descriptor().with_resolution(Resolution::P480);
    let expected = descriptor.resolution().dimensions().unwrap();

    assert_ok!(controller.start(descriptor));
    assert_eq!(next_status(&rx).await, StatusEvent::Connected);
    let frame = next_frame(&rx).await;
    assert_eq!((frame.width, frame.height), expected);
    assert_eq!(frame.data.len(), frame.stride() * frame.height as usize);
}

#[tokio::test(start_paused = true)]
async fn test_stop_interrupts_backoff() {
    let source = MockFrameSource::new().with_opens([refused()]);
    let stats = source.stats();
    let config = CaptureConfig::default().with_retry(
        RetryPolicy::default().with_delays(Duration::from_secs(30), Duration::from_secs(30)),
    );
    let controller = StreamController::new(source, config);
    let rx = controller.subscribe();

    assert_ok!(controller.start(test_descriptor()));
    assert_eq!(
        next_transition(&rx).await,
        StatusEvent::Retrying {
            attempt: 1,
            delay: Duration::from_secs(30)
        }
    );

    let stopping = Instant::now();
    assert_ok!(controller.stop());
    wait_stopped(&controller).await;

    assert!(stopping.elapsed() < Duration::from_secs(1));
    assert_eq!(controller.state(), StreamState::Idle);
    assert_eq!(stats.opens(), 1);
    assert!(!statuses(&rx.drain()).contains(&StatusEvent::Connected));
}

#[tokio::test(start_paused = true)]
async fn test_stop_interrupts_blocked_pull() {
    let source = MockFrameSource::new()
        .with_frames([Ok(create_test_image(4, 4, [9, 9, 9]))])
        .hang_when_done();
    let stats = source.stats();
    let config = CaptureConfig::default().with_read_timeout(Duration::from_secs(300));
    let controller = StreamController::new(source, config);
    let rx = controller.subscribe();

    assert_ok!(controller.start(test_descriptor()));
    assert_eq!(next_status(&rx).await, StatusEvent::Connected);
    next_frame(&rx).await;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(controller.state(), StreamState::Streaming);

    let stopping = Instant::now();
    assert_ok!(controller.stop());
    wait_stopped(&controller).await;

    assert!(stopping.elapsed() < Duration::from_secs(1));
    assert_eq!(controller.state(), StreamState::Idle);
    assert_eq!(stats.closes(), 1);
    assert_eq!(
        statuses(&rx.drain()),
        vec![StatusEvent::Disconnected {
            reason: "stopped".to_string()
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_unread_retry_reports_stay_within_capacity() {
    let source = MockFrameSource::new().with_opens(std::iter::repeat_with(refused).take(500));
    let config = CaptureConfig::default().with_channel_capacity(4).with_retry(
        RetryPolicy::default().with_delays(Duration::from_millis(10), Duration::from_millis(10)),
    );
    let controller = StreamController::new(source, config);
    let rx = controller.subscribe();

    assert_ok!(controller.start(test_descriptor()));
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.len() <= 4);
    }

    let stats = controller.stats();
    assert!(stats.status_dropped > 0);
    assert_eq!(controller.state(), StreamState::Streaming);
    let events = rx.drain();
    assert_eq!(events.len(), 4);
    assert!(events.iter().any(|e| matches!(e, StreamEvent::Frame(_))));
}

#[tokio::test(start_paused = true)]
async fn test_events_not_queued_before_subscribe() {
    let source = MockFrameSource::new().with_opens(std::iter::repeat_with(refused).take(50));
    let config = CaptureConfig::default().with_retry(
        RetryPolicy::default().with_delays(Duration::from_millis(10), Duration::from_millis(10)),
    );
    let controller = StreamController::new(source, config);

    assert_ok!(controller.start(test_descriptor()));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(controller.state(), StreamState::Streaming);
    assert_eq!(controller.stats().status_dropped, 0);

    let rx = controller.subscribe();
    assert!(rx.is_empty());
    let frame = next_frame(&rx).await;
    assert!(frame.sequence > 0);
}

#[tokio::test(start_paused = true)]
async fn test_corrupt_packet_during_open_is_retried() {
    let source = MockFrameSource::new()
        .with_opens([Err(SourceError::TransientDecode("bad SPS".to_string()))]);
    let controller = StreamController::new(source, CaptureConfig::default());
    let rx = controller.subscribe();

    assert_ok!(controller.start(test_descriptor()));
    assert!(matches!(
        next_status(&rx).await,
        StatusEvent::Error {
            kind: ErrorKind::DecodeTransient,
            ..
        }
    ));
    assert!(matches!(
        next_status(&rx).await,
        StatusEvent::Retrying { attempt: 1, .. }
    ));
    assert_eq!(next_status(&rx).await, StatusEvent::Connected);
}
