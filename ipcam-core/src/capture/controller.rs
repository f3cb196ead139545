//! Stream capture controller
//!
//! Owns one camera connection's lifecycle. Commands are validated
//! synchronously against the current [`StreamState`]; the connection itself
//! is driven by a capture loop running on its own Tokio task, which reports
//! everything that happens through the event channel.
//!
//! ```text
//!   start ──▶ Connecting ──open ok──▶ Streaming ◀──resume── Paused
//!               ▲   │                    │  └──────pause──────▲
//!               │   └─retries spent─▶ Failed                  │
//!               └────────── connection lost ◀─────────────────┘
//!   stop (any active state) ──▶ Stopping ──source released──▶ Idle
//! ```

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use super::channel::{event_channel, EventReceiver, EventSender};
use crate::config::CaptureConfig;
use crate::descriptor::ConnectionDescriptor;
use crate::error::{
    ConnectionErrorKind, SnapshotError, SourceError, StartError, StateError,
};
use crate::source::{DecodedImage, FrameSource};
use crate::types::{
    Command, ErrorKind, FailureReason, Frame, StatusEvent, StreamEvent, StreamState,
};

/// Counters for the lifetime of a controller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Frames pushed to the event channel
    pub frames_delivered: u64,
    /// Frames discarded because consumers fell behind
    pub frames_dropped: u64,
    /// Status events discarded from a queue holding no frames
    pub status_dropped: u64,
    /// Transient decode errors skipped by the capture loop
    pub decode_errors: u64,
    /// Connection losses that led to a reconnect
    pub reconnects: u64,
}

/// State shared between the controller and its capture loop
struct Shared<S> {
    state: watch::Sender<StreamState>,
    events: EventSender,
    /// Most recently delivered frame, for snapshots
    latest: Mutex<Option<Frame>>,
    /// The source, parked here between sessions
    source: Mutex<Option<S>>,
    frames_delivered: AtomicU64,
    decode_errors: AtomicU64,
    reconnects: AtomicU64,
}

impl<S> Shared<S> {
    fn emit(&self, status: StatusEvent) {
        debug!("Status: {:?}", status);
        self.events.send(StreamEvent::Status(status));
    }

    /// Move to `next` if the current state satisfies `from`
    fn transition(&self, from: impl Fn(&StreamState) -> bool, next: StreamState) -> bool {
        self.state.send_if_modified(|state| {
            if !from(state) {
                return false;
            }
            debug_assert!(state.can_transition_to(&next), "{} -> {}", state, next);
            trace!("State {} -> {}", state, next);
            *state = next;
            true
        })
    }
}

/// Drives one [`FrameSource`] through connect, stream, reconnect and stop
pub struct StreamController<S: FrameSource> {
    shared: Arc<Shared<S>>,
    config: CaptureConfig,
    runtime: Handle,
}

impl<S: FrameSource> StreamController<S> {
    /// Create a controller on the current Tokio runtime
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime; use
    /// [`with_runtime`](Self::with_runtime) from other threads.
    pub fn new(source: S, config: CaptureConfig) -> Self {
        Self::with_runtime(source, config, Handle::current())
    }

    /// Create a controller whose capture loop runs on `runtime`
    pub fn with_runtime(source: S, config: CaptureConfig, runtime: Handle) -> Self {
        // Events are only queued once someone subscribes
        let (events, _) = event_channel(config.channel_capacity);
        let (state, _) = watch::channel(StreamState::Idle);

        Self {
            shared: Arc::new(Shared {
                state,
                events,
                latest: Mutex::new(None),
                source: Mutex::new(Some(source)),
                frames_delivered: AtomicU64::new(0),
                decode_errors: AtomicU64::new(0),
                reconnects: AtomicU64::new(0),
            }),
            config,
            runtime,
        }
    }

    /// Current state
    pub fn state(&self) -> StreamState {
        *self.shared.state.borrow()
    }

    /// Watch state changes
    pub fn watch_state(&self) -> watch::Receiver<StreamState> {
        self.shared.state.subscribe()
    }

    /// Receive frames and status events
    pub fn subscribe(&self) -> EventReceiver {
        self.shared.events.subscribe()
    }

    /// Capture configuration
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Lifetime counters
    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_delivered: self.shared.frames_delivered.load(Ordering::Relaxed),
            frames_dropped: self.shared.events.dropped(),
            status_dropped: self.shared.events.status_dropped(),
            decode_errors: self.shared.decode_errors.load(Ordering::Relaxed),
            reconnects: self.shared.reconnects.load(Ordering::Relaxed),
        }
    }

    /// Start a session for `descriptor`
    ///
    /// Returns as soon as the capture loop is spawned; connection problems
    /// arrive later as status events.
    pub fn start(&self, descriptor: ConnectionDescriptor) -> Result<(), StartError> {
        descriptor.validate()?;

        let mut source = None;
        let mut rejected = None;
        self.shared.state.send_if_modified(|state| {
            if !matches!(state, StreamState::Idle | StreamState::Failed(_)) {
                rejected = Some(*state);
                return false;
            }
            match self.shared.source.lock().take() {
                Some(s) => {
                    source = Some(s);
                    *state = StreamState::Connecting;
                    true
                }
                None => {
                    // Previous loop has not handed the source back yet
                    rejected = Some(StreamState::Stopping);
                    false
                }
            }
        });

        let source = match (source, rejected) {
            (Some(source), _) => source,
            (None, state) => {
                return Err(StateError {
                    command: Command::Start,
                    state: state.unwrap_or(StreamState::Stopping),
                }
                .into());
            }
        };

        *self.shared.latest.lock() = None;
        info!("Starting stream {}", descriptor);

        let capture = CaptureLoop {
            shared: self.shared.clone(),
            source,
            descriptor,
            config: self.config.clone(),
            state_rx: self.shared.state.subscribe(),
            sequence: 0,
            announced: false,
        };
        self.runtime.spawn(capture.run());
        Ok(())
    }

    /// Stop delivering frames but keep the connection
    pub fn pause(&self) -> Result<(), StateError> {
        self.command(Command::Pause, StreamState::Streaming, StreamState::Paused)?;
        info!("Stream paused");
        Ok(())
    }

    /// Resume delivering frames after [`pause`](Self::pause)
    pub fn resume(&self) -> Result<(), StateError> {
        self.command(Command::Resume, StreamState::Paused, StreamState::Streaming)?;
        info!("Stream resumed");
        Ok(())
    }

    /// End the session
    ///
    /// Signals the capture loop and returns immediately; the loop releases
    /// the source and moves to `Idle`. Calling it with no active session is
    /// a no-op.
    pub fn stop(&self) -> Result<(), StateError> {
        if self
            .shared
            .transition(StreamState::is_active, StreamState::Stopping)
        {
            info!("Stopping stream");
        }
        Ok(())
    }

    /// Wait until the capture loop of the current session has exited
    pub async fn stopped(&self) {
        let mut rx = self.shared.state.subscribe();
        // Only fails if the sender is gone, which cannot happen while self lives
        let _ = rx
            .wait_for(|state| matches!(state, StreamState::Idle | StreamState::Failed(_)))
            .await;
    }

    /// The most recently delivered frame
    pub fn snapshot(&self) -> Result<Frame, SnapshotError> {
        let state = self.state();
        if !matches!(state, StreamState::Streaming | StreamState::Paused) {
            return Err(StateError {
                command: Command::Snapshot,
                state,
            }
            .into());
        }
        self.shared.latest.lock().clone().ok_or(SnapshotError::NoFrame)
    }

    fn command(
        &self,
        command: Command,
        from: StreamState,
        to: StreamState,
    ) -> Result<(), StateError> {
        let mut current = from;
        let applied = self.shared.state.send_if_modified(|state| {
            current = *state;
            if *state != from {
                return false;
            }
            *state = to;
            true
        });
        if applied {
            Ok(())
        } else {
            Err(StateError {
                command,
                state: current,
            })
        }
    }
}

impl<S: FrameSource> Drop for StreamController<S> {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Why the capture loop ended
enum Exit {
    Stopped,
    Failed(FailureReason),
}

/// One session's capture loop
struct CaptureLoop<S: FrameSource> {
    shared: Arc<Shared<S>>,
    source: S,
    descriptor: ConnectionDescriptor,
    config: CaptureConfig,
    state_rx: watch::Receiver<StreamState>,
    /// Next frame number
    sequence: u64,
    /// Whether `Connected` was emitted for the current connection
    announced: bool,
}

impl<S: FrameSource> CaptureLoop<S> {
    async fn run(mut self) {
        let exit = loop {
            if let Err(exit) = self.connect().await {
                break exit;
            }
            if !self.shared.transition(
                |s| *s == StreamState::Connecting,
                StreamState::Streaming,
            ) {
                break Exit::Stopped;
            }
            self.announced = true;
            info!("Connected to {}", self.descriptor.redacted_url());
            self.shared.emit(StatusEvent::Connected);

            if let Err(exit) = self.stream().await {
                break exit;
            }
        };

        self.finish(exit);
    }

    /// Open the source, retrying per policy
    async fn connect(&mut self) -> Result<(), Exit> {
        let mut attempt: u32 = 0;
        loop {
            debug!("Opening {}", self.descriptor.redacted_url());
            let opened = tokio::select! {
                biased;
                _ = stop_requested(&mut self.state_rx) => return Err(Exit::Stopped),
                result = tokio::time::timeout(
                    self.config.open_timeout,
                    self.source.open(&self.descriptor),
                ) => result,
            };

            let err = match opened {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(err)) => err,
                Err(_) => SourceError::timeout(format!(
                    "camera did not open within {:?}",
                    self.config.open_timeout
                )),
            };
            self.source.close();

            warn!(
                "Failed to open {}: {}",
                self.descriptor.redacted_url(),
                err
            );
            self.shared.emit(StatusEvent::Error {
                kind: error_kind(&err),
                message: err.to_string(),
            });

            if !err.is_retryable() && !self.config.retry.retry_auth_failures {
                error!("Authentication rejected, not retrying");
                return Err(Exit::Failed(FailureReason::AuthenticationFailed));
            }

            attempt += 1;
            if self.config.retry.is_exhausted(attempt) {
                let message = format!("gave up after {} retries", attempt - 1);
                error!("{}", message);
                self.shared.emit(StatusEvent::Error {
                    kind: ErrorKind::MaxRetriesExceeded,
                    message,
                });
                return Err(Exit::Failed(FailureReason::MaxRetriesExceeded));
            }

            let delay = self.config.retry.delay_for(attempt);
            info!("Retrying in {:?} (attempt {})", delay, attempt);
            self.shared.emit(StatusEvent::Retrying { attempt, delay });

            tokio::select! {
                biased;
                _ = stop_requested(&mut self.state_rx) => return Err(Exit::Stopped),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Pull frames until the connection is lost (`Ok`) or the session ends
    async fn stream(&mut self) -> Result<(), Exit> {
        loop {
            let state = *self.state_rx.borrow_and_update();
            match state {
                StreamState::Streaming => {}
                StreamState::Paused => {
                    // Poll slowly so a dead link is still noticed while paused
                    tokio::select! {
                        biased;
                        _ = self.state_rx.changed() => continue,
                        _ = tokio::time::sleep(self.config.pause_poll_interval) => {}
                    }
                }
                StreamState::Stopping => return Err(Exit::Stopped),
                other => {
                    warn!("Capture loop found unexpected state {}", other);
                    return Err(Exit::Stopped);
                }
            }

            let pulled = tokio::select! {
                biased;
                _ = stop_requested(&mut self.state_rx) => return Err(Exit::Stopped),
                result = tokio::time::timeout(
                    self.config.read_timeout,
                    self.source.next_frame(),
                ) => result,
            };

            match pulled {
                Ok(Ok(image)) => self.deliver(image),
                Ok(Err(err)) if err.is_transient() => {
                    let total = self.shared.decode_errors.fetch_add(1, Ordering::Relaxed) + 1;
                    debug!("Skipping undecodable frame: {} (total: {})", err, total);
                }
                Ok(Err(err)) => return self.connection_lost(err),
                Err(_) => {
                    return self.connection_lost(SourceError::timeout(format!(
                        "no frame within {:?}",
                        self.config.read_timeout
                    )));
                }
            }
        }
    }

    fn deliver(&mut self, image: DecodedImage) {
        if !image.is_consistent() {
            let total = self.shared.decode_errors.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                "Discarding {}x{} image with {} bytes (total errors: {})",
                image.width,
                image.height,
                image.data.len(),
                total
            );
            return;
        }

        if *self.state_rx.borrow() != StreamState::Streaming {
            trace!("Dropping frame while paused");
            return;
        }

        let frame = Frame {
            width: image.width,
            height: image.height,
            format: image.format,
            sequence: self.sequence,
            captured_at: Instant::now(),
            data: image.data.into(),
        };
        self.sequence += 1;

        *self.shared.latest.lock() = Some(frame.clone());
        self.shared.frames_delivered.fetch_add(1, Ordering::Relaxed);
        self.shared.events.send(StreamEvent::Frame(frame));
    }

    fn connection_lost(&mut self, err: SourceError) -> Result<(), Exit> {
        warn!("Lost connection to {}: {}", self.descriptor.redacted_url(), err);
        self.source.close();

        self.shared.emit(StatusEvent::Error {
            kind: error_kind(&err),
            message: err.to_string(),
        });
        self.shared.emit(StatusEvent::Disconnected {
            reason: err.to_string(),
        });
        self.announced = false;

        if !self.shared.transition(
            |s| matches!(s, StreamState::Streaming | StreamState::Paused),
            StreamState::Connecting,
        ) {
            return Err(Exit::Stopped);
        }
        self.shared.reconnects.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Release the source, hand it back and settle the final state
    fn finish(self, exit: Exit) {
        let CaptureLoop {
            shared,
            mut source,
            announced,
            sequence,
            ..
        } = self;

        source.close();
        if announced {
            shared.emit(StatusEvent::Disconnected {
                reason: "stopped".to_string(),
            });
        }
        *shared.source.lock() = Some(source);

        match exit {
            Exit::Stopped => {
                shared.transition(|s| *s == StreamState::Stopping, StreamState::Idle);
                info!("Stream stopped after {} frames", sequence);
            }
            Exit::Failed(reason) => {
                let failed = shared.transition(
                    |s| *s == StreamState::Connecting,
                    StreamState::Failed(reason),
                );
                if failed {
                    error!("Stream failed: {}", reason);
                } else {
                    // stop() raced the failure
                    shared.transition(|s| *s == StreamState::Stopping, StreamState::Idle);
                    info!("Stream stopped while failing: {}", reason);
                }
            }
        }
    }
}

/// Resolves once `stop()` has been called
async fn stop_requested(rx: &mut watch::Receiver<StreamState>) {
    // The sender lives in `Shared`, which the loop keeps alive
    let _ = rx.wait_for(|state| *state == StreamState::Stopping).await;
}

fn error_kind(err: &SourceError) -> ErrorKind {
    match err {
        SourceError::Connect { kind, .. } => match kind {
            ConnectionErrorKind::Refused => ErrorKind::ConnectionRefused,
            ConnectionErrorKind::Timeout => ErrorKind::Timeout,
            ConnectionErrorKind::AuthFailed => ErrorKind::AuthenticationFailed,
        },
        SourceError::FatalDecode(_) => ErrorKind::DecodeFatal,
        SourceError::TransientDecode(_) => ErrorKind::DecodeTransient,
        SourceError::ConnectionLost(_) | SourceError::NotOpen => ErrorKind::ConnectionLost,
    }
}
