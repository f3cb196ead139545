//! Core types for ipcam
//!
//! Frames, stream states and the status events delivered alongside frames.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Commands accepted by a [`StreamController`](crate::capture::StreamController)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Start,
    Pause,
    Resume,
    Stop,
    Snapshot,
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Pause => write!(f, "pause"),
            Self::Resume => write!(f, "resume"),
            Self::Stop => write!(f, "stop"),
            Self::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// Why a session ended in [`StreamState::Failed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Reconnection gave up after the configured number of retries
    MaxRetriesExceeded,
    /// The camera rejected the credentials and auth retries are disabled
    AuthenticationFailed,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaxRetriesExceeded => write!(f, "max retries exceeded"),
            Self::AuthenticationFailed => write!(f, "authentication failed"),
        }
    }
}

/// Lifecycle state of a stream controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum StreamState {
    /// No session
    #[default]
    Idle,
    /// Opening the source or waiting to retry
    Connecting,
    /// Delivering frames
    Streaming,
    /// Connected, frames are dropped
    Paused,
    /// Stop requested, source being released
    Stopping,
    /// Session ended without a stop request
    Failed(FailureReason),
}

impl StreamState {
    /// Whether the capture loop may move from `self` to `next`
    pub fn can_transition_to(&self, next: &StreamState) -> bool {
        use StreamState::*;
        matches!(
            (self, next),
            (Idle | Failed(_), Connecting)
                | (Connecting, Streaming | Failed(_))
                | (Streaming, Paused)
                | (Paused, Streaming)
                | (Streaming | Paused, Connecting)
                | (Connecting | Streaming | Paused, Stopping)
                | (Stopping, Idle)
        )
    }

    /// Whether a session is in progress
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Connecting | Self::Streaming | Self::Paused)
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Streaming => write!(f, "streaming"),
            Self::Paused => write!(f, "paused"),
            Self::Stopping => write!(f, "stopping"),
            Self::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// Pixel layout of decoded frame data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 8-bit R, G, B
    #[default]
    Rgb24,
    /// 8-bit B, G, R (OpenCV order)
    Bgr24,
    /// 8-bit R, G, B, A
    Rgba,
    /// 8-bit B, G, R, A
    Bgra,
    /// 8-bit luma
    Gray8,
}

impl PixelFormat {
    /// Bytes per pixel
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Rgb24 | Self::Bgr24 => 3,
            Self::Rgba | Self::Bgra => 4,
            Self::Gray8 => 1,
        }
    }
}

/// A decoded video frame
///
/// Pixel data is immutable and shared, so handing a frame to a consumer
/// never exposes a buffer the capture loop still writes to.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel layout
    pub format: PixelFormat,
    /// Position in the session, starting at 0
    pub sequence: u64,
    /// When the capture loop received the image
    pub captured_at: Instant,
    /// Tightly packed rows, `width * bytes_per_pixel` bytes each
    pub data: Arc<[u8]>,
}

impl Frame {
    /// Bytes per row
    pub fn stride(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Copy out a sub-rectangle as tightly packed rows
    ///
    /// The rectangle is clipped to the frame.
    pub fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Vec<u8> {
        let x = x.min(self.width);
        let y = y.min(self.height);
        let width = width.min(self.width - x);
        let height = height.min(self.height - y);
        let bpp = self.format.bytes_per_pixel();
        let stride = self.stride();

        let mut out = Vec::with_capacity(width as usize * height as usize * bpp);
        for row in y..y + height {
            let start = row as usize * stride + x as usize * bpp;
            let end = start + width as usize * bpp;
            out.extend_from_slice(&self.data[start..end]);
        }
        out
    }
}

/// Category of an asynchronous error reported through [`StatusEvent::Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    ConnectionRefused,
    AuthenticationFailed,
    ConnectionLost,
    DecodeFatal,
    /// A source reported a corrupt packet while opening
    DecodeTransient,
    MaxRetriesExceeded,
}

/// Connection status notifications, interleaved with frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusEvent {
    /// The source opened and frames will follow
    Connected,
    /// The open connection went away
    Disconnected { reason: String },
    /// Something failed; the capture loop decides what happens next
    Error { kind: ErrorKind, message: String },
    /// About to wait `delay` before reconnect attempt `attempt`
    Retrying { attempt: u32, delay: Duration },
}

/// An item on a controller's event channel
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Frame(Frame),
    Status(StatusEvent),
}

impl StreamEvent {
    /// Whether this is a frame
    pub fn is_frame(&self) -> bool {
        matches!(self, Self::Frame(_))
    }
}
