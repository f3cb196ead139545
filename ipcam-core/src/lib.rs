//! ipcam Core Library
//!
//! Resilient capture of RTSP IP-camera streams for desktop viewers.
//!
//! This library provides:
//! - A stream capture controller with reconnection and backoff
//! - A bounded, drop-oldest channel of frames and status events
//! - A zoom/pan viewport transform for displaying frames
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌─────────────────┐
//! │ FrameSource     │───▶│ StreamController │───▶│ EventReceiver   │
//! │ (RTSP decode)   │    │ (capture loop)   │    │ (viewer)        │
//! └─────────────────┘    └──────────────────┘    └────────┬────────┘
//!                                                         ▼
//!                                               ┌───────────────────┐
//!                                               │ ViewportTransform │
//!                                               └───────────────────┘
//! ```

pub mod capture;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod source;
pub mod types;
pub mod viewport;

pub use capture::{CaptureStats, EventReceiver, StreamController};
pub use config::{CaptureConfig, ConfigFile, RetryPolicy, ViewportConfig};
pub use descriptor::{ConnectionDescriptor, Protocol, Resolution};
pub use error::{IpcamError, Result};
pub use source::{DecodedImage, FrameSource, TestPatternSource};
pub use types::{Frame, PixelFormat, StatusEvent, StreamEvent, StreamState};
pub use viewport::{PixelRect, Point, Rect, ViewportTransform};
