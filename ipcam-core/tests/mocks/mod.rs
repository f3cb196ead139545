//! Mock infrastructure for testing
//!
//! Provides a scripted frame source and helpers for building test images.

#![allow(dead_code)]

use ipcam_core::descriptor::{ConnectionDescriptor, Protocol};
use ipcam_core::error::SourceError;
use ipcam_core::source::{DecodedImage, FrameSource};
use ipcam_core::types::PixelFormat;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Create a solid RGB test image
///
/// # Arguments
/// * `width` - Image width in pixels
/// * `height` - Image height in pixels
/// * `color` - RGB color values [R, G, B]
pub fn create_test_image(width: u32, height: u32, color: [u8; 3]) -> DecodedImage {
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for _ in 0..(width * height) {
        data.extend_from_slice(&color);
    }

    DecodedImage {
        width,
        height,
        format: PixelFormat::Rgb24,
        data,
    }
}

/// Descriptor for a camera that never needs to exist
pub fn test_descriptor() -> ConnectionDescriptor {
    ConnectionDescriptor::new(Protocol::Rtsp, "192.168.1.64", 554)
        .map(|d| d.with_credentials("admin", "secret").with_path("stream1"))
        .unwrap()
}

/// Counters shared between a mock source and the test observing it
#[derive(Debug, Default)]
pub struct MockStats {
    pub opens: AtomicU32,
    pub closes: AtomicU32,
    pub frames: AtomicU64,
}

impl MockStats {
    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }
}

/// Frame source driven by a script
///
/// `open` pops the next scripted result (succeeding once the script is
/// empty). `next_frame` waits `frame_interval`, then pops the next scripted
/// frame result; once that script is empty it either produces solid images
/// forever or hangs, depending on `endless`.
pub struct MockFrameSource {
    opens: VecDeque<Result<(), SourceError>>,
    frames: VecDeque<Result<DecodedImage, SourceError>>,
    open_delay: Duration,
    frame_interval: Duration,
    endless: bool,
    is_open: bool,
    stats: Arc<MockStats>,
}

impl MockFrameSource {
    /// A camera that opens immediately and streams 40ms frames forever
    pub fn new() -> Self {
        Self {
            opens: VecDeque::new(),
            frames: VecDeque::new(),
            open_delay: Duration::ZERO,
            frame_interval: Duration::from_millis(40),
            endless: true,
            is_open: false,
            stats: Arc::new(MockStats::default()),
        }
    }

    /// Queue results for successive `open` calls
    pub fn with_opens(mut self, opens: impl IntoIterator<Item = Result<(), SourceError>>) -> Self {
        self.opens.extend(opens);
        self
    }

    /// Queue results for successive `next_frame` calls
    pub fn with_frames(
        mut self,
        frames: impl IntoIterator<Item = Result<DecodedImage, SourceError>>,
    ) -> Self {
        self.frames.extend(frames);
        self
    }

    /// Make every `open` take `delay`
    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Hang once the frame script is exhausted
    pub fn hang_when_done(mut self) -> Self {
        self.endless = false;
        self
    }

    /// Handle on the call counters
    pub fn stats(&self) -> Arc<MockStats> {
        self.stats.clone()
    }
}

impl FrameSource for MockFrameSource {
    async fn open(&mut self, _descriptor: &ConnectionDescriptor) -> Result<(), SourceError> {
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        let result = self.opens.pop_front().unwrap_or(Ok(()));
        self.is_open = result.is_ok();
        result
    }

    async fn next_frame(&mut self) -> Result<DecodedImage, SourceError> {
        if !self.is_open {
            return Err(SourceError::NotOpen);
        }
        tokio::time::sleep(self.frame_interval).await;

        let result = match self.frames.pop_front() {
            Some(result) => result,
            None if self.endless => Ok(create_test_image(4, 4, [0, 128, 255])),
            None => std::future::pending().await,
        };
        self.stats.frames.fetch_add(1, Ordering::SeqCst);
        result
    }

    fn close(&mut self) {
        if self.is_open {
            self.stats.closes.fetch_add(1, Ordering::SeqCst);
        }
        self.is_open = false;
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}
