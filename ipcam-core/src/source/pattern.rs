//! Synthetic test-pattern source
//!
//! Produces a moving diagonal gradient at a fixed frame rate. Useful for
//! exercising a viewer without a camera on the network.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{DecodedImage, FrameSource};
use crate::descriptor::ConnectionDescriptor;
use crate::error::SourceError;
use crate::types::PixelFormat;

/// Size used when the descriptor asks for the source resolution
const NATIVE_SIZE: (u32, u32) = (1280, 720);

/// Moving-gradient frame generator
pub struct TestPatternSource {
    fps: u32,
    size: (u32, u32),
    frame_count: u64,
    next_due: Option<Instant>,
}

impl TestPatternSource {
    /// Create a pattern source producing `fps` frames per second
    pub fn new(fps: u32) -> Self {
        Self {
            fps: fps.max(1),
            size: NATIVE_SIZE,
            frame_count: 0,
            next_due: None,
        }
    }

    /// Frames generated since the source was created
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps
    }

    fn render(&self) -> DecodedImage {
        let (width, height) = self.size;
        let shift = (self.frame_count % 256) as u32;
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        for y in 0..height {
            for x in 0..width {
                let r = ((x * 255 / width.max(1)) + shift) as u8;
                let g = ((y * 255 / height.max(1)) + shift) as u8;
                let b = (((x + y) * 255 / (width + height).max(1)) + shift) as u8;
                data.extend_from_slice(&[r, g, b]);
            }
        }

        DecodedImage {
            width,
            height,
            format: PixelFormat::Rgb24,
            data,
        }
    }
}

impl Default for TestPatternSource {
    fn default() -> Self {
        Self::new(30)
    }
}

impl FrameSource for TestPatternSource {
    async fn open(&mut self, descriptor: &ConnectionDescriptor) -> Result<(), SourceError> {
        self.size = descriptor.resolution().dimensions().unwrap_or(NATIVE_SIZE);
        self.next_due = Some(Instant::now());
        info!(
            "Test pattern opened for {} at {}x{} @ {}fps",
            descriptor.redacted_url(),
            self.size.0,
            self.size.1,
            self.fps
        );
        Ok(())
    }

    async fn next_frame(&mut self) -> Result<DecodedImage, SourceError> {
        let due = self.next_due.ok_or(SourceError::NotOpen)?;
        tokio::time::sleep_until(due).await;
        self.next_due = Some(due + self.frame_interval());

        let image = self.render();
        self.frame_count += 1;
        Ok(image)
    }

    fn close(&mut self) {
        if self.next_due.take().is_some() {
            debug!("Test pattern closed after {} frames", self.frame_count);
        }
    }

    fn is_open(&self) -> bool {
        self.next_due.is_some()
    }
}
