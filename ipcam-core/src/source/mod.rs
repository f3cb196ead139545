//! Frame sources
//!
//! A [`FrameSource`] is the capability the capture loop drives: open a
//! connection for a descriptor, pull decoded images, close. The loop owns
//! timeouts, retries and cancellation; sources only report what happened.

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod pattern;

#[cfg(feature = "ffmpeg")]
pub use ffmpeg::FfmpegSource;
pub use pattern::TestPatternSource;

use std::future::Future;

use crate::descriptor::ConnectionDescriptor;
use crate::error::SourceError;
use crate::types::PixelFormat;

/// A decoded image as produced by a source, before the controller numbers it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel layout
    pub format: PixelFormat,
    /// Tightly packed pixel rows
    pub data: Vec<u8>,
}

impl DecodedImage {
    /// Number of bytes `data` must hold for the declared size and format
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }

    /// Whether the buffer matches the declared size and format
    pub fn is_consistent(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == self.expected_len()
    }
}

/// A decode-capable stream connection
///
/// Futures returned by `open` and `next_frame` may be dropped before they
/// complete (on `stop()` or a timeout); implementations must leave the
/// source in a state where `close` still releases everything.
pub trait FrameSource: Send + 'static {
    /// Connect to the stream described by `descriptor`
    fn open(
        &mut self,
        descriptor: &ConnectionDescriptor,
    ) -> impl Future<Output = Result<(), SourceError>> + Send;

    /// Wait for and decode the next image
    fn next_frame(&mut self) -> impl Future<Output = Result<DecodedImage, SourceError>> + Send;

    /// Release the connection; safe to call when already closed
    fn close(&mut self);

    /// Whether a connection is currently open
    fn is_open(&self) -> bool;
}
