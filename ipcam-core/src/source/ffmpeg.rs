//! RTSP/HTTP camera source backed by FFmpeg
//!
//! FFmpeg calls block, so each connection gets a decoder thread that owns
//! the demuxer, decoder and scaler. Decoded RGB images are handed to the
//! async side through a channel of depth one, which keeps the thread at
//! most one frame ahead of the capture loop.

use ffmpeg_next as ffmpeg;
use ffmpeg::format::{self, Pixel};
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{self, Flags};
use ffmpeg::util::frame::video::Video;
use ffmpeg::Dictionary;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{DecodedImage, FrameSource};
use crate::descriptor::ConnectionDescriptor;
use crate::error::SourceError;
use crate::types::PixelFormat;

/// Default socket timeout handed to FFmpeg
const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

type ImageResult = Result<DecodedImage, SourceError>;

/// Camera source decoding through FFmpeg
pub struct FfmpegSource {
    socket_timeout: Duration,
    session: Option<Session>,
}

/// Async half of one open connection
struct Session {
    frames: mpsc::Receiver<ImageResult>,
    cancel: Arc<AtomicBool>,
}

impl FfmpegSource {
    pub fn new() -> Self {
        Self {
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            session: None,
        }
    }

    /// Set how long FFmpeg waits on a silent socket before giving up
    pub fn with_socket_timeout(mut self, timeout: Duration) -> Self {
        self.socket_timeout = timeout;
        self
    }
}

impl Default for FfmpegSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSource for FfmpegSource {
    async fn open(&mut self, descriptor: &ConnectionDescriptor) -> Result<(), SourceError> {
        self.close();

        let url = descriptor.url();
        let redacted = descriptor.redacted_url();
        let target = descriptor.resolution().dimensions();
        let socket_timeout = self.socket_timeout;

        let cancel = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = oneshot::channel();
        let (frame_tx, frame_rx) = mpsc::channel(1);

        let thread_cancel = cancel.clone();
        std::thread::Builder::new()
            .name("ipcam-decode".to_string())
            .spawn(move || {
                run_decoder(
                    &url,
                    &redacted,
                    socket_timeout,
                    target,
                    ready_tx,
                    frame_tx,
                    thread_cancel,
                )
            })
            .map_err(|e| SourceError::FatalDecode(format!("failed to spawn decoder thread: {}", e)))?;

        self.session = Some(Session {
            frames: frame_rx,
            cancel,
        });

        let opened = match ready_rx.await {
            Ok(result) => result,
            Err(_) => Err(SourceError::ConnectionLost(
                "decoder thread exited during open".to_string(),
            )),
        };
        if opened.is_err() {
            self.close();
        }
        opened
    }

    async fn next_frame(&mut self) -> Result<DecodedImage, SourceError> {
        let Some(session) = self.session.as_mut() else {
            return Err(SourceError::NotOpen);
        };
        match session.frames.recv().await {
            Some(result) => result,
            None => Err(SourceError::ConnectionLost("decoder stopped".to_string())),
        }
    }

    fn close(&mut self) {
        if let Some(session) = self.session.take() {
            // The thread notices on its next frame or when its send fails
            session.cancel.store(true, Ordering::Relaxed);
            debug!("Closed FFmpeg session");
        }
    }

    fn is_open(&self) -> bool {
        self.session.is_some()
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_decoder(
    url: &str,
    redacted: &str,
    socket_timeout: Duration,
    target: Option<(u32, u32)>,
    ready: oneshot::Sender<Result<(), SourceError>>,
    frames: mpsc::Sender<ImageResult>,
    cancel: Arc<AtomicBool>,
) {
    let mut decoder = match Decoder::open(url, socket_timeout, target) {
        Ok(decoder) => decoder,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        debug!("Open of {} abandoned", redacted);
        return;
    }
    info!("Decoding {}", redacted);

    while !cancel.load(Ordering::Relaxed) {
        let result = decoder.next_image();
        let fatal = matches!(&result, Err(e) if !e.is_transient());
        if frames.blocking_send(result).is_err() || fatal {
            break;
        }
    }
    debug!("Decoder thread for {} exiting", redacted);
}

/// Blocking demux, decode and convert pipeline for one connection
struct Decoder {
    input: format::context::Input,
    decoder: ffmpeg::decoder::Video,
    stream_index: usize,
    target: Option<(u32, u32)>,
    scaler: Option<RgbScaler>,
    decoded: Video,
}

impl Decoder {
    fn open(url: &str, socket_timeout: Duration, target: Option<(u32, u32)>) -> Result<Self, SourceError> {
        ffmpeg::init().map_err(|e| SourceError::FatalDecode(format!("FFmpeg init failed: {}", e)))?;

        let mut opts = Dictionary::new();
        opts.set("rtsp_transport", "tcp");
        // Microseconds
        opts.set("timeout", &socket_timeout.as_micros().to_string());

        let input = format::input_with_dictionary(&url, opts).map_err(classify_open_error)?;

        let (stream_index, decoder) = {
            let stream = input
                .streams()
                .best(Type::Video)
                .ok_or_else(|| SourceError::FatalDecode("no video stream".to_string()))?;
            let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
                .map_err(|e| SourceError::FatalDecode(format!("bad codec parameters: {}", e)))?;
            let decoder = context
                .decoder()
                .video()
                .map_err(|e| SourceError::FatalDecode(format!("no decoder: {}", e)))?;
            (stream.index(), decoder)
        };

        debug!(
            "Opened video stream {}: {}x{} {:?}",
            stream_index,
            decoder.width(),
            decoder.height(),
            decoder.format()
        );

        Ok(Self {
            input,
            decoder,
            stream_index,
            target,
            scaler: None,
            decoded: Video::empty(),
        })
    }

    fn next_image(&mut self) -> ImageResult {
        loop {
            match self.decoder.receive_frame(&mut self.decoded) {
                Ok(()) => return self.convert(),
                Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::error::EAGAIN => {}
                Err(ffmpeg::Error::Eof) => {
                    return Err(SourceError::ConnectionLost("end of stream".to_string()));
                }
                Err(e) => return Err(SourceError::TransientDecode(e.to_string())),
            }

            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => {}
                Err(ffmpeg::Error::Eof) => {
                    return Err(SourceError::ConnectionLost("end of stream".to_string()));
                }
                Err(e) => return Err(classify_read_error(e)),
            }
            if packet.stream() != self.stream_index {
                continue;
            }

            match self.decoder.send_packet(&packet) {
                Ok(()) => {}
                Err(ffmpeg::Error::InvalidData) => {
                    return Err(SourceError::TransientDecode("corrupt packet".to_string()));
                }
                Err(e) => return Err(SourceError::FatalDecode(e.to_string())),
            }
        }
    }

    fn convert(&mut self) -> ImageResult {
        let key = (
            self.decoded.width(),
            self.decoded.height(),
            self.decoded.format(),
        );
        let (width, height) = self.target.unwrap_or((key.0, key.1));

        let stale = self
            .scaler
            .as_ref()
            .is_none_or(|s| s.input != key || s.output_size() != (width, height));
        if stale {
            if self.scaler.is_some() {
                warn!("Stream format changed to {}x{} {:?}", key.0, key.1, key.2);
            }
            self.scaler = Some(RgbScaler::new(key, width, height)?);
        }

        match self.scaler.as_mut() {
            Some(scaler) => scaler.convert(&self.decoded),
            None => Err(SourceError::FatalDecode("scaler unavailable".to_string())),
        }
    }
}

/// Converts decoded frames to packed RGB24 at a fixed output size
struct RgbScaler {
    context: scaling::Context,
    output: Video,
    input: (u32, u32, Pixel),
}

impl RgbScaler {
    fn new(input: (u32, u32, Pixel), width: u32, height: u32) -> Result<Self, SourceError> {
        let (src_width, src_height, src_format) = input;
        debug!(
            "Creating scaler: {:?} {}x{} -> RGB24 {}x{}",
            src_format, src_width, src_height, width, height
        );

        let context = scaling::Context::get(
            src_format,
            src_width,
            src_height,
            Pixel::RGB24,
            width,
            height,
            Flags::BILINEAR,
        )
        .map_err(|e| SourceError::FatalDecode(format!("failed to create scaler: {}", e)))?;

        Ok(Self {
            context,
            output: Video::new(Pixel::RGB24, width, height),
            input,
        })
    }

    fn output_size(&self) -> (u32, u32) {
        (self.output.width(), self.output.height())
    }

    fn convert(&mut self, frame: &Video) -> ImageResult {
        self.context
            .run(frame, &mut self.output)
            .map_err(|e| SourceError::TransientDecode(format!("scaling failed: {}", e)))?;

        let (width, height) = self.output_size();
        let row = width as usize * PixelFormat::Rgb24.bytes_per_pixel();
        let stride = self.output.stride(0);
        let plane = self.output.data(0);

        let mut data = Vec::with_capacity(row * height as usize);
        for y in 0..height as usize {
            let start = y * stride;
            data.extend_from_slice(&plane[start..start + row]);
        }

        Ok(DecodedImage {
            width,
            height,
            format: PixelFormat::Rgb24,
            data,
        })
    }
}

fn classify_open_error(err: ffmpeg::Error) -> SourceError {
    let message = err.to_string();
    match err {
        ffmpeg::Error::HttpUnauthorized | ffmpeg::Error::HttpForbidden => {
            SourceError::auth_failed(message)
        }
        ffmpeg::Error::Other { errno } => match io::Error::from_raw_os_error(errno).kind() {
            io::ErrorKind::TimedOut => SourceError::timeout(message),
            _ => SourceError::refused(message),
        },
        _ if message.contains("401") || message.contains("403") => SourceError::auth_failed(message),
        _ => SourceError::refused(message),
    }
}

fn classify_read_error(err: ffmpeg::Error) -> SourceError {
    match err {
        ffmpeg::Error::InvalidData => SourceError::TransientDecode(err.to_string()),
        other => SourceError::ConnectionLost(other.to_string()),
    }
}
