//! Snapshot command - save the visible region of one frame

use anyhow::{anyhow, Context, Result};
use chrono::Local;
use clap::Args;
use image::{ImageBuffer, ImageFormat, RgbImage};
use ipcam_core::{
    capture::StreamController,
    config::{CaptureConfig, ConfigFile, SnapshotFormat},
    descriptor::ConnectionDescriptor,
    error::IpcamError,
    source::{FrameSource, TestPatternSource},
    types::{Frame, PixelFormat, StatusEvent, StreamEvent, StreamState},
    viewport::{PixelRect, Point, ViewportTransform},
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[cfg(feature = "ffmpeg")]
use ipcam_core::source::FfmpegSource;

#[cfg(not(feature = "ffmpeg"))]
use super::camera::no_decoder;
use super::camera::{apply_zoom, parse_point, CameraArgs};

/// Arguments for the snapshot command
#[derive(Args)]
pub struct SnapshotArgs {
    #[command(flatten)]
    camera: CameraArgs,

    /// Zoom factor applied before cropping
    #[arg(short, long, default_value = "1.0")]
    zoom: f64,

    /// Zoom center as normalized x,y
    #[arg(long, value_parser = parse_point, default_value = "0.5,0.5")]
    center: Point,

    /// Output directory (defaults to [snapshot] directory, then the current directory)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Image format (png, jpeg)
    #[arg(short, long)]
    format: Option<String>,

    /// Seconds to wait for the first frame
    #[arg(long, default_value = "30")]
    wait: u64,
}

/// Capture a single frame and write it to disk
pub async fn snapshot(args: SnapshotArgs) -> Result<()> {
    args.camera.check_decoder()?;
    let mut config = ConfigFile::load_or_default();
    let capture = config
        .capture_config()
        .context("Invalid [capture] or [retry] settings")?;
    let mut viewport = ViewportTransform::new(
        config
            .viewport_config()
            .context("Invalid [viewport] settings")?,
    );
    apply_zoom(&mut viewport, args.zoom, args.center);

    let format = match &args.format {
        Some(format) => format
            .parse::<SnapshotFormat>()
            .map_err(|e| anyhow!("{}. Valid options: png, jpeg", e))?,
        None => config.snapshot.format,
    };
    let directory = args
        .output
        .clone()
        .unwrap_or_else(|| config.snapshot.directory.clone());
    let descriptor = args.camera.descriptor(&mut config)?;

    let frame = grab_from_args(&args, capture, descriptor).await?;

    let region = viewport
        .visible_rect(frame.width, frame.height)
        .to_pixels(frame.width, frame.height);
    let path = save_frame(&frame, region, &directory, format)
        .context("Failed to save snapshot")?;

    println!(
        "Saved {}x{} snapshot (frame #{}) to {}",
        region.width,
        region.height,
        frame.sequence,
        path.display()
    );
    Ok(())
}

/// Pick the source the arguments ask for and grab one frame from it
async fn grab_from_args(
    args: &SnapshotArgs,
    capture: CaptureConfig,
    descriptor: ConnectionDescriptor,
) -> Result<Frame> {
    let wait = Duration::from_secs(args.wait);
    if args.camera.test_pattern {
        let source = TestPatternSource::new(args.camera.fps);
        return grab(source, capture, descriptor, wait).await;
    }
    #[cfg(feature = "ffmpeg")]
    return grab(FfmpegSource::new(), capture, descriptor, wait).await;
    #[cfg(not(feature = "ffmpeg"))]
    return Err(no_decoder());
}

/// Start a session, wait for one frame and return the controller's snapshot
async fn grab<S: FrameSource>(
    source: S,
    capture: CaptureConfig,
    descriptor: ConnectionDescriptor,
    wait: Duration,
) -> Result<Frame> {
    let controller = StreamController::new(source, capture);
    let events = controller.subscribe();
    let mut states = controller.watch_state();

    println!("Connecting to {}...", descriptor);
    controller
        .start(descriptor)
        .context("Failed to start stream")?;

    let first_frame = async {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(StreamEvent::Frame(_)) => return Ok(()),
                    Some(StreamEvent::Status(StatusEvent::Retrying { attempt, delay })) => {
                        println!("Retrying in {:.1}s (attempt {})", delay.as_secs_f64(), attempt);
                    }
                    Some(StreamEvent::Status(status)) => debug!("Status: {:?}", status),
                    None => return Err(anyhow!("Stream closed before a frame arrived")),
                },
                changed = states.changed() => {
                    if changed.is_err() {
                        return Err(anyhow!("Stream closed before a frame arrived"));
                    }
                    if let StreamState::Failed(reason) = *states.borrow_and_update() {
                        return Err(anyhow!("Stream failed: {}", reason));
                    }
                }
            }
        }
    };

    let outcome = match tokio::time::timeout(wait, first_frame).await {
        Ok(Ok(())) => controller
            .snapshot()
            .map_err(IpcamError::from)
            .context("Failed to take snapshot"),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(anyhow!("No frame received within {}s", wait.as_secs())),
    };

    controller.stop()?;
    controller.stopped().await;
    outcome
}

/// Crop `frame` to `region` and write it with a timestamped name
fn save_frame(
    frame: &Frame,
    region: PixelRect,
    directory: &Path,
    format: SnapshotFormat,
) -> ipcam_core::Result<PathBuf> {
    if region.width == 0 || region.height == 0 {
        return Err(IpcamError::image("visible region is empty"));
    }

    let pixels = frame.crop(region.x, region.y, region.width, region.height);
    let rgb = to_rgb(frame.format, &pixels);
    let img: RgbImage = ImageBuffer::from_raw(region.width, region.height, rgb)
        .ok_or_else(|| IpcamError::image("Invalid image dimensions"))?;

    if !directory.as_os_str().is_empty() && !directory.exists() {
        std::fs::create_dir_all(directory)?;
    }
    let name = format!(
        "snapshot_{}.{}",
        Local::now().format("%Y%m%d_%H%M%S"),
        format.extension()
    );
    let path = directory.join(name);

    let image_format = match format {
        SnapshotFormat::Png => ImageFormat::Png,
        SnapshotFormat::Jpeg => ImageFormat::Jpeg,
    };
    img.save_with_format(&path, image_format)
        .map_err(|e| IpcamError::image(format!("Encoding failed: {}", e)))?;

    info!("Wrote snapshot {:?}", path);
    Ok(path)
}

/// Convert packed pixels of any supported layout to RGB24
fn to_rgb(format: PixelFormat, pixels: &[u8]) -> Vec<u8> {
    let bpp = format.bytes_per_pixel();
    let mut rgb = Vec::with_capacity(pixels.len() / bpp * 3);
    for px in pixels.chunks_exact(bpp) {
        match format {
            PixelFormat::Rgb24 | PixelFormat::Rgba => rgb.extend_from_slice(&px[..3]),
            PixelFormat::Bgr24 | PixelFormat::Bgra => rgb.extend_from_slice(&[px[2], px[1], px[0]]),
            PixelFormat::Gray8 => rgb.extend_from_slice(&[px[0], px[0], px[0]]),
        }
    }
    rgb
}
