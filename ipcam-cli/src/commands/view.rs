//! View command - stream a camera and report what happens

use anyhow::{anyhow, Context, Result};
use clap::Args;
use ipcam_core::{
    capture::StreamController,
    config::{CaptureConfig, ConfigFile},
    descriptor::ConnectionDescriptor,
    source::{FrameSource, TestPatternSource},
    types::{StatusEvent, StreamEvent, StreamState},
    viewport::{Point, ViewportTransform},
};
use serde::Serialize;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};

#[cfg(feature = "ffmpeg")]
use ipcam_core::source::FfmpegSource;

#[cfg(not(feature = "ffmpeg"))]
use super::camera::no_decoder;
use super::camera::{apply_zoom, parse_point, CameraArgs};

/// Arguments for the view command
#[derive(Args)]
pub struct ViewArgs {
    #[command(flatten)]
    camera: CameraArgs,

    /// Print status events and statistics as JSON lines
    #[arg(long)]
    json: bool,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<u64>,

    /// Initial zoom factor
    #[arg(short, long, default_value = "1.0")]
    zoom: f64,

    /// Zoom center as normalized x,y
    #[arg(long, value_parser = parse_point, default_value = "0.5,0.5")]
    center: Point,
}

/// One line of per-second statistics
#[derive(Serialize)]
struct Report {
    state: StreamState,
    fps: u64,
    width: u32,
    height: u32,
    zoom: f64,
    visible: [f64; 4],
    delivered: u64,
    dropped: u64,
}

/// Stream a camera until Ctrl+C
pub async fn view(args: ViewArgs) -> Result<()> {
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
    let descriptor = args.camera.descriptor(&mut config)?;

    if args.camera.test_pattern {
        let source = TestPatternSource::new(args.camera.fps);
        return run(source, capture, descriptor, viewport, &args).await;
    }
    #[cfg(feature = "ffmpeg")]
    return run(FfmpegSource::new(), capture, descriptor, viewport, &args).await;
    #[cfg(not(feature = "ffmpeg"))]
    return Err(no_decoder());
}

async fn run<S: FrameSource>(
    source: S,
    capture: CaptureConfig,
    descriptor: ConnectionDescriptor,
    mut viewport: ViewportTransform,
    args: &ViewArgs,
) -> Result<()> {
    let controller = StreamController::new(source, capture);
    let events = controller.subscribe();
    let mut states = controller.watch_state();

    if !args.json {
        println!("ipcam - Viewing {}\n", descriptor);
        println!("Press Ctrl+C to stop...\n");
    }
    controller
        .start(descriptor)
        .context("Failed to start stream")?;

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let deadline = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.tick().await;

    let mut frames_this_second = 0u64;
    let mut frame_size = (0u32, 0u32);
    let mut failure = None;

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                }
                if !args.json {
                    println!("\nReceived interrupt signal...");
                }
                break;
            }
            _ = &mut deadline => {
                info!("Viewing time elapsed");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                viewport.on_stream_state(&state);
                info!("Stream state: {}", state);
                if let StreamState::Failed(reason) = state {
                    failure = Some(reason);
                    break;
                }
            }
            event = events.recv() => match event {
                Some(StreamEvent::Frame(frame)) => {
                    frames_this_second += 1;
                    frame_size = (frame.width, frame.height);
                }
                Some(StreamEvent::Status(status)) => print_status(&status, args.json)?,
                None => break,
            },
            _ = ticker.tick() => {
                let stats = controller.stats();
                let rect = viewport.visible_rect(frame_size.0, frame_size.1);
                let report = Report {
                    state: controller.state(),
                    fps: std::mem::take(&mut frames_this_second),
                    width: frame_size.0,
                    height: frame_size.1,
                    zoom: viewport.zoom(),
                    visible: [rect.x, rect.y, rect.width, rect.height],
                    delivered: stats.frames_delivered,
                    dropped: stats.frames_dropped,
                };
                print_report(&report, args.json)?;
            }
        }
    }

    controller.stop()?;
    controller.stopped().await;
    for event in events.drain() {
        if let StreamEvent::Status(status) = event {
            print_status(&status, args.json)?;
        }
    }

    let stats = controller.stats();
    if !args.json {
        println!(
            "\nStream ended: {} frames delivered, {} dropped, {} decode errors, {} reconnects",
            stats.frames_delivered, stats.frames_dropped, stats.decode_errors, stats.reconnects
        );
    }

    match failure {
        Some(reason) => Err(anyhow!("Stream failed: {}", reason)),
        None => Ok(()),
    }
}

fn print_status(status: &StatusEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(status)?);
        return Ok(());
    }

    match status {
        StatusEvent::Connected => println!("Connected"),
        StatusEvent::Disconnected { reason } => println!("Disconnected: {}", reason),
        StatusEvent::Error { kind, message } => println!("Error ({:?}): {}", kind, message),
        StatusEvent::Retrying { attempt, delay } => {
            println!("Retrying in {:.1}s (attempt {})", delay.as_secs_f64(), attempt)
        }
    }
    Ok(())
}

fn print_report(report: &Report, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(report)?);
        return Ok(());
    }

    if report.state != StreamState::Streaming {
        println!("  [{}]", report.state);
        return Ok(());
    }
    let [x, y, w, h] = report.visible;
    println!(
        "  {:>3} fps  {}x{}  zoom {:.2}  view {:.0},{:.0} {:.0}x{:.0}  (dropped {})",
        report.fps, report.width, report.height, report.zoom, x, y, w, h, report.dropped
    );
    Ok(())
}
