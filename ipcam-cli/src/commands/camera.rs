//! Camera selection shared by the streaming commands

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use ipcam_core::config::ConfigFile;
use ipcam_core::descriptor::{ConnectionDescriptor, Protocol, Resolution};
use ipcam_core::viewport::{Point, ViewportTransform};
use tracing::{debug, info};

/// Host used to label the synthetic test pattern
const TEST_PATTERN_HOST: &str = "localhost";

/// Camera connection arguments
#[derive(Args, Debug)]
pub struct CameraArgs {
    /// Camera host name or IP address (falls back to [camera] in the config)
    #[arg(long)]
    host: Option<String>,

    /// Camera port (default depends on the protocol)
    #[arg(long)]
    port: Option<u16>,

    /// Stream protocol (rtsp, http, other)
    #[arg(long, default_value = "rtsp")]
    protocol: String,

    /// Camera username
    #[arg(short, long)]
    user: Option<String>,

    /// Camera password
    #[arg(long)]
    password: Option<String>,

    /// Stream path, e.g. /stream1
    #[arg(long)]
    path: Option<String>,

    /// Delivered resolution (1080p, 720p, 480p, source)
    #[arg(short, long)]
    resolution: Option<String>,

    /// Remember this camera in the config file
    #[arg(long)]
    remember: bool,

    /// Use a synthetic test pattern instead of a camera
    #[arg(long)]
    pub test_pattern: bool,

    /// Test pattern frame rate
    #[arg(long, default_value = "30")]
    pub fps: u32,
}

impl CameraArgs {
    /// Build the descriptor from flags, falling back to the saved camera
    pub fn descriptor(&self, config: &mut ConfigFile) -> Result<ConnectionDescriptor> {
        let resolution = self
            .resolution
            .as_deref()
            .map(str::parse::<Resolution>)
            .transpose()
            .map_err(|e| anyhow!("{}. Valid options: 1080p, 720p, 480p, source", e))?;

        let descriptor = match (&self.host, &config.camera) {
            (Some(host), _) => self.descriptor_from_flags(host)?,
            (None, Some(saved)) => {
                debug!("Using camera from config: {}", saved);
                saved.clone()
            }
            (None, None) if self.test_pattern => {
                ConnectionDescriptor::new(Protocol::Other, TEST_PATTERN_HOST, 1)?
            }
            (None, None) => bail!(
                "No camera given. Pass --host, save one with --remember, or add a [camera] section via `ipcam config init`"
            ),
        };
        let descriptor = match resolution {
            Some(resolution) => descriptor.with_resolution(resolution),
            None => descriptor,
        };

        if self.remember && !self.test_pattern {
            config.camera = Some(descriptor.clone());
            config.save().context("Failed to save camera to config file")?;
            info!("Saved camera {} to config", descriptor);
        }

        Ok(descriptor)
    }

    /// Fail before connecting when a camera needs a decoder this build lacks
    pub fn check_decoder(&self) -> Result<()> {
        if !self.test_pattern && !cfg!(feature = "ffmpeg") {
            return Err(no_decoder());
        }
        Ok(())
    }

    fn descriptor_from_flags(&self, host: &str) -> Result<ConnectionDescriptor> {
        let protocol: Protocol = self
            .protocol
            .parse()
            .map_err(|e| anyhow!("{}. Valid options: rtsp, http, other", e))?;
        let port = self.port.unwrap_or_else(|| protocol.default_port());

        let mut descriptor = ConnectionDescriptor::new(protocol, host, port)
            .with_context(|| format!("Invalid camera address '{}:{}'", host, port))?;
        if let Some(user) = &self.user {
            descriptor = descriptor
                .with_credentials(user.as_str(), self.password.as_deref().unwrap_or_default());
        }
        if let Some(path) = &self.path {
            descriptor = descriptor.with_path(path.as_str());
        }
        Ok(descriptor)
    }
}


/// Error for a camera stream in a build without FFmpeg
pub fn no_decoder() -> anyhow::Error {
    anyhow!("ipcam was built without FFmpeg support; rebuild with `--features ffmpeg` or use --test-pattern")
}

/// Parse a normalized `x,y` point
pub fn parse_point(s: &str) -> Result<Point, String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected x,y but got '{}'", s))?;
    let x: f64 = x.trim().parse().map_err(|_| format!("invalid x in '{}'", s))?;
    let y: f64 = y.trim().parse().map_err(|_| format!("invalid y in '{}'", s))?;
    if !(0.0..=1.0).contains(&x) || !(0.0..=1.0).contains(&y) {
        return Err(format!("'{}' is outside 0..1", s));
    }
    Ok(Point::new(x, y))
}

/// Zoom to `zoom` around `center` as if by mouse wheel
pub fn apply_zoom(viewport: &mut ViewportTransform, zoom: f64, center: Point) {
    if zoom <= 1.0 {
        return;
    }
    let notches = zoom.ln() / viewport.config().zoom_step.ln();
    viewport.on_wheel(notches, center);
}
