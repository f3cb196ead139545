//! Configuration file loading and saving
//!
//! Loads user configuration from `~/.config/ipcam/config.toml`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{CaptureConfig, RetryPolicy, ViewportConfig};
use crate::descriptor::ConnectionDescriptor;
use crate::error::{IpcamError, Result};

/// Configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Capture loop settings
    #[serde(default)]
    pub capture: CaptureSettings,

    /// Reconnection settings
    #[serde(default)]
    pub retry: RetrySettings,

    /// Zoom and pan settings
    #[serde(default)]
    pub viewport: ViewportSettings,

    /// Snapshot output settings
    #[serde(default)]
    pub snapshot: SnapshotSettings,

    /// Last used camera
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera: Option<ConnectionDescriptor>,
}

/// Capture loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Camera opening timeout in milliseconds
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,

    /// Frame read timeout in milliseconds
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Connection check interval while paused, in milliseconds
    #[serde(default = "default_pause_poll_ms")]
    pub pause_poll_ms: u64,

    /// Queued events before the oldest frames are dropped
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Reconnection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// First retry delay in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum retry delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Delay growth factor
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Retries before giving up (0 = never give up)
    #[serde(default)]
    pub max_retries: u32,

    /// Keep retrying after an authentication failure
    #[serde(default)]
    pub retry_auth_failures: bool,
}

/// Zoom and pan settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewportSettings {
    /// Maximum zoom factor
    #[serde(default = "default_max_zoom")]
    pub max_zoom: f64,

    /// Zoom factor per wheel notch
    #[serde(default = "default_zoom_step")]
    pub zoom_step: f64,

    /// Reset zoom and pan when the stream stops
    #[serde(default = "default_true")]
    pub reset_on_stop: bool,
}

/// Image format for snapshots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    #[default]
    Png,
    Jpeg,
}

impl SnapshotFormat {
    /// File extension
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }
}

impl std::str::FromStr for SnapshotFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            _ => Err(format!("Unknown snapshot format: {}", s)),
        }
    }
}

/// Snapshot output settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotSettings {
    /// Output directory (empty = current directory)
    #[serde(default)]
    pub directory: PathBuf,

    /// Image format
    #[serde(default)]
    pub format: SnapshotFormat,
}

fn default_open_timeout_ms() -> u64 {
    super::DEFAULT_OPEN_TIMEOUT.as_millis() as u64
}

fn default_read_timeout_ms() -> u64 {
    10_000
}

fn default_pause_poll_ms() -> u64 {
    500
}

fn default_channel_capacity() -> usize {
    8
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_zoom() -> f64 {
    10.0
}

fn default_zoom_step() -> f64 {
    1.1
}

fn default_true() -> bool {
    true
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            open_timeout_ms: default_open_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            pause_poll_ms: default_pause_poll_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_retries: 0,
            retry_auth_failures: false,
        }
    }
}

impl Default for ViewportSettings {
    fn default() -> Self {
        Self {
            max_zoom: default_max_zoom(),
            zoom_step: default_zoom_step(),
            reset_on_stop: true,
        }
    }
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::new(),
            format: SnapshotFormat::default(),
        }
    }
}

impl ConfigFile {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("ipcam").join("config.toml")
        } else if let Ok(home) = std::env::var("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("ipcam")
                .join("config.toml")
        } else {
            PathBuf::from("/etc/ipcam/config.toml")
        }
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path())
    }

    /// Load configuration from a specific path
    ///
    /// A missing file yields defaults. A `[camera]` section is validated
    /// while parsing, so a loaded camera is always usable.
    pub fn load_from(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| config_error("read", e))?;
        let config: ConfigFile = toml::from_str(&content).map_err(|e| config_error("parse", e))?;

        match &config.camera {
            Some(camera) => info!("Loaded configuration from {:?} (camera {})", path, camera),
            None => info!("Loaded configuration from {:?}", path),
        }
        Ok(config)
    }

    /// Load configuration, logging warnings but returning defaults on error
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            warn!("Failed to load config file: {}, using defaults", e);
            Self::default()
        })
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(Self::default_path())
    }

    /// Save configuration to a specific path
    ///
    /// Refuses to write settings that [`capture_config`](Self::capture_config)
    /// or [`viewport_config`](Self::viewport_config) would reject.
    pub fn save_to(&self, path: PathBuf) -> Result<()> {
        self.capture_config()?;
        self.viewport_config()?;

        let content = toml::to_string_pretty(self).map_err(|e| config_error("serialize", e))?;
        write_config(&path, &content)?;

        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Write the sample configuration to `path`
    ///
    /// An existing file is only replaced with `force`, and its saved camera
    /// is carried over into the new file.
    pub fn init_at(path: &Path, force: bool) -> Result<InitOutcome> {
        if !path.exists() {
            write_config(path, &sample_config())?;
            info!("Created configuration at {:?}", path);
            return Ok(InitOutcome::Created);
        }
        if !force {
            return Ok(InitOutcome::Exists);
        }

        let camera = match Self::load_from(path.to_path_buf()) {
            Ok(previous) => previous.camera,
            Err(e) => {
                warn!("Not keeping camera from unreadable config: {}", e);
                None
            }
        };

        let mut content = sample_config();
        if let Some(camera) = &camera {
            let section = toml::to_string_pretty(&CameraSection { camera })
                .map_err(|e| config_error("serialize", e))?;
            content.push('\n');
            content.push_str(&section);
        }

        // The result must load back with the same camera
        let check: ConfigFile = toml::from_str(&content).map_err(|e| config_error("parse", e))?;
        check.capture_config()?;
        check.viewport_config()?;

        write_config(path, &content)?;
        info!("Replaced configuration at {:?}", path);
        Ok(InitOutcome::Replaced {
            kept_camera: check.camera.is_some(),
        })
    }

    /// Build the capture loop configuration
    pub fn capture_config(&self) -> Result<CaptureConfig> {
        let retry = RetryPolicy {
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            multiplier: self.retry.multiplier,
            max_retries: (self.retry.max_retries > 0).then_some(self.retry.max_retries),
            retry_auth_failures: self.retry.retry_auth_failures,
        };

        let config = CaptureConfig {
            open_timeout: Duration::from_millis(self.capture.open_timeout_ms),
            read_timeout: Duration::from_millis(self.capture.read_timeout_ms),
            pause_poll_interval: Duration::from_millis(self.capture.pause_poll_ms),
            channel_capacity: self.capture.channel_capacity,
            retry,
        };
        config.validate()?;
        Ok(config)
    }

    /// Build the viewport configuration
    pub fn viewport_config(&self) -> Result<ViewportConfig> {
        let config = ViewportConfig {
            max_zoom: self.viewport.max_zoom,
            zoom_step: self.viewport.zoom_step,
            reset_on_stop: self.viewport.reset_on_stop,
        };
        config.validate()?;
        Ok(config)
    }
}

/// Result of [`ConfigFile::init_at`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// No file existed; the sample was written
    Created,
    /// The file was overwritten
    Replaced { kept_camera: bool },
    /// A file exists and `force` was not given
    Exists,
}

#[derive(Serialize)]
struct CameraSection<'a> {
    camera: &'a ConnectionDescriptor,
}

fn config_error(action: &str, err: impl std::fmt::Display) -> IpcamError {
    IpcamError::Config(format!("Failed to {} config file: {}", action, err))
}

fn write_config(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                IpcamError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }
    }
    std::fs::write(path, content).map_err(|e| config_error("write", e))
}

/// Generate a sample configuration file
pub fn sample_config() -> String {
    r#"# ipcam Configuration

[capture]
# How long to wait for the camera to open (milliseconds)
open_timeout_ms = 20000

# How long to wait for a frame before treating the connection as lost
read_timeout_ms = 10000

# Connection check interval while paused (milliseconds)
pause_poll_ms = 500

# Events queued for the viewer before the oldest frames are dropped
channel_capacity = 8

[retry]
# Exponential backoff between reconnection attempts
initial_delay_ms = 1000
max_delay_ms = 30000
multiplier = 2.0

# Give up after this many retries (0 = keep trying forever)
max_retries = 0

# Keep retrying when the camera rejects the username/password
retry_auth_failures = false

[viewport]
# Mouse wheel zoom limits
max_zoom = 10.0
zoom_step = 1.1

# Reset zoom and pan when the stream stops
reset_on_stop = true

[snapshot]
# Directory for snapshots (empty = current directory)
directory = ""

# Image format: png, jpeg
format = "png"

# Camera used when no host is given on the command line
# [camera]
# protocol = "rtsp"
# username = "admin"
# password = "secret"
# host = "192.168.1.64"
# port = 554
# stream_path = "/stream1"
# resolution = "1080p"
"#
    .to_string()
}
