//! Camera connection parameters
//!
//! A [`ConnectionDescriptor`] is validated when it is built and never changes
//! afterwards. Settings records go through the same validation on the way
//! in, so a descriptor read from a config file is as trustworthy as one
//! built in code.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Stream transport protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// RTSP (most IP cameras)
    #[default]
    Rtsp,
    /// HTTP (MJPEG and similar)
    Http,
    /// Anything else; the URL is passed to the source without a scheme
    Other,
}

impl Protocol {
    /// URL scheme, if the protocol has one
    pub fn scheme(&self) -> Option<&'static str> {
        match self {
            Self::Rtsp => Some("rtsp"),
            Self::Http => Some("http"),
            Self::Other => None,
        }
    }

    /// Conventional port for the protocol
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Rtsp => 554,
            Self::Http => 80,
            Self::Other => 554,
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rtsp => write!(f, "rtsp"),
            Self::Http => write!(f, "http"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rtsp" => Ok(Self::Rtsp),
            "http" => Ok(Self::Http),
            "other" => Ok(Self::Other),
            _ => Err(format!("Unknown protocol: {}", s)),
        }
    }
}

/// Resolution the consumer wants frames delivered at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Resolution {
    /// 1920x1080
    #[default]
    #[serde(rename = "1080p")]
    P1080,
    /// 1280x720
    #[serde(rename = "720p")]
    P720,
    /// 640x480
    #[serde(rename = "480p")]
    P480,
    /// Whatever the camera sends
    #[serde(rename = "source")]
    Source,
}

impl Resolution {
    /// Target (width, height), or `None` to keep the camera's size
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self {
            Self::P1080 => Some((1920, 1080)),
            Self::P720 => Some((1280, 720)),
            Self::P480 => Some((640, 480)),
            Self::Source => None,
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::P1080 => write!(f, "1080p"),
            Self::P720 => write!(f, "720p"),
            Self::P480 => write!(f, "480p"),
            Self::Source => write!(f, "source"),
        }
    }
}

impl std::str::FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1080p" | "1920x1080" => Ok(Self::P1080),
            "720p" | "1280x720" => Ok(Self::P720),
            "480p" | "640x480" => Ok(Self::P480),
            "source" | "native" => Ok(Self::Source),
            _ => Err(format!("Unknown resolution: {}", s)),
        }
    }
}

/// Validated, immutable parameters identifying a camera stream
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "DescriptorRecord", into = "DescriptorRecord")]
pub struct ConnectionDescriptor {
    protocol: Protocol,
    username: String,
    password: String,
    host: String,
    port: u16,
    stream_path: String,
    resolution: Resolution,
}

impl ConnectionDescriptor {
    /// Create a descriptor without credentials, empty path and 1080p
    pub fn new(
        protocol: Protocol,
        host: impl Into<String>,
        port: u16,
    ) -> Result<Self, ValidationError> {
        let host = host.into().trim().to_string();
        validate_host(&host)?;
        if port == 0 {
            return Err(ValidationError::InvalidPort(0));
        }

        Ok(Self {
            protocol,
            username: String::new(),
            password: String::new(),
            host,
            port,
            stream_path: String::new(),
            resolution: Resolution::default(),
        })
    }

    /// Set the credentials
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = username.into();
        self.password = password.into();
        self
    }

    /// Set the stream path (e.g. "/stream1")
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = normalize_path(&path.into());
        self
    }

    /// Set the requested resolution
    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Re-check the invariants
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_host(&self.host)?;
        if self.port == 0 {
            return Err(ValidationError::InvalidPort(0));
        }
        Ok(())
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn stream_path(&self) -> &str {
        &self.stream_path
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Full stream URL including credentials
    pub fn url(&self) -> String {
        self.build_url(&self.password)
    }

    /// Stream URL with the password masked, safe for logs and status bars
    pub fn redacted_url(&self) -> String {
        let masked: String = self.password.chars().map(|_| '*').collect();
        self.build_url(&masked)
    }

    fn build_url(&self, password: &str) -> String {
        let mut url = String::new();
        if let Some(scheme) = self.protocol.scheme() {
            url.push_str(scheme);
            url.push_str("://");
        }
        if !self.username.is_empty() {
            url.push_str(&self.username);
            if !password.is_empty() {
                url.push(':');
                url.push_str(password);
            }
            url.push('@');
        }
        if self.host.contains(':') {
            url.push('[');
            url.push_str(&self.host);
            url.push(']');
        } else {
            url.push_str(&self.host);
        }
        url.push(':');
        url.push_str(&self.port.to_string());
        url.push_str(&self.stream_path);
        url
    }
}

impl std::fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("url", &self.redacted_url())
            .field("resolution", &self.resolution)
            .finish()
    }
}

impl std::fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.redacted_url(), self.resolution)
    }
}

fn validate_host(host: &str) -> Result<(), ValidationError> {
    if host.is_empty() {
        return Err(ValidationError::EmptyHost);
    }
    if host
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '/' | '@' | '?' | '#'))
    {
        return Err(ValidationError::InvalidHost(host.to_string()));
    }
    Ok(())
}

fn normalize_path(path: &str) -> String {
    let path = path.trim();
    if path.is_empty() || path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// Settings record form of a descriptor, as stored in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorRecord {
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub host: String,
    /// Kept wide so out-of-range values are reported, not truncated
    #[serde(default = "default_port")]
    pub port: u32,
    #[serde(default)]
    pub stream_path: String,
    #[serde(default)]
    pub resolution: Resolution,
}

fn default_port() -> u32 {
    554
}

impl TryFrom<DescriptorRecord> for ConnectionDescriptor {
    type Error = ValidationError;

    fn try_from(record: DescriptorRecord) -> Result<Self, Self::Error> {
        let port = u16::try_from(record.port)
            .map_err(|_| ValidationError::InvalidPort(record.port))?;
        Ok(ConnectionDescriptor::new(record.protocol, record.host, port)?
            .with_credentials(record.username, record.password)
            .with_path(record.stream_path)
            .with_resolution(record.resolution))
    }
}

impl From<ConnectionDescriptor> for DescriptorRecord {
    fn from(descriptor: ConnectionDescriptor) -> Self {
        Self {
            protocol: descriptor.protocol,
            username: descriptor.username,
            password: descriptor.password,
            host: descriptor.host,
            port: u32::from(descriptor.port),
            stream_path: descriptor.stream_path,
            resolution: descriptor.resolution,
        }
    }
}
