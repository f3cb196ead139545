//! Error types for ipcam

use thiserror::Error;

use crate::types::{Command, StreamState};

/// Result type alias using IpcamError
pub type Result<T> = std::result::Result<T, IpcamError>;

/// Main error type for ipcam operations outside the command surface
#[derive(Debug, Error)]
pub enum IpcamError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid connection descriptor
    #[error("Invalid camera settings: {0}")]
    Validation(#[from] ValidationError),

    /// Frame source error
    #[error("Stream source error: {0}")]
    Source(#[from] SourceError),

    /// Command rejected in the current state
    #[error(transparent)]
    State(#[from] StateError),

    /// Snapshot could not be taken
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// Image encoding or writing error
    #[error("Image error: {0}")]
    Image(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<IpcamError>,
    },
}

impl IpcamError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an image error
    pub fn image(msg: impl Into<String>) -> Self {
        Self::Image(msg.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// A short hint the user can act on, if there is one
    pub fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::Config(_) => Some("Check ~/.config/ipcam/config.toml or run `ipcam config init`"),
            Self::Validation(_) => Some("Check the camera host, port and path"),
            Self::Source(err) => err.user_hint(),
            Self::State(_) => Some("The stream is not in a state that accepts this command"),
            Self::Snapshot(SnapshotError::NoFrame) => {
                Some("Wait for the first frame before taking a snapshot")
            }
            Self::WithContext { source, .. } => source.user_hint(),
            _ => None,
        }
    }

    /// Whether the user can fix this without changing code
    pub fn is_user_recoverable(&self) -> bool {
        match self {
            Self::Config(_) | Self::Validation(_) | Self::State(_) | Self::Snapshot(_) => true,
            Self::Source(err) => err.is_retryable(),
            Self::WithContext { source, .. } => source.is_user_recoverable(),
            Self::Image(_) | Self::Io(_) => false,
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }
}

/// A connection descriptor failed validation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Host is empty or whitespace
    #[error("host must not be empty")]
    EmptyHost,

    /// Port outside 1..=65535
    #[error("port {0} is out of range (1-65535)")]
    InvalidPort(u32),

    /// Host contains characters that cannot appear in a URL authority
    #[error("host '{0}' contains invalid characters")]
    InvalidHost(String),
}

/// A command was issued in a state that does not accept it
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot {command} while {state}")]
pub struct StateError {
    /// The rejected command
    pub command: Command,
    /// The state at the time of the command
    pub state: StreamState,
}

/// Errors returned synchronously by `start()`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StartError {
    /// The descriptor is invalid
    #[error("invalid connection descriptor: {0}")]
    Validation(#[from] ValidationError),

    /// The controller is already running a session
    #[error(transparent)]
    State(#[from] StateError),
}

/// Errors returned by `snapshot()`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    /// No frame has been delivered since `start()`
    #[error("no frame has been received yet")]
    NoFrame,

    /// Snapshot requested outside Streaming/Paused
    #[error(transparent)]
    State(#[from] StateError),
}

/// Why a connection attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// The camera refused the connection or is unreachable
    Refused,
    /// The camera did not answer in time
    Timeout,
    /// The camera rejected the credentials
    AuthFailed,
}

/// Errors reported by a [`FrameSource`](crate::source::FrameSource)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// Opening the connection failed
    #[error("connection failed ({kind:?}): {message}")]
    Connect {
        kind: ConnectionErrorKind,
        message: String,
    },

    /// A single frame could not be decoded; the stream is still usable
    #[error("transient decode error: {0}")]
    TransientDecode(String),

    /// The decoder lost sync with the stream
    #[error("fatal decode error: {0}")]
    FatalDecode(String),

    /// The connection dropped or the stream ended
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// `next_frame` was called without an open connection
    #[error("source is not open")]
    NotOpen,
}

impl SourceError {
    /// Create a refused-connection error
    pub fn refused(msg: impl Into<String>) -> Self {
        Self::Connect {
            kind: ConnectionErrorKind::Refused,
            message: msg.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Connect {
            kind: ConnectionErrorKind::Timeout,
            message: msg.into(),
        }
    }

    /// Create an authentication error
    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::Connect {
            kind: ConnectionErrorKind::AuthFailed,
            message: msg.into(),
        }
    }

    /// Whether the error leaves the current connection usable
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientDecode(_))
    }

    /// Whether reconnecting could help
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Connect {
                kind: ConnectionErrorKind::AuthFailed,
                ..
            }
        )
    }

    fn user_hint(&self) -> Option<&'static str> {
        match self {
            Self::Connect {
                kind: ConnectionErrorKind::AuthFailed,
                ..
            } => Some("Check the camera username and password"),
            Self::Connect {
                kind: ConnectionErrorKind::Refused,
                ..
            } => Some("Check that the camera is reachable and the port is correct"),
            Self::Connect {
                kind: ConnectionErrorKind::Timeout,
                ..
            } => Some("The camera did not respond; check the network or raise open_timeout_ms"),
            _ => None,
        }
    }
}
