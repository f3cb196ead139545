//! Configuration types for ipcam
//!
//! Runtime settings for the capture loop, its reconnection policy and the
//! viewport, plus the on-disk config file.

mod file;

pub use file::{
    sample_config, CaptureSettings, ConfigFile, InitOutcome, RetrySettings, SnapshotFormat,
    SnapshotSettings, ViewportSettings,
};

use std::time::Duration;

use crate::error::{IpcamError, Result};

/// How long to wait for a camera to open
pub const DEFAULT_OPEN_TIMEOUT: Duration = Duration::from_secs(20);

/// Exponential backoff between reconnection attempts
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor per attempt
    pub multiplier: f64,
    /// Give up after this many retries (`None` = retry forever)
    pub max_retries: Option<u32>,
    /// Keep retrying when the camera rejects the credentials
    pub retry_auth_failures: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_retries: None,
            retry_auth_failures: false,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait before retry number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Whether retry number `attempt` is beyond the configured limit
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        self.max_retries.is_some_and(|max| attempt > max)
    }

    /// Set the retry limit
    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the first and maximum delay
    pub fn with_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_delay = initial;
        self.max_delay = max;
        self
    }
}

/// Capture loop configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Bound on opening the source
    pub open_timeout: Duration,
    /// Bound on waiting for the next image before treating the link as dead
    pub read_timeout: Duration,
    /// How often a paused stream is polled for connection loss
    pub pause_poll_interval: Duration,
    /// Maximum queued events before old frames are dropped
    pub channel_capacity: usize,
    /// Reconnection policy
    pub retry: RetryPolicy,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            open_timeout: DEFAULT_OPEN_TIMEOUT,
            read_timeout: Duration::from_secs(10),
            pause_poll_interval: Duration::from_millis(500),
            channel_capacity: 8,
            retry: RetryPolicy::default(),
        }
    }
}

impl CaptureConfig {
    /// Set the open timeout
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    /// Set the read timeout
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the event channel capacity
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Set the reconnection policy
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Check the configuration for values the capture loop cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.open_timeout.is_zero() {
            return Err(IpcamError::config("open timeout must be greater than zero"));
        }
        if self.read_timeout.is_zero() {
            return Err(IpcamError::config("read timeout must be greater than zero"));
        }
        if self.pause_poll_interval.is_zero() {
            return Err(IpcamError::config("pause poll interval must be greater than zero"));
        }
        if self.channel_capacity == 0 {
            return Err(IpcamError::config("channel capacity must be at least 1"));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(IpcamError::config(format!(
                "retry multiplier must be at least 1.0, got {}",
                self.retry.multiplier
            )));
        }
        if self.retry.initial_delay > self.retry.max_delay {
            return Err(IpcamError::config(
                "initial retry delay must not exceed the maximum delay",
            ));
        }
        Ok(())
    }
}

/// Zoom limits and reset policy for a [`ViewportTransform`](crate::viewport::ViewportTransform)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportConfig {
    /// Largest zoom factor
    pub max_zoom: f64,
    /// Zoom multiplier per wheel notch
    pub zoom_step: f64,
    /// Reset zoom and pan when the stream stops
    pub reset_on_stop: bool,
}

impl Default for ViewportConfig {
    fn default() -> Self {
        Self {
            max_zoom: 10.0,
            zoom_step: 1.1,
            reset_on_stop: true,
        }
    }
}

impl ViewportConfig {
    /// Check the zoom limits
    pub fn validate(&self) -> Result<()> {
        if !self.max_zoom.is_finite() || self.max_zoom < 1.0 {
            return Err(IpcamError::config(format!(
                "max zoom must be a finite value of at least 1.0, got {}",
                self.max_zoom
            )));
        }
        if !self.zoom_step.is_finite() || self.zoom_step <= 1.0 {
            return Err(IpcamError::config(format!(
                "zoom step must be greater than 1.0, got {}",
                self.zoom_step
            )));
        }
        Ok(())
    }
}
