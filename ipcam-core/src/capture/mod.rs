//! Stream capture
//!
//! This module handles:
//! - The controller command surface (start, pause, resume, stop, snapshot)
//! - The capture loop with timeouts, backoff and reconnection
//! - The bounded event channel frames and status events travel through

pub mod channel;
pub mod controller;

pub use channel::{event_channel, EventReceiver, EventSender};
pub use controller::{CaptureStats, StreamController};
