//! Zoom, pan and fullscreen state for displaying frames
//!
//! Pure state machine, no I/O. Pointer positions are normalized view
//! coordinates: `(0, 0)` is the top-left of the display surface and
//! `(1, 1)` the bottom-right. The pan offset is the centre of the visible
//! region in normalized frame coordinates and is clamped after every change
//! so the visible region never leaves the frame.

use crate::config::ViewportConfig;
use crate::types::StreamState;

/// Zoom values this close to 1.0 are treated as exactly 1.0
const UNZOOM_EPSILON: f64 = 1e-9;

/// Relative slack for rounding at the frame edges
const EDGE_TOLERANCE: f64 = 1e-9;

/// A point in normalized coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const CENTER: Point = Point { x: 0.5, y: 0.5 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn clamped(self) -> Self {
        Self {
            x: clamp_unit(self.x),
            y: clamp_unit(self.y),
        }
    }
}

/// Visible region of a frame, in frame pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Integer pixel bounds, suitable for cropping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    /// Smallest whole-pixel rectangle covering `self`, clipped to the frame
    pub fn to_pixels(&self, frame_width: u32, frame_height: u32) -> PixelRect {
        let x0 = (self.x.floor().max(0.0) as u32).min(frame_width);
        let y0 = (self.y.floor().max(0.0) as u32).min(frame_height);
        let x1 = ((self.x + self.width).ceil().max(0.0) as u32).min(frame_width);
        let y1 = ((self.y + self.height).ceil().max(0.0) as u32).min(frame_height);
        PixelRect {
            x: x0,
            y: y0,
            width: x1.saturating_sub(x0),
            height: y1.saturating_sub(y0),
        }
    }

    /// Whether `self` lies inside `[0, width] x [0, height]`, up to rounding
    pub fn is_within(&self, width: f64, height: f64) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.width >= 0.0
            && self.height >= 0.0
            && self.x + self.width <= width * (1.0 + EDGE_TOLERANCE)
            && self.y + self.height <= height * (1.0 + EDGE_TOLERANCE)
    }
}

/// Viewport state driven by wheel, drag and double-click input
#[derive(Debug, Clone)]
pub struct ViewportTransform {
    config: ViewportConfig,
    zoom: f64,
    pan: Point,
    fullscreen: bool,
    drag_last: Option<Point>,
}

impl ViewportTransform {
    /// Create an unzoomed, centred viewport
    pub fn new(config: ViewportConfig) -> Self {
        Self {
            config,
            zoom: 1.0,
            pan: Point::CENTER,
            fullscreen: false,
            drag_last: None,
        }
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn pan(&self) -> Point {
        self.pan
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn is_dragging(&self) -> bool {
        self.drag_last.is_some()
    }

    pub fn config(&self) -> &ViewportConfig {
        &self.config
    }

    /// Zoom by `delta` wheel notches (positive zooms in) around `cursor`
    ///
    /// The frame point under the cursor stays under the cursor unless the
    /// clamp has to move the view back inside the frame.
    pub fn on_wheel(&mut self, delta: f64, cursor: Point) {
        if !delta.is_finite() || delta == 0.0 {
            return;
        }
        let cursor = cursor.clamped();

        let old_span = 1.0 / self.zoom;
        let anchor = Point {
            x: self.pan.x - old_span / 2.0 + cursor.x * old_span,
            y: self.pan.y - old_span / 2.0 + cursor.y * old_span,
        };

        self.zoom = self.clamp_zoom(self.zoom * self.config.zoom_step.powf(delta));

        let new_span = 1.0 / self.zoom;
        self.pan = Point {
            x: anchor.x + new_span / 2.0 - cursor.x * new_span,
            y: anchor.y + new_span / 2.0 - cursor.y * new_span,
        };
        self.clamp_pan();
    }

    /// Begin a drag at `pos`
    pub fn on_drag_start(&mut self, pos: Point) {
        self.drag_last = Some(pos.clamped());
    }

    /// Pan so the content follows the pointer
    pub fn on_drag_move(&mut self, pos: Point) {
        let pos = pos.clamped();
        let Some(last) = self.drag_last.replace(pos) else {
            return;
        };
        if self.zoom <= 1.0 {
            return;
        }

        self.pan.x -= (pos.x - last.x) / self.zoom;
        self.pan.y -= (pos.y - last.y) / self.zoom;
        self.clamp_pan();
    }

    /// End the current drag
    pub fn on_drag_end(&mut self) {
        self.drag_last = None;
    }

    /// Toggle fullscreen
    pub fn on_double_click(&mut self) {
        self.fullscreen = !self.fullscreen;
    }

    /// Unzoom and recentre; fullscreen is left alone
    pub fn reset(&mut self) {
        self.zoom = 1.0;
        self.pan = Point::CENTER;
        self.drag_last = None;
    }

    /// Apply the reset-on-stop policy for a stream state change
    pub fn on_stream_state(&mut self, state: &StreamState) {
        if self.config.reset_on_stop && *state == StreamState::Idle {
            self.reset();
        }
    }

    /// Region of a `frame_width` x `frame_height` frame to display
    pub fn visible_rect(&self, frame_width: u32, frame_height: u32) -> Rect {
        let (fw, fh) = (frame_width as f64, frame_height as f64);
        if self.zoom <= 1.0 {
            return Rect {
                x: 0.0,
                y: 0.0,
                width: fw,
                height: fh,
            };
        }

        let span = 1.0 / self.zoom;
        let width = fw * span;
        let height = fh * span;
        let x = ((self.pan.x - span / 2.0) * fw).clamp(0.0, fw - width);
        let y = ((self.pan.y - span / 2.0) * fh).clamp(0.0, fh - height);
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    fn clamp_zoom(&self, zoom: f64) -> f64 {
        if !zoom.is_finite() {
            return self.zoom;
        }
        // An unvalidated config may carry max_zoom below 1.0 or NaN
        let zoom = zoom.max(1.0).min(self.config.max_zoom.max(1.0));
        if zoom - 1.0 < UNZOOM_EPSILON {
            1.0
        } else {
            zoom
        }
    }

    fn clamp_pan(&mut self) {
        if self.zoom <= 1.0 {
            self.pan = Point::CENTER;
            return;
        }
        let half = 0.5 / self.zoom;
        self.pan.x = self.pan.x.clamp(half, 1.0 - half);
        self.pan.y = self.pan.y.clamp(half, 1.0 - half);
    }
}

impl Default for ViewportTransform {
    fn default() -> Self {
        Self::new(ViewportConfig::default())
    }
}

fn clamp_unit(v: f64) -> f64 {
    if v.is_nan() { 0.5 } else { v.clamp(0.0, 1.0) }
}
