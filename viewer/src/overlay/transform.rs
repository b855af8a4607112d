use livewatch_common::{BBox, FrameSize};
use serde::Serialize;

/// Displayed size of the video surface in layout pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SurfaceSize {
    pub width: f64,
    pub height: f64,
}

impl SurfaceSize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Independent per-axis scale from source frame to surface; aspect ratio is not preserved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleTransform {
    pub scale_x: f64,
    pub scale_y: f64,
}

impl ScaleTransform {
    pub fn between(frame: FrameSize, surface: SurfaceSize) -> Option<Self> {
        if surface.is_empty() || frame.width == 0 || frame.height == 0 {
            return None;
        }
        Some(Self {
            scale_x: surface.width / f64::from(frame.width),
            scale_y: surface.height / f64::from(frame.height),
        })
    }

    pub fn apply(&self, bbox: &BBox) -> Rect {
        Rect {
            x: bbox.x * self.scale_x,
            y: bbox.y * self.scale_y,
            width: bbox.width * self.scale_x,
            height: bbox.height * self.scale_y,
        }
    }
}
