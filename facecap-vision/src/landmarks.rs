use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of points produced by the 68-point facial landmark scheme.
pub const LANDMARK_COUNT: usize = 68;

/// Leftmost jaw-line point (image left).
pub const JAW_LEFT: usize = 0;
/// Bottom of the chin.
pub const CHIN: usize = 8;
/// Rightmost jaw-line point (image right).
pub const JAW_RIGHT: usize = 16;
/// Outer corner of the left eye; first point of the left-eye contour (36..=41).
pub const LEFT_EYE_OUTER: usize = 36;

#[derive(Debug, Error, PartialEq)]
pub enum LandmarkError {
    #[error("expected {LANDMARK_COUNT} landmark points, got {0}")]
    PointCount(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box in the same pixel space as the landmarks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn left(&self) -> f32 {
        self.x
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn top(&self) -> f32 {
        self.y
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

/// One detector result: 68 landmark points, confidence and face box.
///
/// The point count is checked on construction (and on deserialization), so
/// every `LandmarkSet` in circulation can be indexed with the constants above.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawLandmarkSet")]
pub struct LandmarkSet {
    points: Vec<Point>,
    score: f32,
    bbox: BoundingBox,
}

#[derive(Deserialize)]
struct RawLandmarkSet {
    points: Vec<Point>,
    score: f32,
    bbox: BoundingBox,
}

impl TryFrom<RawLandmarkSet> for LandmarkSet {
    type Error = LandmarkError;

    fn try_from(raw: RawLandmarkSet) -> Result<Self, Self::Error> {
        LandmarkSet::new(raw.points, raw.score, raw.bbox)
    }
}

impl LandmarkSet {
    pub fn new(points: Vec<Point>, score: f32, bbox: BoundingBox) -> Result<Self, LandmarkError> {
        if points.len() != LANDMARK_COUNT {
            return Err(LandmarkError::PointCount(points.len()));
        }
        Ok(Self {
            points,
            score,
            bbox,
        })
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn point(&self, index: usize) -> Point {
        self.points[index]
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    /// Scale every coordinate independently on each axis.
    pub fn scaled(&self, sx: f32, sy: f32) -> Self {
        Self {
            points: self
                .points
                .iter()
                .map(|p| Point::new(p.x * sx, p.y * sy))
                .collect(),
            score: self.score,
            bbox: BoundingBox {
                x: self.bbox.x * sx,
                y: self.bbox.y * sy,
                width: self.bbox.width * sx,
                height: self.bbox.height * sy,
            },
        }
    }
}

/// The on-screen guide rectangle the face has to sit in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TargetArea {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl TargetArea {
    /// Build from element-style offsets (left, top, width, height).
    pub fn from_offsets(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            right: left + width,
            bottom: top + height,
        }
    }

    /// A guide of `w_frac` x `h_frac` of the display, centered in it.
    pub fn centered(display: (u32, u32), w_frac: f32, h_frac: f32) -> Self {
        let (dw, dh) = (display.0 as f32, display.1 as f32);
        let width = dw * w_frac;
        let height = dh * h_frac;
        Self::from_offsets((dw - width) / 2.0, (dh - height) / 2.0, width, height)
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }
}

/// Viewport class; picks the distance threshold and the positional margin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceClass {
    Desktop,
    Mobile,
}

impl DeviceClass {
    pub const MOBILE_MAX_WIDTH: u32 = 540;

    pub fn from_viewport_width(width: u32) -> Self {
        if width <= Self::MOBILE_MAX_WIDTH {
            DeviceClass::Mobile
        } else {
            DeviceClass::Desktop
        }
    }
}
