//! 68-point facial landmark geometry.
//!
//! Index layout follows the iBUG 300-W convention used by most 68-point
//! predictors: 0-16 jaw, 17-26 brows, 27-35 nose, 36-41 left eye,
//! 42-47 right eye, 48-67 mouth.

use std::ops::Range;

use thiserror::Error;

/// Number of points in a complete landmark set.
pub const LANDMARK_COUNT: usize = 68;

/// Left eye sub-range (corner, upper lid x2, corner, lower lid x2).
pub const LEFT_EYE: Range<usize> = 36..42;
/// Right eye sub-range, same ordering as [`LEFT_EYE`].
pub const RIGHT_EYE: Range<usize> = 42..48;

#[derive(Error, Debug, PartialEq)]
pub enum LandmarkError {
    #[error("expected {LANDMARK_COUNT} landmarks, got {0}")]
    WrongCount(usize),
    #[error("landmark {index} is not finite")]
    NonFinite { index: usize },
}

/// A 2D point in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    fn scaled(&self, factor: f32) -> Point {
        Point::new(self.x * factor, self.y * factor)
    }
}

impl From<(f32, f32)> for Point {
    fn from((x, y): (f32, f32)) -> Self {
        Self { x, y }
    }
}

/// Exactly 68 ordered landmarks for one face. Never partial.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkSet {
    points: [Point; LANDMARK_COUNT],
}

impl LandmarkSet {
    /// Build a set from a slice that must hold exactly 68 finite points.
    pub fn from_points(points: &[Point]) -> Result<Self, LandmarkError> {
        let points: [Point; LANDMARK_COUNT] = points
            .try_into()
            .map_err(|_| LandmarkError::WrongCount(points.len()))?;
        if let Some(index) = points
            .iter()
            .position(|p| !p.x.is_finite() || !p.y.is_finite())
        {
            return Err(LandmarkError::NonFinite { index });
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Point; LANDMARK_COUNT] {
        &self.points
    }

    pub fn left_eye(&self) -> [Point; 6] {
        self.eye(LEFT_EYE)
    }

    pub fn right_eye(&self) -> [Point; 6] {
        self.eye(RIGHT_EYE)
    }

    fn eye(&self, range: Range<usize>) -> [Point; 6] {
        std::array::from_fn(|i| self.points[range.start + i])
    }

    /// Uniformly scale every point about the origin.
    pub fn scaled(&self, factor: f32) -> LandmarkSet {
        LandmarkSet {
            points: self.points.map(|p| p.scaled(factor)),
        }
    }
}

/// Axis-aligned face box in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FaceRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl FaceRegion {
    /// Smallest box containing every landmark.
    pub fn enclosing(landmarks: &LandmarkSet) -> Self {
        let mut min_x = f32::INFINITY;
        let mut min_y = f32::INFINITY;
        let mut max_x = f32::NEG_INFINITY;
        let mut max_y = f32::NEG_INFINITY;
        for p in landmarks.points() {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Self {
            x: min_x,
            y: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Clamp to an image of the given size, returning `(x, y, w, h)` in whole
    /// pixels, or `None` if nothing of the box lies inside the image.
    pub fn clamp_to(&self, image_width: u32, image_height: u32) -> Option<(u32, u32, u32, u32)> {
        let x0 = self.x.floor().max(0.0);
        let y0 = self.y.floor().max(0.0);
        let x1 = (self.x + self.width).ceil().min(image_width as f32);
        let y1 = (self.y + self.height).ceil().min(image_height as f32);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some((x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32))
    }
}

/// One face as reported by a [`LandmarkProvider`](crate::LandmarkProvider).
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedFace {
    pub region: FaceRegion,
    pub landmarks: LandmarkSet,
}

impl DetectedFace {
    /// A face whose region is derived from its landmarks.
    pub fn from_landmarks(landmarks: LandmarkSet) -> Self {
        Self {
            region: FaceRegion::enclosing(&landmarks),
            landmarks,
        }
    }
}
