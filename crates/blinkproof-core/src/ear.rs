//! Eye aspect ratio (EAR) blink signal.
//!
//! For six eye points ordered corner, upper lid (inner, outer), corner,
//! lower lid (outer, inner):
//!
//! ```text
//! EAR = (|p1 - p5| + |p2 - p4|) / (2 * |p0 - p3|)
//! ```
//!
//! An open eye sits around 0.3; the ratio collapses toward zero while the lids
//! are closed. The ratio depends only on relative distances, so it is
//! unaffected by how far the face is from the camera.

use crate::landmarks::{LandmarkSet, Point};

/// EAR values for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EarReading {
    pub left: f32,
    pub right: f32,
    /// Arithmetic mean of `left` and `right`.
    pub average: f32,
}

/// Compute the eye aspect ratio of a single eye.
///
/// Zero-width eye geometry (coincident corners) yields `f32::INFINITY`, which
/// never classifies as a blink.
pub fn eye_aspect_ratio(eye: &[Point; 6]) -> f32 {
    let a = eye[1].distance(&eye[5]);
    let b = eye[2].distance(&eye[4]);
    let c = eye[0].distance(&eye[3]);

    if c == 0.0 {
        return f32::INFINITY;
    }

    (a + b) / (2.0 * c)
}

/// Compute left, right and average EAR for a landmark set.
pub fn average_ear(landmarks: &LandmarkSet) -> EarReading {
    let left = eye_aspect_ratio(&landmarks.left_eye());
    let right = eye_aspect_ratio(&landmarks.right_eye());
    EarReading {
        left,
        right,
        average: (left + right) / 2.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Eye 30 px wide with lids `opening` px apart.
    fn eye(origin: (f32, f32), opening: f32) -> [Point; 6] {
        let (x, y) = origin;
        let half = opening / 2.0;
        [
            Point::new(x, y),
            Point::new(x + 10.0, y - half),
            Point::new(x + 20.0, y - half),
            Point::new(x + 30.0, y),
            Point::new(x + 20.0, y + half),
            Point::new(x + 10.0, y + half),
        ]
    }

    #[test]
    fn test_known_ratio() {
        // A = B = 9, C = 30 -> 18 / 60
        let ear = eye_aspect_ratio(&eye((100.0, 50.0), 9.0));
        assert!((ear - 0.3).abs() < 1e-6);
    }

    #[test]
    fn test_closed_eye_is_near_zero() {
        let ear = eye_aspect_ratio(&eye((100.0, 50.0), 0.0));
        assert_eq!(ear, 0.0);
    }

    #[test]
    fn test_scale_invariance() {
        let base = eye((120.0, 80.0), 7.5);
        let reference = eye_aspect_ratio(&base);
        for factor in [0.1f32, 0.5, 2.0, 3.7, 10.0] {
            let scaled = base.map(|p| Point::new(p.x * factor, p.y * factor));
            let ear = eye_aspect_ratio(&scaled);
            assert!(
                (ear - reference).abs() < 1e-5,
                "factor {factor}: {ear} vs {reference}"
            );
        }
    }

    #[test]
    fn test_tiny_but_valid_eye_keeps_its_ratio() {
        // Eye width of 3e-6 is below f32::EPSILON yet still a real eye.
        let tiny = eye((0.0, 0.0), 7.5).map(|p| Point::new(p.x * 1e-7, p.y * 1e-7));
        let ear = eye_aspect_ratio(&tiny);
        assert!((ear - 0.25).abs() < 1e-3, "{ear}");
    }

    #[test]
    fn test_zero_width_eye_is_infinite() {
        let degenerate = [Point::new(5.0, 5.0); 6];
        let ear = eye_aspect_ratio(&degenerate);
        assert!(ear.is_infinite());
        assert!(!(ear < 0.25));
    }

    #[test]
    fn test_zero_width_with_open_lids() {
        let mut pts = eye((0.0, 0.0), 6.0);
        pts[3] = pts[0];
        assert_eq!(eye_aspect_ratio(&pts), f32::INFINITY);
    }
}
