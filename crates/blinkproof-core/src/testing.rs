//! Fakes for exercising the pipeline without a landmark model.

use std::collections::VecDeque;

use image::RgbImage;

use crate::landmarks::{DetectedFace, LandmarkSet, Point, LANDMARK_COUNT, LEFT_EYE, RIGHT_EYE};
use crate::provider::{DetectError, LandmarkProvider};

/// Lid opening (px) that gives an EAR of 0.30 on the 30 px wide test eye.
pub const OPEN_EYE: f32 = 9.0;
/// Lid opening (px) that gives an EAR of 0.05.
pub const SHUT_EYE: f32 = 1.5;

/// Provider that replays a fixed script, then reports no face.
pub struct ScriptedProvider {
    script: VecDeque<Result<Vec<DetectedFace>, DetectError>>,
    calls: usize,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<Vec<DetectedFace>, DetectError>>) -> Self {
        Self {
            script: script.into(),
            calls: 0,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl LandmarkProvider for ScriptedProvider {
    fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<DetectedFace>, DetectError> {
        self.calls += 1;
        self.script.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

/// A plausible 68-point face shifted right by `offset_x`, with both eyes
/// 30 px wide and their lids `opening` px apart.
pub fn face_with_opening(offset_x: f32, opening: f32) -> DetectedFace {
    let mut points: Vec<Point> = (0..LANDMARK_COUNT)
        .map(|i| {
            let angle = i as f32 / LANDMARK_COUNT as f32 * std::f32::consts::TAU;
            Point::new(
                offset_x + 130.0 + 70.0 * angle.cos(),
                120.0 + 90.0 * angle.sin(),
            )
        })
        .collect();

    place_eye(&mut points[LEFT_EYE], offset_x + 90.0, 100.0, opening);
    place_eye(&mut points[RIGHT_EYE], offset_x + 140.0, 100.0, opening);

    let landmarks = LandmarkSet::from_points(&points).unwrap_or_else(|e| panic!("{e}"));
    DetectedFace::from_landmarks(landmarks)
}

/// A face whose every landmark is the same point.
pub fn degenerate_face() -> DetectedFace {
    let landmarks = LandmarkSet::from_points(&[Point::new(50.0, 50.0); LANDMARK_COUNT])
        .unwrap_or_else(|e| panic!("{e}"));
    DetectedFace::from_landmarks(landmarks)
}

fn place_eye(slot: &mut [Point], x: f32, y: f32, opening: f32) {
    let half = opening / 2.0;
    slot[0] = Point::new(x, y);
    slot[1] = Point::new(x + 10.0, y - half);
    slot[2] = Point::new(x + 20.0, y - half);
    slot[3] = Point::new(x + 30.0, y);
    slot[4] = Point::new(x + 20.0, y + half);
    slot[5] = Point::new(x + 10.0, y + half);
}
