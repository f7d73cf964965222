use image::RgbImage;
use thiserror::Error;

use crate::landmarks::{DetectedFace, LandmarkError};

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("model error: {0}")]
    Model(String),
    #[error("inference error: {0}")]
    Inference(String),
    #[error("malformed model output: {0}")]
    Output(String),
    #[error("invalid landmarks: {0}")]
    Landmarks(#[from] LandmarkError),
}

/// Face detection and 68-point landmark extraction.
///
/// Returns every face found in the frame, in detection order. An empty
/// vector means no face was found, which is not an error.
pub trait LandmarkProvider {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<DetectedFace>, DetectError>;
}

impl<P: LandmarkProvider + ?Sized> LandmarkProvider for Box<P> {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<DetectedFace>, DetectError> {
        (**self).detect(frame)
    }
}
