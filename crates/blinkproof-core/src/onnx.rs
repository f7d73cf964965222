//! ONNX-backed landmark provider: SCRFD face boxes, then 68 landmarks per box.
//!
//! Landmark model contract:
//! - input: `1x3xSxS` float32, RGB, values in `[0, 1]`, the face crop
//!   resized to `S x S`;
//! - output 0: 136 float32 values, `(x, y)` pairs normalised to `[0, 1]`
//!   relative to the crop, in 68-point order.
//!
//! The crop is the detection box widened by a fifth on every side and made
//! square, which keeps the jaw and brows inside the model's view.

use std::path::PathBuf;

use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use crate::landmarks::{DetectedFace, FaceRegion, LandmarkSet, Point, LANDMARK_COUNT};
use crate::provider::{DetectError, LandmarkProvider};
use crate::scrfd::{
    FaceDetector, DEFAULT_DETECTOR_INPUT_SIZE, DEFAULT_NMS_THRESHOLD, DEFAULT_SCORE_THRESHOLD,
};

pub const DEFAULT_LANDMARK_INPUT_SIZE: u32 = 128;

/// Fraction of the box side added on each side before landmarking.
const CROP_MARGIN: f32 = 0.2;

#[derive(Debug, Clone)]
pub struct OnnxLandmarkerConfig {
    pub detector_path: PathBuf,
    pub landmark_path: PathBuf,
    pub detector_input_size: u32,
    pub landmark_input_size: u32,
    pub score_threshold: f32,
    pub nms_threshold: f32,
}

impl OnnxLandmarkerConfig {
    /// Both models from `model_dir` with default sizes and thresholds.
    pub fn in_dir(model_dir: &std::path::Path) -> Self {
        Self {
            detector_path: model_dir.join(crate::DETECTOR_MODEL_FILE),
            landmark_path: model_dir.join(crate::LANDMARK_MODEL_FILE),
            detector_input_size: DEFAULT_DETECTOR_INPUT_SIZE,
            landmark_input_size: DEFAULT_LANDMARK_INPUT_SIZE,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
            nms_threshold: DEFAULT_NMS_THRESHOLD,
        }
    }
}

pub struct OnnxLandmarker {
    detector: FaceDetector,
    session: Session,
    input_size: u32,
}

impl OnnxLandmarker {
    pub fn load(config: &OnnxLandmarkerConfig) -> Result<Self, DetectError> {
        let detector = FaceDetector::load(
            &config.detector_path.to_string_lossy(),
            config.detector_input_size,
            config.score_threshold,
            config.nms_threshold,
        )?;

        let landmark_path = config.landmark_path.to_string_lossy();
        let session = Session::builder()
            .map_err(|e| DetectError::Model(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| DetectError::Model(e.to_string()))?
            .commit_from_file(config.landmark_path.as_path())
            .map_err(|e| DetectError::Model(format!("{landmark_path}: {e}")))?;

        tracing::debug!(
            path = %landmark_path,
            input_size = config.landmark_input_size,
            "landmark model session created"
        );

        Ok(Self {
            detector,
            session,
            input_size: config.landmark_input_size.max(1),
        })
    }

    fn preprocess(&self, crop: &RgbImage) -> Array4<f32> {
        let size = self.input_size;
        let resized = image::imageops::resize(crop, size, size, FilterType::Triangle);
        let side = size as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
            }
        }
        tensor
    }

    fn landmarks_in(&mut self, frame: &RgbImage, crop: CropBox) -> Result<LandmarkSet, DetectError> {
        let pixels =
            image::imageops::crop_imm(frame, crop.x, crop.y, crop.side, crop.side).to_image();
        let input = Tensor::from_array(self.preprocess(&pixels))
            .map_err(|e| DetectError::Inference(e.to_string()))?;
        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(|e| DetectError::Inference(e.to_string()))?;
        if outputs.len() == 0 {
            return Err(DetectError::Output("landmark model produced no outputs".to_string()));
        }
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectError::Output(e.to_string()))?;
        denormalise(raw, crop)
    }
}

impl LandmarkProvider for OnnxLandmarker {
    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<DetectedFace>, DetectError> {
        let (width, height) = frame.dimensions();
        let detections = self.detector.detect(frame)?;

        let mut faces = Vec::with_capacity(detections.len());
        for detection in detections {
            let Some(crop) = CropBox::around(&detection.region, width, height) else {
                continue;
            };
            let landmarks = self.landmarks_in(frame, crop)?;
            faces.push(DetectedFace {
                region: detection.region,
                landmarks,
            });
        }
        Ok(faces)
    }
}

/// Square crop, in whole frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CropBox {
    x: u32,
    y: u32,
    side: u32,
}

impl CropBox {
    /// Widen `region` by [`CROP_MARGIN`], square it and slide it inside the
    /// frame. `None` when the frame or box is empty.
    fn around(region: &FaceRegion, width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 || region.area() <= 0.0 {
            return None;
        }
        let grown_w = region.width * (1.0 + 2.0 * CROP_MARGIN);
        let grown_h = region.height * (1.0 + 2.0 * CROP_MARGIN);
        let side = (grown_w.max(grown_h).round() as u32).clamp(1, width.min(height));

        let cx = region.x + region.width / 2.0;
        let cy = region.y + region.height / 2.0;
        let max_x = (width - side) as f32;
        let max_y = (height - side) as f32;
        let x = (cx - side as f32 / 2.0).clamp(0.0, max_x).round() as u32;
        let y = (cy - side as f32 / 2.0).clamp(0.0, max_y).round() as u32;
        Some(Self { x, y, side })
    }
}

/// Map crop-normalised `(x, y)` pairs onto frame pixels.
fn denormalise(raw: &[f32], crop: CropBox) -> Result<LandmarkSet, DetectError> {
    if raw.len() != LANDMARK_COUNT * 2 {
        return Err(DetectError::Output(format!(
            "expected {} landmark values, got {}",
            LANDMARK_COUNT * 2,
            raw.len()
        )));
    }
    let side = crop.side as f32;
    let points: Vec<Point> = raw
        .chunks_exact(2)
        .map(|xy| Point::new(crop.x as f32 + xy[0] * side, crop.y as f32 + xy[1] * side))
        .collect();
    Ok(LandmarkSet::from_points(&points)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(x: f32, y: f32, w: f32, h: f32) -> FaceRegion {
        FaceRegion {
            x,
            y,
            width: w,
            height: h,
        }
    }

    #[test]
    fn test_crop_is_widened_and_square() {
        let crop = CropBox::around(&region(200.0, 100.0, 100.0, 120.0), 640, 480).unwrap();
        // 120 * 1.4 = 168, centred on (250, 160).
        assert_eq!(crop, CropBox { x: 166, y: 76, side: 168 });
    }

    #[test]
    fn test_crop_slides_inside_frame() {
        let crop = CropBox::around(&region(0.0, 0.0, 50.0, 50.0), 640, 480).unwrap();
        assert_eq!((crop.x, crop.y, crop.side), (0, 0, 70));

        let crop = CropBox::around(&region(600.0, 440.0, 40.0, 40.0), 640, 480).unwrap();
        assert_eq!(crop.x + crop.side, 640);
        assert_eq!(crop.y + crop.side, 480);

        // Larger than the frame: clamp to the short side.
        let crop = CropBox::around(&region(0.0, 0.0, 640.0, 480.0), 640, 480).unwrap();
        assert_eq!(crop.side, 480);
    }

    #[test]
    fn test_crop_of_empty_box_is_none() {
        assert!(CropBox::around(&region(10.0, 10.0, 0.0, 20.0), 640, 480).is_none());
        assert!(CropBox::around(&region(10.0, 10.0, 5.0, 5.0), 0, 480).is_none());
    }

    #[test]
    fn test_denormalise_maps_into_crop() {
        let raw: Vec<f32> = (0..LANDMARK_COUNT)
            .flat_map(|i| [i as f32 / 100.0, 0.5])
            .collect();
        let crop = CropBox { x: 40, y: 20, side: 200 };
        let set = denormalise(&raw, crop).unwrap();
        assert_eq!(set.points()[0], Point::new(40.0, 120.0));
        assert!((set.points()[10].x - 60.0).abs() < 1e-4);
        assert_eq!(set.points()[10].y, 120.0);
    }

    #[test]
    fn test_denormalise_rejects_short_output() {
        let crop = CropBox { x: 0, y: 0, side: 10 };
        let err = denormalise(&[0.5f32; 10], crop).unwrap_err();
        assert!(matches!(err, DetectError::Output(_)));
    }

    #[test]
    fn test_denormalise_rejects_nan() {
        let mut raw = vec![0.5f32; LANDMARK_COUNT * 2];
        raw[7] = f32::NAN;
        let crop = CropBox { x: 0, y: 0, side: 10 };
        let err = denormalise(&raw, crop).unwrap_err();
        assert!(matches!(err, DetectError::Landmarks(_)));
    }

    #[test]
    fn test_config_in_dir() {
        let config = OnnxLandmarkerConfig::in_dir(std::path::Path::new("/models"));
        assert!(config.detector_path.ends_with(crate::DETECTOR_MODEL_FILE));
        assert!(config.landmark_path.ends_with(crate::LANDMARK_MODEL_FILE));
        assert_eq!(config.landmark_input_size, 128);
    }
}
