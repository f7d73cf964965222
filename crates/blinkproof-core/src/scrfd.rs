//! SCRFD face detector.
//!
//! The frame is letterboxed into a square `S x S` input (scaled to fit, padded
//! right and bottom with black), normalised as `(p - 127.5) / 128` and fed in
//! NCHW order. The model emits, per feature stride, a score per anchor and a
//! `(left, top, right, bottom)` distance per anchor in stride units. Anchors
//! above the score threshold are decoded into boxes, mapped back to frame
//! pixels and merged with non-maximum suppression.

use image::imageops::FilterType;
use image::{Rgb, RgbImage};
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;

use crate::landmarks::FaceRegion;
use crate::provider::DetectError;

pub const DEFAULT_DETECTOR_INPUT_SIZE: u32 = 640;
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.4;

/// A face box with its detection score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub region: FaceRegion,
    pub score: f32,
}

/// Output arrangement, keyed by how many tensors the model returns.
#[derive(Debug, Clone, Copy, PartialEq)]
struct OutputLayout {
    strides: &'static [u32],
    anchors_per_cell: usize,
}

impl OutputLayout {
    /// 6/9 outputs: three strides, two anchors per cell. 10/15 outputs: five
    /// strides, one anchor. The larger counts carry keypoints, which are unused.
    fn for_output_count(count: usize) -> Option<Self> {
        match count {
            6 | 9 => Some(Self {
                strides: &[8, 16, 32],
                anchors_per_cell: 2,
            }),
            10 | 15 => Some(Self {
                strides: &[8, 16, 32, 64, 128],
                anchors_per_cell: 1,
            }),
            _ => None,
        }
    }

    /// Index distance between a stride's score tensor and its box tensor.
    fn box_offset(&self) -> usize {
        self.strides.len()
    }
}

pub struct FaceDetector {
    session: Session,
    input_size: u32,
    score_threshold: f32,
    nms_threshold: f32,
}

impl FaceDetector {
    pub fn load(
        model_path: &str,
        input_size: u32,
        score_threshold: f32,
        nms_threshold: f32,
    ) -> Result<Self, DetectError> {
        let session = Session::builder()
            .map_err(|e| DetectError::Model(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| DetectError::Model(e.to_string()))?
            .commit_from_file(model_path)
            .map_err(|e| DetectError::Model(format!("{model_path}: {e}")))?;

        // Strides must divide the input side.
        let input_size = (input_size.max(128) / 32) * 32;
        tracing::debug!(path = model_path, input_size, "face detector session created");

        Ok(Self {
            session,
            input_size,
            score_threshold,
            nms_threshold,
        })
    }

    /// Faces in `frame`, highest score first.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, DetectError> {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return Ok(Vec::new());
        }

        let (input, scale) = letterbox(frame, self.input_size);
        let input = Tensor::from_array(input).map_err(|e| DetectError::Inference(e.to_string()))?;
        let outputs = self
            .session
            .run(ort::inputs![input])
            .map_err(|e| DetectError::Inference(e.to_string()))?;

        let layout = OutputLayout::for_output_count(outputs.len()).ok_or_else(|| {
            DetectError::Output(format!("unsupported SCRFD output count {}", outputs.len()))
        })?;

        let mut candidates = Vec::new();
        for (idx, &stride) in layout.strides.iter().enumerate() {
            let (_, scores) = outputs[idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectError::Output(e.to_string()))?;
            let (_, distances) = outputs[idx + layout.box_offset()]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectError::Output(e.to_string()))?;
            candidates.extend(decode_stride(
                scores,
                distances,
                stride,
                self.input_size,
                layout.anchors_per_cell,
                self.score_threshold,
            )?);
        }

        let detections: Vec<Detection> = candidates
            .into_iter()
            .map(|d| Detection {
                region: unscale(d.region, scale, width, height),
                score: d.score,
            })
            .filter(|d| d.region.area() > 0.0)
            .collect();

        let kept = non_max_suppression(detections, self.nms_threshold);
        tracing::trace!(faces = kept.len(), "face detection done");
        Ok(kept)
    }
}

/// Resize `frame` to fit an `S x S` canvas, keeping aspect ratio, and return
/// the normalised tensor together with the applied scale.
fn letterbox(frame: &RgbImage, size: u32) -> (Array4<f32>, f32) {
    let (width, height) = frame.dimensions();
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, size);

    let resized = image::imageops::resize(frame, new_w, new_h, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(size, size, Rgb([0, 0, 0]));
    image::imageops::replace(&mut canvas, &resized, 0, 0);

    let side = size as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, side, side));
    for (x, y, pixel) in canvas.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - 127.5) / 128.0;
        }
    }
    (tensor, scale)
}

/// Anchor centres for one stride, row-major, each repeated per anchor.
fn anchor_centers(input_size: u32, stride: u32, anchors_per_cell: usize) -> Vec<(f32, f32)> {
    let cells = input_size / stride;
    let mut centers = Vec::with_capacity((cells * cells) as usize * anchors_per_cell);
    for y in 0..cells {
        for x in 0..cells {
            let center = ((x * stride) as f32, (y * stride) as f32);
            centers.extend(std::iter::repeat(center).take(anchors_per_cell));
        }
    }
    centers
}

/// Boxes (in letterboxed input pixels) for anchors scoring at or above
/// `threshold`.
fn decode_stride(
    scores: &[f32],
    distances: &[f32],
    stride: u32,
    input_size: u32,
    anchors_per_cell: usize,
    threshold: f32,
) -> Result<Vec<Detection>, DetectError> {
    let centers = anchor_centers(input_size, stride, anchors_per_cell);
    if scores.len() != centers.len() || distances.len() != centers.len() * 4 {
        return Err(DetectError::Output(format!(
            "stride {stride}: expected {} anchors, got {} scores and {} box values",
            centers.len(),
            scores.len(),
            distances.len()
        )));
    }

    let step = stride as f32;
    Ok(centers
        .iter()
        .zip(scores)
        .zip(distances.chunks_exact(4))
        .filter(|((_, &score), _)| score >= threshold)
        .map(|((&(cx, cy), &score), d)| {
            let x1 = cx - d[0] * step;
            let y1 = cy - d[1] * step;
            let x2 = cx + d[2] * step;
            let y2 = cy + d[3] * step;
            Detection {
                region: FaceRegion {
                    x: x1,
                    y: y1,
                    width: x2 - x1,
                    height: y2 - y1,
                },
                score,
            }
        })
        .collect())
}

/// Map a letterboxed box back to frame pixels, clipped to the frame.
fn unscale(region: FaceRegion, scale: f32, width: u32, height: u32) -> FaceRegion {
    let x1 = (region.x / scale).clamp(0.0, width as f32);
    let y1 = (region.y / scale).clamp(0.0, height as f32);
    let x2 = ((region.x + region.width) / scale).clamp(0.0, width as f32);
    let y2 = ((region.y + region.height) / scale).clamp(0.0, height as f32);
    FaceRegion {
        x: x1,
        y: y1,
        width: x2 - x1,
        height: y2 - y1,
    }
}

fn iou(a: &FaceRegion, b: &FaceRegion) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);
    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.area() + b.area() - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Greedy NMS: keep the best box, drop everything overlapping it by more than
/// `iou_threshold`, repeat. Result is sorted by descending score.
fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Detection> = Vec::new();
    for candidate in detections {
        if kept
            .iter()
            .all(|k| iou(&k.region, &candidate.region) <= iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
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
    fn test_layout_by_output_count() {
        let three = OutputLayout::for_output_count(9).unwrap();
        assert_eq!(three.strides, &[8, 16, 32]);
        assert_eq!(three.anchors_per_cell, 2);
        assert_eq!(three.box_offset(), 3);

        let five = OutputLayout::for_output_count(10).unwrap();
        assert_eq!(five.box_offset(), 5);
        assert_eq!(five.anchors_per_cell, 1);

        assert!(OutputLayout::for_output_count(2).is_none());
    }

    #[test]
    fn test_anchor_centers_repeat_per_anchor() {
        let centers = anchor_centers(64, 32, 2);
        assert_eq!(
            centers,
            vec![
                (0.0, 0.0),
                (0.0, 0.0),
                (32.0, 0.0),
                (32.0, 0.0),
                (0.0, 32.0),
                (0.0, 32.0),
                (32.0, 32.0),
                (32.0, 32.0),
            ]
        );
    }

    #[test]
    fn test_decode_keeps_only_confident_anchors() {
        // 64x64 input, stride 32, one anchor per cell -> 4 anchors.
        let scores = [0.1, 0.9, 0.2, 0.6];
        let mut distances = vec![0.0f32; 16];
        // Anchor 1 sits at (32, 0): 1 stride left/right, 0.5 up, 1 down.
        distances[4..8].copy_from_slice(&[1.0, 0.5, 1.0, 1.0]);
        distances[12..16].copy_from_slice(&[0.25, 0.25, 0.25, 0.25]);

        let found = decode_stride(&scores, &distances, 32, 64, 1, 0.5).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].score, 0.9);
        assert_eq!(found[0].region, region(0.0, -16.0, 64.0, 48.0));
        assert_eq!(found[1].region, region(24.0, 24.0, 16.0, 16.0));
    }

    #[test]
    fn test_decode_rejects_mismatched_tensors() {
        let err = decode_stride(&[0.9; 3], &[0.0; 16], 32, 64, 1, 0.5).unwrap_err();
        assert!(matches!(err, DetectError::Output(_)));
    }

    #[test]
    fn test_nothing_above_threshold_means_no_face() {
        let found = decode_stride(&[0.1; 4], &[1.0; 16], 32, 64, 1, 0.5).unwrap();
        assert!(non_max_suppression(found, DEFAULT_NMS_THRESHOLD).is_empty());
    }

    #[test]
    fn test_nms_merges_overlaps_and_keeps_separate_faces() {
        let detections = vec![
            Detection {
                region: region(10.0, 10.0, 100.0, 100.0),
                score: 0.7,
            },
            Detection {
                region: region(300.0, 40.0, 80.0, 80.0),
                score: 0.8,
            },
            Detection {
                region: region(14.0, 12.0, 100.0, 100.0),
                score: 0.95,
            },
        ];
        let kept = non_max_suppression(detections, 0.4);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].score, 0.95);
        assert_eq!(kept[1].score, 0.8);
    }

    #[test]
    fn test_unscale_maps_back_and_clips() {
        // Frame 1280x720 letterboxed into 640 -> scale 0.5.
        let mapped = unscale(region(600.0, 100.0, 100.0, 50.0), 0.5, 1280, 720);
        assert_eq!(mapped, region(1200.0, 200.0, 80.0, 100.0));
    }

    #[test]
    fn test_letterbox_pads_short_side() {
        let frame = RgbImage::from_pixel(64, 32, Rgb([255, 255, 255]));
        let (tensor, scale) = letterbox(&frame, 128);
        assert_eq!(scale, 2.0);
        assert_eq!(tensor.shape(), &[1, 3, 128, 128]);
        let white = (255.0 - 127.5) / 128.0;
        let black = -127.5 / 128.0;
        assert!((tensor[[0, 0, 10, 10]] - white).abs() < 1e-3);
        assert!((tensor[[0, 0, 100, 10]] - black).abs() < 1e-6);
    }
}
