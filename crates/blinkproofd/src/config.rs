use std::path::PathBuf;
use std::time::Duration;

use blinkproof_core::classifier::DEFAULT_EAR_THRESHOLD;
use blinkproof_core::onnx::DEFAULT_LANDMARK_INPUT_SIZE;
use blinkproof_core::scrfd::{
    DEFAULT_DETECTOR_INPUT_SIZE, DEFAULT_NMS_THRESHOLD, DEFAULT_SCORE_THRESHOLD,
};
use blinkproof_core::trigger::DEFAULT_VOTES_REQUIRED;
use blinkproof_core::window::DEFAULT_WINDOW_SIZE;
use blinkproof_core::{ClassifierConfig, FaceSelection, OnnxLandmarkerConfig, TriggerConfig};

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the 68-point landmark ONNX model.
    pub model_path: PathBuf,
    /// Expected SHA-256 of the model. When unset only presence is checked.
    pub model_sha256: Option<String>,
    /// Square input side the landmark model expects.
    pub model_input_size: u32,
    /// Path to the SCRFD face detector ONNX model.
    pub detector_path: PathBuf,
    /// Expected SHA-256 of the detector. When unset only presence is checked.
    pub detector_sha256: Option<String>,
    /// Square input side the detector letterboxes frames into.
    pub detector_input_size: u32,
    /// Minimum detection score for a face box.
    pub face_score_threshold: f32,
    /// Overlap above which weaker face boxes are suppressed.
    pub nms_threshold: f32,
    /// Directory receiving captured liveness frames.
    pub capture_dir: PathBuf,
    /// Directory receiving faces cropped from uploaded documents.
    pub faces_dir: PathBuf,
    /// Directory receiving raw document uploads.
    pub upload_dir: PathBuf,
    /// Path to the SQLite capture ledger.
    pub db_path: PathBuf,
    /// Average EAR below which a frame counts as a blink.
    pub ear_threshold: f32,
    /// How many recent frames each session remembers.
    pub window_size: usize,
    /// Blink frames within the window needed to capture.
    pub votes_required: usize,
    /// Which face a multi-face frame is judged on.
    pub face_selection: FaceSelection,
    /// Sessions idle longer than this are evicted.
    pub session_idle_timeout: Duration,
    /// Whether the daemon is running on the session bus (development mode).
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `BLINKPROOF_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("BLINKPROOF_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| blinkproof_core::default_data_home().join("blinkproof"));

        let model_path = std::env::var("BLINKPROOF_MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                blinkproof_core::default_model_dir().join(blinkproof_core::LANDMARK_MODEL_FILE)
            });

        let detector_path = std::env::var("BLINKPROOF_DETECTOR_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                blinkproof_core::default_model_dir().join(blinkproof_core::DETECTOR_MODEL_FILE)
            });

        let face_selection = match std::env::var("BLINKPROOF_FACE_SELECTION") {
            Ok(v) => v.parse().unwrap_or_else(|e: String| {
                tracing::warn!(error = %e, "ignoring BLINKPROOF_FACE_SELECTION");
                FaceSelection::default()
            }),
            Err(_) => FaceSelection::default(),
        };

        Self {
            model_path,
            model_sha256: std::env::var("BLINKPROOF_MODEL_SHA256")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            model_input_size: env_u32("BLINKPROOF_MODEL_INPUT_SIZE", DEFAULT_LANDMARK_INPUT_SIZE),
            detector_path,
            detector_sha256: std::env::var("BLINKPROOF_DETECTOR_SHA256")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            detector_input_size: env_u32(
                "BLINKPROOF_DETECTOR_INPUT_SIZE",
                DEFAULT_DETECTOR_INPUT_SIZE,
            ),
            face_score_threshold: env_f32(
                "BLINKPROOF_FACE_SCORE_THRESHOLD",
                DEFAULT_SCORE_THRESHOLD,
            ),
            nms_threshold: env_f32("BLINKPROOF_NMS_THRESHOLD", DEFAULT_NMS_THRESHOLD),
            capture_dir: env_path("BLINKPROOF_CAPTURE_DIR", || data_dir.join("captured_images")),
            faces_dir: env_path("BLINKPROOF_FACES_DIR", || data_dir.join("processed_faces")),
            upload_dir: env_path("BLINKPROOF_UPLOAD_DIR", || data_dir.join("media")),
            db_path: env_path("BLINKPROOF_DB_PATH", || data_dir.join("captures.db")),
            ear_threshold: env_f32("BLINKPROOF_EAR_THRESHOLD", DEFAULT_EAR_THRESHOLD),
            window_size: env_usize("BLINKPROOF_WINDOW_SIZE", DEFAULT_WINDOW_SIZE),
            votes_required: env_usize("BLINKPROOF_VOTES_REQUIRED", DEFAULT_VOTES_REQUIRED),
            face_selection,
            session_idle_timeout: Duration::from_secs(env_u64("BLINKPROOF_SESSION_IDLE_SECS", 300)),
            session_bus: std::env::var("BLINKPROOF_SESSION_BUS").is_ok(),
        }
    }

    pub fn landmarker(&self) -> OnnxLandmarkerConfig {
        OnnxLandmarkerConfig {
            detector_path: self.detector_path.clone(),
            landmark_path: self.model_path.clone(),
            detector_input_size: self.detector_input_size,
            landmark_input_size: self.model_input_size,
            score_threshold: self.face_score_threshold,
            nms_threshold: self.nms_threshold,
        }
    }

    pub fn classifier(&self) -> ClassifierConfig {
        ClassifierConfig {
            ear_threshold: self.ear_threshold,
            face_selection: self.face_selection,
        }
    }

    pub fn trigger(&self) -> TriggerConfig {
        TriggerConfig {
            window_size: self.window_size,
            votes_required: self.votes_required,
        }
    }

    /// Create every storage directory the daemon writes to.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [&self.capture_dir, &self.faces_dir, &self.upload_dir] {
            std::fs::create_dir_all(dir)?;
        }
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

fn env_path(key: &str, default: impl FnOnce() -> PathBuf) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or_else(|_| default())
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
