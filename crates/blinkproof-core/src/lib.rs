//! Blink-based liveness decision engine.
//!
//! Frames flow through four stages:
//!
//! 1. a [`LandmarkProvider`] finds faces and their 68 landmarks (in
//!    production, SCRFD boxes followed by a landmark model per box),
//! 2. the [`FrameClassifier`] turns the eye aspect ratio into a per-frame
//!    [`FrameVerdict`],
//! 3. the verdict is recorded in a session's [`LivenessWindow`],
//! 4. the [`CaptureTrigger`] stages a capture once enough recent frames blinked.

pub mod classifier;
pub mod ear;
pub mod landmarks;
pub mod onnx;
pub mod provider;
pub mod scrfd;
pub mod trigger;
pub mod window;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

use std::path::PathBuf;

pub use classifier::{ClassifierConfig, FaceSelection, FrameClassifier, FrameVerdict, VerdictKind};
pub use ear::{average_ear, eye_aspect_ratio, EarReading};
pub use landmarks::{DetectedFace, FaceRegion, LandmarkError, LandmarkSet, Point};
pub use onnx::{OnnxLandmarker, OnnxLandmarkerConfig};
pub use provider::{DetectError, LandmarkProvider};
pub use scrfd::{Detection, FaceDetector};
pub use trigger::{CaptureTrigger, Evaluation, FrameReport, PendingCapture, TriggerConfig};
pub use window::LivenessWindow;

/// File name of the landmark model inside the model directory.
pub const LANDMARK_MODEL_FILE: &str = "face_landmarks_68.onnx";
/// File name of the SCRFD face detector inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";

/// Default model directory.
///
/// `/var/lib/blinkproof/models` when running as root, otherwise
/// `$XDG_DATA_HOME/blinkproof/models` (`~/.local/share/blinkproof/models`).
pub fn default_model_dir() -> PathBuf {
    if is_root() {
        PathBuf::from("/var/lib/blinkproof/models")
    } else {
        default_data_home().join("blinkproof/models")
    }
}

/// `$XDG_DATA_HOME`, falling back to `~/.local/share`.
pub fn default_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
}

fn is_root() -> bool {
    // SAFETY: geteuid is always safe to call.
    unsafe { libc::geteuid() == 0 }
}
