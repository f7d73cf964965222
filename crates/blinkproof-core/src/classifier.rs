//! Per-frame blink classification.

use std::fmt;
use std::str::FromStr;

use image::RgbImage;

use crate::ear::{average_ear, EarReading};
use crate::landmarks::DetectedFace;
use crate::provider::{DetectError, LandmarkProvider};

/// Average EAR below which a frame counts as a blink.
pub const DEFAULT_EAR_THRESHOLD: f32 = 0.25;

pub const MSG_NO_FACE: &str = "No face detected.";
pub const MSG_BLINK: &str = "Blink detected, person is alive.";
pub const MSG_NO_BLINK: &str = "No blink detected, might be a spoof.";

/// Which of several detected faces a frame is judged on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaceSelection {
    /// Only the first face the provider reports.
    #[default]
    First,
    /// Only the face with the largest region (earliest wins ties).
    Largest,
    /// Every face; the frame is a blink if any face blinks.
    All,
}

impl FaceSelection {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaceSelection::First => "first",
            FaceSelection::Largest => "largest",
            FaceSelection::All => "all",
        }
    }
}

impl fmt::Display for FaceSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaceSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(FaceSelection::First),
            "largest" => Ok(FaceSelection::Largest),
            "all" | "any" => Ok(FaceSelection::All),
            other => Err(format!("unknown face selection policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerdictKind {
    NoFace,
    Blink,
    NoBlink,
}

/// Outcome of classifying one frame.
#[derive(Debug, Clone)]
pub struct FrameVerdict {
    kind: VerdictKind,
    ear: Option<EarReading>,
    image: Option<RgbImage>,
}

impl FrameVerdict {
    pub fn no_face() -> Self {
        Self {
            kind: VerdictKind::NoFace,
            ear: None,
            image: None,
        }
    }

    pub fn blink(ear: EarReading, image: RgbImage) -> Self {
        Self {
            kind: VerdictKind::Blink,
            ear: Some(ear),
            image: Some(image),
        }
    }

    pub fn no_blink(ear: EarReading) -> Self {
        Self {
            kind: VerdictKind::NoBlink,
            ear: Some(ear),
            image: None,
        }
    }

    pub fn kind(&self) -> VerdictKind {
        self.kind
    }

    pub fn is_blink(&self) -> bool {
        self.kind == VerdictKind::Blink
    }

    /// EAR of the face the verdict was decided on, if any face was found.
    pub fn ear(&self) -> Option<&EarReading> {
        self.ear.as_ref()
    }

    /// Source frame, present only for blink verdicts.
    pub fn image(&self) -> Option<&RgbImage> {
        self.image.as_ref()
    }

    /// Move the source frame out, leaving the verdict's kind untouched.
    pub(crate) fn take_image(&mut self) -> Option<RgbImage> {
        self.image.take()
    }

    pub fn message(&self) -> &'static str {
        match self.kind {
            VerdictKind::NoFace => MSG_NO_FACE,
            VerdictKind::Blink => MSG_BLINK,
            VerdictKind::NoBlink => MSG_NO_BLINK,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClassifierConfig {
    pub ear_threshold: f32,
    pub face_selection: FaceSelection,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            ear_threshold: DEFAULT_EAR_THRESHOLD,
            face_selection: FaceSelection::First,
        }
    }
}

/// Turns provider output into a [`FrameVerdict`].
#[derive(Debug, Clone, Default)]
pub struct FrameClassifier {
    config: ClassifierConfig,
}

impl FrameClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.config
    }

    /// Run the provider on `frame` and classify the result.
    ///
    /// The frame is moved into the verdict when it is a blink, so the
    /// capture trigger can persist exactly this frame.
    pub fn classify<P>(&self, provider: &mut P, frame: RgbImage) -> Result<FrameVerdict, DetectError>
    where
        P: LandmarkProvider + ?Sized,
    {
        let faces = provider.detect(&frame)?;
        Ok(self.classify_faces(&faces, frame))
    }

    /// Classify already-detected faces.
    pub fn classify_faces(&self, faces: &[DetectedFace], frame: RgbImage) -> FrameVerdict {
        let selected: Vec<&DetectedFace> = match self.config.face_selection {
            FaceSelection::First => faces.first().into_iter().collect(),
            FaceSelection::Largest => largest(faces).into_iter().collect(),
            FaceSelection::All => faces.iter().collect(),
        };

        if selected.is_empty() {
            tracing::debug!("classify: no face");
            return FrameVerdict::no_face();
        }

        let mut last = None;
        for face in selected {
            let ear = average_ear(&face.landmarks);
            tracing::debug!(
                left = ear.left,
                right = ear.right,
                average = ear.average,
                threshold = self.config.ear_threshold,
                "classify: ear"
            );
            if ear.average < self.config.ear_threshold {
                return FrameVerdict::blink(ear, frame);
            }
            last = Some(ear);
        }

        match last {
            Some(ear) => FrameVerdict::no_blink(ear),
            None => FrameVerdict::no_face(),
        }
    }
}

fn largest(faces: &[DetectedFace]) -> Option<&DetectedFace> {
    let mut best: Option<&DetectedFace> = None;
    for face in faces {
        let is_better = match best {
            None => true,
            Some(prev) => face.region.area() > prev.region.area(),
        };
        if is_better {
            best = Some(face);
        }
    }
    best
}
