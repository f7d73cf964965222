//! Capture trigger: decides when accumulated blink votes justify saving a frame.
//!
//! The trigger rests in a single accumulating state. Each verdict is recorded
//! into the session's [`LivenessWindow`]; once the window holds at least
//! `votes_required` blinks *and* the current frame is itself a blink, the
//! trigger stages a [`PendingCapture`] carrying that frame.
//!
//! Staging does not touch the window. Only [`CaptureTrigger::commit`], called
//! after the frame has been persisted, resets it. A pending capture that is
//! dropped (for example because the image could not be written) leaves the
//! accumulated votes in place, so the next blink frame tries again.

use std::fmt;

use image::RgbImage;

use crate::classifier::FrameVerdict;
use crate::window::{LivenessWindow, DEFAULT_WINDOW_SIZE};

/// Blink votes within the window needed to capture.
pub const DEFAULT_VOTES_REQUIRED: usize = 2;

#[derive(Debug, Clone, Copy)]
pub struct TriggerConfig {
    pub window_size: usize,
    pub votes_required: usize,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            votes_required: DEFAULT_VOTES_REQUIRED,
        }
    }
}

/// A capture that has been decided but not yet persisted.
#[must_use = "a pending capture must be committed or abandoned"]
#[derive(Debug)]
pub struct PendingCapture {
    verdict: FrameVerdict,
    image: RgbImage,
    votes: usize,
}

impl PendingCapture {
    /// The frame to persist.
    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Blink votes in the window when the capture was staged.
    pub fn votes(&self) -> usize {
        self.votes
    }

    pub fn verdict(&self) -> &FrameVerdict {
        &self.verdict
    }

    /// Give up on this capture without resetting the window.
    pub fn abandon(self) -> FrameVerdict {
        tracing::debug!(votes = self.votes, "capture abandoned; window retained");
        self.verdict
    }
}

/// Result of feeding one verdict to the trigger.
#[derive(Debug)]
pub enum Evaluation {
    /// Threshold not met (or current frame not a blink); votes carry forward.
    Hold(FrameVerdict),
    /// Threshold met on a blink frame; persist, then commit.
    Capture(PendingCapture),
}

/// Per-session liveness state machine.
#[derive(Debug, Clone)]
pub struct CaptureTrigger {
    window: LivenessWindow,
    votes_required: usize,
    captures: u64,
}

impl CaptureTrigger {
    pub fn new(config: TriggerConfig) -> Self {
        Self {
            window: LivenessWindow::new(config.window_size),
            votes_required: config.votes_required.max(1),
            captures: 0,
        }
    }

    pub fn window(&self) -> &LivenessWindow {
        &self.window
    }

    /// Captures committed over the lifetime of this trigger.
    pub fn captures(&self) -> u64 {
        self.captures
    }

    /// Record a verdict and decide whether to capture.
    pub fn evaluate(&mut self, mut verdict: FrameVerdict) -> Evaluation {
        self.window.record(verdict.is_blink());
        let votes = self.window.vote_count();

        if votes < self.votes_required {
            return Evaluation::Hold(verdict);
        }

        match verdict.take_image() {
            Some(image) => {
                tracing::debug!(votes, required = self.votes_required, "capture staged");
                Evaluation::Capture(PendingCapture {
                    verdict,
                    image,
                    votes,
                })
            }
            None => Evaluation::Hold(verdict),
        }
    }

    /// Finish a capture after its frame was persisted: reset the window.
    pub fn commit(&mut self, pending: PendingCapture) -> FrameVerdict {
        self.window.reset();
        self.captures += 1;
        tracing::debug!(
            votes = pending.votes,
            captures = self.captures,
            "capture committed; window reset"
        );
        pending.verdict
    }
}

impl Default for CaptureTrigger {
    fn default() -> Self {
        Self::new(TriggerConfig::default())
    }
}

/// Diagnostic text returned for one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub is_live: bool,
    pub message: &'static str,
    pub saved_as: Option<String>,
}

impl FrameReport {
    pub fn held(verdict: &FrameVerdict) -> Self {
        Self {
            is_live: verdict.is_blink(),
            message: verdict.message(),
            saved_as: None,
        }
    }

    pub fn captured(verdict: &FrameVerdict, filename: impl Into<String>) -> Self {
        Self {
            is_live: verdict.is_blink(),
            message: verdict.message(),
            saved_as: Some(filename.into()),
        }
    }
}

impl fmt::Display for FrameReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let live = if self.is_live { "True" } else { "False" };
        write!(f, "Liveness Detected: {live}. {}", self.message)?;
        if let Some(name) = &self.saved_as {
            write!(f, " Image saved as {name}.")?;
        }
        Ok(())
    }
}
