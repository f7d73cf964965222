//! Frame ingestion and document upload, independent of the IPC transport.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use blinkproof_core::{Evaluation, FrameReport};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::dbus_interface::AppState;
use crate::documents::DocumentError;

/// Status code plus body, mirroring HTTP semantics (200 / 400 / 500).
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

impl Reply {
    fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    fn json(status: u16, value: serde_json::Value) -> Self {
        Self::new(status, value.to_string())
    }

    pub fn into_tuple(self) -> (u16, String) {
        (self.status, self.body)
    }
}

#[derive(Deserialize)]
struct FramePayload {
    image_data: String,
}

#[derive(Error, Debug, PartialEq)]
pub enum PayloadError {
    #[error("missing ',' between data URL header and base64 content")]
    MissingSeparator,
    #[error("bad base64: {0}")]
    Base64(String),
}

/// Decode the base64 part of a `<meta-prefix>,<base64>` data URL.
pub fn decode_data_url(data: &str) -> Result<Vec<u8>, PayloadError> {
    let (_, encoded) = data.split_once(',').ok_or(PayloadError::MissingSeparator)?;
    let encoded = encoded.split(',').next().unwrap_or_default();
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| PayloadError::Base64(e.to_string()))
}

/// Run one frame through the liveness pipeline for `session`.
///
/// The session stays locked from classification to commit, so frames of one
/// session are processed strictly one at a time in arrival order. Nothing is
/// recorded for a frame that fails before a verdict exists.
pub async fn submit_frame(state: &AppState, session: &str, body: &str) -> Reply {
    let payload: FramePayload = match serde_json::from_str(body) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(session, error = %e, "submit_frame: invalid JSON");
            return Reply::new(400, "Invalid JSON provided.");
        }
    };

    let bytes = match decode_data_url(&payload.image_data) {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(session, error = %e, "submit_frame: invalid image data");
            return Reply::new(400, format!("Invalid image data: {e}"));
        }
    };

    let frame = match image::load_from_memory(&bytes) {
        Ok(img) => img.to_rgb8(),
        Err(e) => {
            tracing::error!(session, error = %e, "submit_frame: image decode failed");
            return Reply::new(500, format!("Error: {e}"));
        }
    };

    let handle = state.sessions.lock().await.get_or_create(session);
    let mut trigger = handle.lock().await;

    let verdict = match state.engine.classify(frame).await {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(session, error = %e, "submit_frame: classification failed");
            return Reply::new(500, format!("Error: {e}"));
        }
    };

    let report = match trigger.evaluate(verdict) {
        Evaluation::Hold(verdict) => FrameReport::held(&verdict),
        Evaluation::Capture(pending) => match state.captures.save(session, pending.image()).await {
            Ok(record) => {
                let verdict = trigger.commit(pending);
                tracing::info!(
                    session,
                    capture_id = %record.id,
                    filename = %record.filename,
                    "liveness capture saved"
                );
                FrameReport::captured(&verdict, record.filename)
            }
            Err(e) => {
                let votes = pending.votes();
                let _ = pending.abandon();
                tracing::error!(session, votes, error = %e, "submit_frame: capture save failed");
                return Reply::new(500, format!("Error: {e}"));
            }
        },
    };

    let text = report.to_string();
    tracing::debug!(
        session,
        votes = trigger.window().vote_count(),
        frames = trigger.window().len(),
        response = %text,
        "frame processed"
    );
    Reply::new(200, text)
}

/// Persist an uploaded identity document and crop out its first face.
pub async fn upload_document(state: &AppState, filename: &str, contents: &[u8]) -> Reply {
    if filename.trim().is_empty() || contents.is_empty() {
        tracing::warn!("upload_document: no file provided");
        return Reply::json(400, json!({ "error": "No file provided." }));
    }

    let processing_error = |e: &dyn std::fmt::Display| {
        tracing::error!(filename, error = %e, "upload_document: processing failed");
        Reply::json(500, json!({ "error": format!("Error processing file: {e}") }))
    };

    let upload_path = match state.documents.save_upload(filename, contents) {
        Ok(p) => p,
        Err(e @ DocumentError::InvalidName(_)) => {
            tracing::warn!(filename, error = %e, "upload_document: rejected file name");
            return Reply::json(400, json!({ "error": "Invalid file name." }));
        }
        Err(e) => return processing_error(&e),
    };
    tracing::info!(path = %upload_path.display(), "document upload saved");

    let document = match image::load_from_memory(contents) {
        Ok(img) => img,
        Err(e) => return processing_error(&e),
    };

    let region = match state.engine.locate_face(document.to_rgb8()).await {
        Ok(r) => r,
        Err(e) => return processing_error(&e),
    };

    let Some((x, y, w, h)) = region.and_then(|r| r.clamp_to(document.width(), document.height()))
    else {
        tracing::info!(path = %upload_path.display(), "upload_document: no face detected");
        return Reply::json(400, json!({ "error": "No face detected." }));
    };

    let face = document.crop_imm(x, y, w, h);
    let face_path = match state.documents.save_face(&upload_path, &face) {
        Ok(p) => p,
        Err(e) => return processing_error(&e),
    };

    tracing::info!(path = %face_path.display(), "document face saved");
    Reply::json(
        200,
        json!({
            "message": "Face detected successfully!",
            "path": face_path.to_string_lossy(),
        }),
    )
}
