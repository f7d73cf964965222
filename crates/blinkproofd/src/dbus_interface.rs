use std::sync::Arc;

use tokio::sync::Mutex;
use zbus::interface;

use crate::config::Config;
use crate::documents::DocumentStore;
use crate::engine::EngineHandle;
use crate::ingest;
use crate::sessions::SessionRegistry;
use crate::store::CaptureStore;

/// Shared state accessible by D-Bus method handlers.
pub struct AppState {
    pub config: Config,
    pub engine: EngineHandle,
    pub sessions: Mutex<SessionRegistry>,
    pub captures: CaptureStore,
    pub documents: DocumentStore,
}

/// D-Bus interface for the Blinkproof liveness daemon.
///
/// Bus name: org.blinkproof.Liveness1
/// Object path: /org/blinkproof/Liveness1
///
/// Methods that mirror an HTTP endpoint return `(status, body)` with
/// 200 / 400 / 500 semantics instead of raising D-Bus errors.
pub struct LivenessService {
    pub state: Arc<AppState>,
}

/// Session key for a request: the explicit id, or the caller's unique bus
/// name when the id is blank.
fn session_key(session: &str, header: &zbus::message::Header<'_>) -> Option<String> {
    let session = session.trim();
    if !session.is_empty() {
        return Some(session.to_string());
    }
    header.sender().map(|s| s.to_string())
}

#[interface(name = "org.blinkproof.Liveness1")]
impl LivenessService {
    /// Submit one webcam frame as a JSON body `{"image_data": "<data URL>"}`.
    async fn submit_frame(
        &self,
        session: &str,
        body: &str,
        #[zbus(header)] header: zbus::message::Header<'_>,
    ) -> (u16, String) {
        let Some(session) = session_key(session, &header) else {
            tracing::warn!("submit_frame: no session id and no sender");
            return (400, "Missing session id.".to_string());
        };
        tracing::debug!(session = %session, "submit_frame requested");
        ingest::submit_frame(&self.state, &session, body)
            .await
            .into_tuple()
    }

    /// Upload an identity document; the body is a JSON object.
    async fn upload_document(&self, filename: &str, contents: Vec<u8>) -> (u16, String) {
        tracing::info!(filename, size = contents.len(), "upload_document requested");
        ingest::upload_document(&self.state, filename, &contents)
            .await
            .into_tuple()
    }

    /// Discard a session's liveness window. Returns whether it existed.
    async fn end_session(
        &self,
        session: &str,
        #[zbus(header)] header: zbus::message::Header<'_>,
    ) -> bool {
        match session_key(session, &header) {
            Some(session) => self.state.sessions.lock().await.end(&session),
            None => false,
        }
    }

    /// List a session's saved captures as JSON.
    async fn list_captures(
        &self,
        session: &str,
        #[zbus(header)] header: zbus::message::Header<'_>,
    ) -> zbus::fdo::Result<String> {
        let session = session_key(session, &header)
            .ok_or_else(|| zbus::fdo::Error::InvalidArgs("no session id".to_string()))?;
        let records = self
            .state
            .captures
            .list_by_session(&session)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        serde_json::to_string(&records).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Return daemon status information as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let state = &self.state;
        // Ledger failures are logged and reported as a null count.
        let capture_count = match state.captures.count_all().await {
            Ok(count) => Some(count),
            Err(e) => {
                tracing::warn!(error = %e, "failed to count captures");
                None
            }
        };
        let active_sessions = state.sessions.lock().await.len();

        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "detector_model": state.config.detector_path.display().to_string(),
            "model": state.config.model_path.display().to_string(),
            "active_sessions": active_sessions,
            "captures_saved": capture_count,
            "ear_threshold": state.config.ear_threshold,
            "window_size": state.config.window_size,
            "votes_required": state.config.votes_required,
            "face_selection": state.config.face_selection.as_str(),
        })
        .to_string())
    }
}
