use std::sync::Arc;

use anyhow::{Context, Result};
use blinkproof_core::FrameClassifier;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod documents;
mod engine;
mod ingest;
mod sessions;
mod store;

use config::Config;
use dbus_interface::{AppState, LivenessService};
use documents::DocumentStore;
use sessions::SessionRegistry;
use store::CaptureStore;

const BUS_NAME: &str = "org.blinkproof.Liveness1";
const OBJECT_PATH: &str = "/org/blinkproof/Liveness1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("blinkproofd starting");

    let config = Config::from_env();
    config
        .ensure_dirs()
        .context("failed to create storage directories")?;

    for (path, sha256) in [
        (&config.detector_path, config.detector_sha256.as_deref()),
        (&config.model_path, config.model_sha256.as_deref()),
    ] {
        let check = blinkproof_models::verify_model(path, sha256)
            .with_context(|| format!("model integrity check failed for {}", path.display()))?;
        if check.pinned {
            tracing::info!(path = %check.path.display(), sha256 = %check.sha256, "model checksum verified");
        } else {
            tracing::warn!(
                path = %check.path.display(),
                sha256 = %check.sha256,
                "model digest not pinned"
            );
        }
    }

    let engine = engine::spawn_engine(
        &config.landmarker(),
        FrameClassifier::new(config.classifier()),
    )?;

    let captures = CaptureStore::open(&config.capture_dir, &config.db_path).await?;
    tracing::info!(dir = %captures.dir().display(), db = %config.db_path.display(), "capture store ready");

    let documents = DocumentStore::new(&config.upload_dir, &config.faces_dir);
    let sessions = Mutex::new(SessionRegistry::new(
        config.trigger(),
        config.session_idle_timeout,
    ));
    let idle_timeout = config.session_idle_timeout;
    let session_bus = config.session_bus;

    tracing::info!(
        ear_threshold = config.ear_threshold,
        window_size = config.window_size,
        votes_required = config.votes_required,
        face_selection = config.face_selection.as_str(),
        "liveness parameters"
    );

    let state = Arc::new(AppState {
        config,
        engine,
        sessions,
        captures,
        documents,
    });

    let service = LivenessService {
        state: state.clone(),
    };

    let builder = if session_bus {
        tracing::info!("using session bus");
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("failed to register on D-Bus")?;

    let sweeper = tokio::spawn(evict_idle_sessions(state, idle_timeout));

    tracing::info!(bus_name = BUS_NAME, path = OBJECT_PATH, "blinkproofd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    sweeper.abort();
    tracing::info!("blinkproofd shutting down");

    Ok(())
}

/// Periodically drop sessions that have gone quiet.
async fn evict_idle_sessions(state: Arc<AppState>, idle_timeout: std::time::Duration) {
    let period = (idle_timeout / 2).max(std::time::Duration::from_secs(1));
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let evicted = state.sessions.lock().await.evict_idle();
        if evicted > 0 {
            tracing::info!(evicted, "idle sessions evicted");
        }
    }
}
