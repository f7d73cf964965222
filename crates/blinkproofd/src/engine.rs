use blinkproof_core::{
    DetectError, FaceRegion, FrameClassifier, FrameVerdict, LandmarkProvider, OnnxLandmarker,
    OnnxLandmarkerConfig,
};
use image::RgbImage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("landmark detection failed: {0}")]
    Detect(#[from] DetectError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Classify {
        frame: RgbImage,
        reply: oneshot::Sender<Result<FrameVerdict, EngineError>>,
    },
    LocateFace {
        image: RgbImage,
        reply: oneshot::Sender<Result<Option<FaceRegion>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Run landmark detection on a frame and classify it.
    pub async fn classify(&self, frame: RgbImage) -> Result<FrameVerdict, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Classify {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Region of the first face in `image`, if any.
    pub async fn locate_face(&self, image: RgbImage) -> Result<Option<FaceRegion>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::LocateFace {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Load the detector and landmark models and spawn the engine on a dedicated
/// OS thread.
///
/// Fails fast at startup if either model cannot be loaded.
pub fn spawn_engine(
    models: &OnnxLandmarkerConfig,
    classifier: FrameClassifier,
) -> Result<EngineHandle, EngineError> {
    let landmarker = OnnxLandmarker::load(models)?;
    tracing::info!(
        detector = %models.detector_path.display(),
        landmarks = %models.landmark_path.display(),
        "face models loaded"
    );
    spawn_with_provider(landmarker, classifier)
}

/// Spawn the engine thread around an already-built provider.
pub fn spawn_with_provider<P>(
    mut provider: P,
    classifier: FrameClassifier,
) -> Result<EngineHandle, EngineError>
where
    P: LandmarkProvider + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("blinkproof-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Classify { frame, reply } => {
                        let result = classifier
                            .classify(&mut provider, frame)
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                    EngineRequest::LocateFace { image, reply } => {
                        let result = provider
                            .detect(&image)
                            .map(|faces| faces.first().map(|f| f.region))
                            .map_err(EngineError::from);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
