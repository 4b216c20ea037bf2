use attendface_core::detector::DetectorError;
use attendface_core::gallery::GalleryError;
use attendface_core::protocol::{
    self, IdentifyFaceRequest, IdentifyFaceResponse, RegisterFaceRequest, RegisterFaceResponse,
};
use attendface_core::{FaceLocator, FacePipeline, GalleryStore, PipelineOptions, StudentSummary};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("gallery error: {0}")]
    Gallery(#[from] GalleryError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from API handlers to the engine thread.
enum EngineRequest {
    Register {
        req: RegisterFaceRequest,
        reply: oneshot::Sender<RegisterFaceResponse>,
    },
    Identify {
        req: IdentifyFaceRequest,
        reply: oneshot::Sender<IdentifyFaceResponse>,
    },
    Students {
        class: String,
        reply: oneshot::Sender<Result<Vec<StudentSummary>, GalleryError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Decode the images, detect, normalize and store the student's gallery.
    pub async fn register_face(&self, req: RegisterFaceRequest) -> Result<RegisterFaceResponse, EngineError> {
        self.call(|reply| EngineRequest::Register { req, reply }).await
    }

    /// Decode the probe and classify it against its class gallery.
    pub async fn identify_face(&self, req: IdentifyFaceRequest) -> Result<IdentifyFaceResponse, EngineError> {
        self.call(|reply| EngineRequest::Identify { req, reply }).await
    }

    /// Students enrolled in `class`.
    pub async fn students(&self, class: String) -> Result<Vec<StudentSummary>, EngineError> {
        Ok(self.call(|reply| EngineRequest::Students { class, reply }).await??)
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The locator is built on the engine thread by `make_locator` and never
/// leaves it. Fails fast if the locator cannot be built. All pipeline
/// work is serialized through this thread, so an identification never
/// runs concurrently with an enrollment.
pub fn spawn_engine<L, F>(
    make_locator: F,
    store: GalleryStore,
    options: PipelineOptions,
) -> Result<EngineHandle, EngineError>
where
    L: FaceLocator + 'static,
    F: FnOnce() -> Result<L, DetectorError> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<(), DetectorError>>(1);

    std::thread::Builder::new()
        .name("attendface-engine".into())
        .spawn(move || {
            let locator = match make_locator() {
                Ok(locator) => {
                    let _ = ready_tx.send(Ok(()));
                    locator
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let mut pipeline = FacePipeline::new(locator, store, options);

            tracing::info!(
                neighbors = options.neighbors,
                equalize_probe = options.equalize_probe,
                "engine thread started"
            );
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Register { req, reply } => {
                        let _ = reply.send(protocol::register_face(&mut pipeline, req));
                    }
                    EngineRequest::Identify { req, reply } => {
                        let _ = reply.send(protocol::identify_face(&mut pipeline, req));
                    }
                    EngineRequest::Students { class, reply } => {
                        let _ = reply.send(pipeline.store().list_students(&class));
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(EngineHandle { tx }),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(EngineError::ChannelClosed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendface_core::protocol::Status;
    use attendface_core::BoundingBox;
    use image::GrayImage;

    /// Reports one fixed box on any non-empty image.
    struct FixedLocator;

    impl FaceLocator for FixedLocator {
        fn locate(&mut self, gray: &GrayImage) -> Vec<BoundingBox> {
            let (w, h) = gray.dimensions();
            BoundingBox::clamped(0, 0, w, h, w, h).into_iter().collect()
        }
    }

    #[test]
    fn test_locator_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::open(dir.path()).unwrap();
        let result = spawn_engine(
            || -> Result<FixedLocator, DetectorError> { Err(DetectorError::ModelNotFound("missing.bin".into())) },
            store,
            PipelineOptions::default(),
        );
        assert!(matches!(result, Err(EngineError::Detector(DetectorError::ModelNotFound(_)))));
    }

    #[tokio::test]
    async fn test_requests_round_trip_through_thread() {
        let dir = tempfile::tempdir().unwrap();
        let store = GalleryStore::open(dir.path()).unwrap();
        let engine = spawn_engine(|| Ok(FixedLocator), store, PipelineOptions::default()).unwrap();

        let resp = engine
            .identify_face(IdentifyFaceRequest {
                class_name: "CS101".into(),
                image: "not base64!".into(),
            })
            .await
            .unwrap();
        assert_eq!(resp.status, Status::Fail);

        let err = engine.students("CS101".into()).await.unwrap_err();
        assert!(matches!(err, EngineError::Gallery(GalleryError::NoClassData(_))));
    }
}
