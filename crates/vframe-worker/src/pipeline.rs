//! Per-frame processing: caption, embed, persist, report.

use std::sync::Arc;

use tracing::{debug, warn};

use vframe_media::FrameExtractor;
use vframe_ml_client::{Captioner, Embedder, FrameRecord, VectorStore};
use vframe_models::{FrameDescriptor, JobEvent, JobId};
use vframe_progress::{EventBus, ProgressStore};

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;

/// Collaborators shared by every frame of every job.
#[derive(Clone)]
pub struct FramePipeline {
    store: Arc<dyn ProgressStore>,
    bus: Arc<dyn EventBus>,
    extractor: Arc<dyn FrameExtractor>,
    captioner: Arc<dyn Captioner>,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
}

impl FramePipeline {
    pub fn new(
        store: Arc<dyn ProgressStore>,
        bus: Arc<dyn EventBus>,
        extractor: Arc<dyn FrameExtractor>,
        captioner: Arc<dyn Captioner>,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            store,
            bus,
            extractor,
            captioner,
            embedder,
            vectors,
        }
    }

    pub fn store(&self) -> &Arc<dyn ProgressStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    pub fn extractor(&self) -> &Arc<dyn FrameExtractor> {
        &self.extractor
    }

    /// Run one frame to completion and record it as done.
    ///
    /// On error nothing is recorded as failed; the caller reports the failure
    /// through [`FramePipeline::record_failure`] so panics and errors share
    /// one path.
    pub async fn process(
        &self,
        job_id: &JobId,
        frame: &FrameDescriptor,
        total_frames: u32,
    ) -> WorkerResult<FrameDescriptor> {
        let index = frame.index;

        self.store.mark_in_process(job_id, index).await?;
        self.publish(job_id, JobEvent::FrameProcessing(frame.info(Some(total_frames))))
            .await;

        let image = self
            .extractor
            .load_frame(&frame.locator)
            .await
            .map_err(|e| WorkerError::frame_failed(index, format!("load: {}", e)))?;

        let description = self
            .captioner
            .describe(&image)
            .await
            .map_err(|e| WorkerError::frame_failed(index, format!("describe: {}", e)))?;

        let embedding = self
            .embedder
            .embed(&description)
            .await
            .map_err(|e| WorkerError::frame_failed(index, format!("embed: {}", e)))?;

        let record = FrameRecord::new(
            job_id,
            index,
            frame.locator.clone(),
            description.clone(),
            frame.timestamp,
            embedding.clone(),
        );
        self.vectors
            .upsert(&record)
            .await
            .map_err(|e| WorkerError::frame_failed(index, format!("persist: {}", e)))?;

        self.store.mark_done(job_id, index).await?;

        let described = FrameDescriptor {
            description: Some(description),
            embedding: Some(embedding),
            ..frame.clone()
        };
        self.publish(job_id, JobEvent::FrameProcessed(described.info(Some(total_frames))))
            .await;

        metrics::record_frame_processed();
        debug!(job_id = %job_id, frame_idx = index, "Frame processed");
        Ok(described)
    }

    /// Record a frame as failed and tell viewers.
    pub async fn record_failure(&self, job_id: &JobId, index: u32, message: &str) {
        warn!(job_id = %job_id, frame_idx = index, "Frame failed: {}", message);
        if let Err(e) = self.store.mark_failed(job_id, index).await {
            warn!(job_id = %job_id, frame_idx = index, "Failed to mark frame failed: {}", e);
        }
        self.publish(job_id, JobEvent::frame_error(index, message)).await;
        metrics::record_frame_failed();
    }

    /// Publish without letting a bus failure affect the frame.
    pub async fn publish(&self, job_id: &JobId, event: JobEvent) {
        if let Err(e) = self.bus.publish(job_id, &event).await {
            warn!(
                job_id = %job_id,
                kind = event.kind().as_str(),
                "Failed to publish event: {}", e
            );
        }
    }
}
