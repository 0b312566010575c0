//! Bounded pool running frames concurrently and out of order.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use vframe_models::{FrameDescriptor, JobId};

use crate::pipeline::FramePipeline;

/// Per-job frame outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSummary {
    pub succeeded: usize,
    pub failed: usize,
}

impl PoolSummary {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Runs the frame pipeline over a job's frames with bounded parallelism.
#[derive(Clone)]
pub struct FramePool {
    pipeline: Arc<FramePipeline>,
}

impl FramePool {
    pub fn new(pipeline: Arc<FramePipeline>) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &Arc<FramePipeline> {
        &self.pipeline
    }

    /// Process every frame with at most `concurrency` in flight.
    ///
    /// Returns once every frame has published its terminal event. A failing
    /// or panicking frame is recorded and never affects its siblings.
    pub async fn run(
        &self,
        job_id: &JobId,
        frames: Vec<FrameDescriptor>,
        concurrency: usize,
    ) -> PoolSummary {
        let concurrency = concurrency.max(1);
        let total_frames = u32::try_from(frames.len()).unwrap_or(u32::MAX);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();
        let mut summary = PoolSummary::default();

        debug!(job_id = %job_id, frames = frames.len(), concurrency, "Starting frame pool");

        for frame in frames {
            // The semaphore is owned here and never closed
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let pipeline = Arc::clone(&self.pipeline);
            let job_id = job_id.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let index = frame.index;
                let outcome = AssertUnwindSafe(pipeline.process(&job_id, &frame, total_frames))
                    .catch_unwind()
                    .await;

                let message = match outcome {
                    Ok(Ok(_)) => return true,
                    Ok(Err(e)) => e.to_string(),
                    Err(panic) => format!("frame task panicked: {}", panic_message(panic.as_ref())),
                };
                pipeline.record_failure(&job_id, index, &message).await;
                false
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => summary.succeeded += 1,
                Ok(false) => summary.failed += 1,
                Err(e) => {
                    // Only reachable if the runtime cancels the task
                    error!(job_id = %job_id, "Frame task aborted: {}", e);
                    summary.failed += 1;
                }
            }
        }

        summary
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
