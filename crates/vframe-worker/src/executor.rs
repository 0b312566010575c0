//! Job executor.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use vframe_progress::{JobQueue, ProcessFramesJob};

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::orchestrator::JobOrchestrator;

/// Job executor that processes jobs from the queue.
pub struct JobExecutor {
    config: WorkerConfig,
    queue: Arc<JobQueue>,
    orchestrator: Arc<JobOrchestrator>,
    job_semaphore: Arc<Semaphore>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl JobExecutor {
    pub fn new(config: WorkerConfig, queue: JobQueue, orchestrator: JobOrchestrator) -> Self {
        let job_semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs));
        let (shutdown, _) = watch::channel(false);
        let consumer_name = format!("worker-{}", Uuid::new_v4());

        Self {
            config,
            queue: Arc::new(queue),
            orchestrator: Arc::new(orchestrator),
            job_semaphore,
            shutdown,
            consumer_name,
        }
    }

    /// Consume jobs until shutdown is signalled, then drain in-flight jobs.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting job executor '{}' with {} max concurrent jobs",
            self.consumer_name, self.config.max_concurrent_jobs
        );

        self.queue.init().await?;

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            if *shutdown_rx.borrow_and_update() {
                info!("Shutdown signal received, stopping executor");
                break;
            }

            tokio::select! {
                _ = shutdown_rx.changed() => {}
                result = self.consume_jobs() => {
                    if let Err(e) = result {
                        error!("Error consuming jobs: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }

        info!("Waiting for in-flight jobs to complete...");
        if tokio::time::timeout(self.config.shutdown_timeout, self.wait_for_jobs())
            .await
            .is_err()
        {
            warn!(
                "In-flight jobs still running after {:?}, exiting anyway",
                self.config.shutdown_timeout
            );
        }

        info!("Job executor stopped");
        Ok(())
    }

    async fn consume_jobs(&self) -> WorkerResult<()> {
        let available = self.job_semaphore.available_permits();
        if available == 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            return Ok(());
        }

        // Block for up to one second
        let jobs = self
            .queue
            .consume(&self.consumer_name, 1000, available.min(5))
            .await?;

        if jobs.is_empty() {
            return Ok(());
        }

        debug!("Consumed {} jobs from queue", jobs.len());

        for (message_id, job) in jobs {
            let permit = self
                .job_semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| WorkerError::config_error("job semaphore closed"))?;
            let orchestrator = Arc::clone(&self.orchestrator);
            let queue = Arc::clone(&self.queue);
            let default_fps = self.config.default_fps;

            tokio::spawn(async move {
                let _permit = permit;
                execute_job(&orchestrator, &job, default_fps).await;
                // Failed jobs are not redelivered
                if let Err(e) = queue.ack(&message_id).await {
                    error!("Failed to ack job {}: {}", job.job_id, e);
                }
            });
        }

        Ok(())
    }

    async fn wait_for_jobs(&self) {
        while self.job_semaphore.available_permits() < self.config.max_concurrent_jobs {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }
}

/// Run one queued job, logging its outcome.
pub async fn execute_job(orchestrator: &JobOrchestrator, job: &ProcessFramesJob, default_fps: f64) {
    let fps = job.fps.unwrap_or(default_fps);
    info!("Executing job {}", job.job_id);

    match orchestrator
        .run(&job.job_id, Path::new(&job.video_path), fps)
        .await
    {
        Ok(outcome) => info!(
            "Job {} completed: {}/{} frames described",
            job.job_id, outcome.succeeded, outcome.frame_count
        ),
        Err(WorkerError::AlreadyFinished { state, .. }) => {
            warn!("Job {} already finished ({}), skipping", job.job_id, state)
        }
        Err(e) => error!("Job {} failed: {}", job.job_id, e),
    }
}
