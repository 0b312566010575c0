//! Drives one job: probe, extract, fan out frames, finish.

use std::path::{Path, PathBuf};

use tracing::{warn, Instrument};

use vframe_media::MediaError;
use vframe_models::{FrameDescriptor, FrameUrls, JobEvent, JobId};
use vframe_progress::JobStateMachine;

use crate::error::{WorkerError, WorkerResult};
use crate::logging::JobLogger;
use crate::metrics;
use crate::pool::{FramePool, PoolSummary};

/// Result of a finished job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub frame_count: u32,
    pub succeeded: usize,
    pub failed: usize,
    /// Native frame rate reported by the probe
    pub fps: f64,
    /// Duration reported by the probe, in seconds
    pub duration: f64,
}

/// Owns the lifecycle of each job it runs.
pub struct JobOrchestrator {
    pool: FramePool,
    jobs: JobStateMachine,
    urls: FrameUrls,
    frames_dir: PathBuf,
    concurrency: usize,
}

impl JobOrchestrator {
    pub fn new(
        pool: FramePool,
        jobs: JobStateMachine,
        urls: FrameUrls,
        frames_dir: impl Into<PathBuf>,
        concurrency: usize,
    ) -> Self {
        Self {
            pool,
            jobs,
            urls,
            frames_dir: frames_dir.into(),
            concurrency: concurrency.max(1),
        }
    }

    /// Directory receiving the frames of one job.
    pub fn job_frames_dir(&self, job_id: &JobId) -> PathBuf {
        let safe: String = job_id
            .as_str()
            .chars()
            .map(|c| if c == ':' || c.is_whitespace() || c == '/' { '_' } else { c })
            .collect();
        self.frames_dir.join(safe)
    }

    /// Process a video end to end.
    ///
    /// Frame failures are counted in the outcome. Any other failure moves the
    /// job to `error`, publishes `JobFailed` and is returned.
    pub async fn run(&self, job_id: &JobId, video_path: &Path, fps: f64) -> WorkerResult<JobOutcome> {
        let logger = JobLogger::new(job_id, "frame_processing");
        let span = logger.create_span();

        async {
            let record = self.jobs.create(job_id).await?;
            if record.is_terminal() {
                return Err(WorkerError::AlreadyFinished {
                    job_id: job_id.clone(),
                    state: record.processing_state,
                });
            }

            logger.log_start(&format!("{} at {} fps", video_path.display(), fps));

            match self.execute(job_id, video_path, fps, &logger).await {
                Ok(outcome) => {
                    metrics::record_job_completed();
                    logger.log_completion(&format!(
                        "{} frames, {} described, {} failed",
                        outcome.frame_count, outcome.succeeded, outcome.failed
                    ));
                    Ok(outcome)
                }
                Err(e) => {
                    logger.log_error(&e.to_string());
                    self.fail(job_id, &e).await;
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        job_id: &JobId,
        video_path: &Path,
        fps: f64,
        logger: &JobLogger,
    ) -> WorkerResult<JobOutcome> {
        let pipeline = self.pool.pipeline();
        pipeline.store().register(job_id).await?;

        let extractor = pipeline.extractor();
        let info = extractor.probe(video_path).await?;
        let out_dir = self.job_frames_dir(job_id);
        let paths = extractor.extract(video_path, fps, &out_dir).await?;

        let frames = self.describe_frames(job_id, &paths, fps);
        let frame_count = u32::try_from(frames.len())
            .map_err(|_| MediaError::invalid_video("too many frames"))?;

        pipeline.store().set_total(job_id, frame_count).await?;
        self.jobs.start_processing(job_id, frame_count).await?;
        pipeline
            .publish(job_id, JobEvent::frames_extracted(job_id, frame_count))
            .await;
        logger.log_progress(&format!("extracted {} frames", frame_count));

        let PoolSummary { succeeded, failed } =
            self.pool.run(job_id, frames, self.concurrency).await;

        self.jobs.succeed(job_id).await?;
        pipeline
            .publish(job_id, JobEvent::all_frames_processed(job_id))
            .await;

        Ok(JobOutcome {
            frame_count,
            succeeded,
            failed,
            fps: info.fps,
            duration: info.duration,
        })
    }

    fn describe_frames(&self, job_id: &JobId, paths: &[PathBuf], fps: f64) -> Vec<FrameDescriptor> {
        paths
            .iter()
            .enumerate()
            .map(|(i, path)| {
                let index = i as u32;
                FrameDescriptor::new(
                    index,
                    fps,
                    path.to_string_lossy(),
                    self.urls.frame_url(job_id, index),
                )
            })
            .collect()
    }

    async fn fail(&self, job_id: &JobId, error: &WorkerError) {
        let stage = if error.is_extraction_failure() {
            "extraction"
        } else {
            "processing"
        };
        metrics::record_job_failed(stage);

        let message = error.to_string();
        if let Err(e) = self.jobs.fail(job_id, &message).await {
            warn!(job_id = %job_id, "Could not mark job failed: {}", e);
        }
        self.pool
            .pipeline()
            .publish(job_id, JobEvent::job_failed(job_id, message))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::*;
    use std::sync::Arc;
    use std::time::Duration;

    use futures::StreamExt;
    use vframe_models::JobState;
    use vframe_progress::{EventBus, InMemoryJobRepository, ProgressStore};

    fn orchestrator(h: &Harness, concurrency: usize) -> (JobOrchestrator, JobStateMachine) {
        let jobs = JobStateMachine::new(Arc::new(InMemoryJobRepository::new()));
        let pool = FramePool::new(Arc::new(h.pipeline.clone()));
        let orch = JobOrchestrator::new(
            pool,
            jobs.clone(),
            FrameUrls::default(),
            "/tmp/vframe-test",
            concurrency,
        );
        (orch, jobs)
    }

    async fn drain(events: &mut vframe_progress::EventStream) -> Vec<JobEvent> {
        let mut received = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(200), events.next()).await
        {
            let terminal = event.is_terminal();
            received.push(event);
            if terminal {
                break;
            }
        }
        received
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_happy_path_three_frames() {
        let h = harness(FakeExtractor::frames(3), FakeCaptioner::default());
        let (orch, jobs) = orchestrator(&h, 2);
        let job = JobId::from_string("v1");
        let mut events = h.bus.subscribe(&job).await.unwrap();

        let outcome = orch.run(&job, Path::new("/uploads/v1.mp4"), 1.0).await.unwrap();
        assert_eq!(outcome.frame_count, 3);
        assert_eq!((outcome.succeeded, outcome.failed), (3, 0));
        assert_eq!(outcome.fps, 30.0);

        let received = drain(&mut events).await;
        assert_eq!(received.first(), Some(&JobEvent::frames_extracted(&job, 3)));
        assert_eq!(received.last(), Some(&JobEvent::all_frames_processed(&job)));
        let processed = received
            .iter()
            .filter(|e| matches!(e, JobEvent::FrameProcessed(_)))
            .count();
        assert_eq!(processed, 3);

        // Each frame's processing event precedes its processed event
        for idx in 0..3 {
            let started = received
                .iter()
                .position(|e| matches!(e, JobEvent::FrameProcessing(i) if i.frame_idx == idx))
                .unwrap();
            let finished = received
                .iter()
                .position(|e| matches!(e, JobEvent::FrameProcessed(i) if i.frame_idx == idx))
                .unwrap();
            assert!(started < finished);
        }

        let snapshot = h.store.snapshot(&job).await.unwrap();
        assert_eq!(snapshot.total_frames, 3);
        assert_eq!(snapshot.done_indices(), vec![0, 1, 2]);
        assert!(snapshot.in_process.is_empty());
        assert_eq!(snapshot.first_frame_url.as_deref(), Some("/frames/v1/frame_00001.jpg"));

        let record = jobs.get(&job).await.unwrap();
        assert_eq!(record.processing_state, JobState::Success);
        assert_eq!(record.frame_count, Some(3));

        let stored = h.vectors.records_for(&job);
        let timestamps: Vec<f64> = stored.iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![0.0, 1.0, 2.0]);
        assert_eq!(stored[2].id, "v1_frame_2");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_frame_failure_still_succeeds() {
        // Index 2 fails
        let h = harness(FakeExtractor::frames(5), FakeCaptioner::failing_frames(&[3]));
        let (orch, jobs) = orchestrator(&h, 4);
        let job = JobId::from_string("v2");
        let mut events = h.bus.subscribe(&job).await.unwrap();

        let outcome = orch.run(&job, Path::new("/uploads/v2.mp4"), 2.0).await.unwrap();
        assert_eq!((outcome.succeeded, outcome.failed), (4, 1));

        let received = drain(&mut events).await;
        assert!(received
            .iter()
            .any(|e| matches!(e, JobEvent::FrameError { frame_idx: 2, .. })));
        assert!(received.last().unwrap().is_terminal());

        let snapshot = h.store.snapshot(&job).await.unwrap();
        assert_eq!(snapshot.done_indices(), vec![0, 1, 3, 4]);
        assert_eq!(snapshot.failed_indices(), vec![2]);
        assert_eq!(jobs.state(&job).await.unwrap(), JobState::Success);
    }

    #[tokio::test]
    async fn test_extraction_failure_marks_job_error() {
        let h = harness(FakeExtractor::broken(), FakeCaptioner::default());
        let (orch, jobs) = orchestrator(&h, 4);
        let job = JobId::from_string("v3");
        let mut events = h.bus.subscribe(&job).await.unwrap();

        let err = orch.run(&job, Path::new("/uploads/v3.mp4"), 1.0).await.unwrap_err();
        assert!(err.is_extraction_failure());

        let received = drain(&mut events).await;
        assert_eq!(received.len(), 1);
        match &received[0] {
            JobEvent::JobFailed { job_id, error } => {
                assert_eq!(job_id, &job);
                assert!(error.contains("corrupt container"));
            }
            other => panic!("unexpected event {other:?}"),
        }

        let record = jobs.get(&job).await.unwrap();
        assert_eq!(record.processing_state, JobState::Error);
        assert!(record.error_message.unwrap().contains("corrupt container"));

        let snapshot = h.store.snapshot(&job).await.unwrap();
        assert_eq!(snapshot.total_frames, 0);
        assert!(snapshot.extraction_in_progress());
    }

    #[tokio::test]
    async fn test_zero_frame_video() {
        let h = harness(FakeExtractor::frames(0), FakeCaptioner::default());
        let (orch, jobs) = orchestrator(&h, 4);
        let job = JobId::from_string("empty");

        let outcome = orch.run(&job, Path::new("/uploads/empty.mp4"), 1.0).await.unwrap();
        assert_eq!(outcome.frame_count, 0);
        assert_eq!(jobs.state(&job).await.unwrap(), JobState::Success);

        let snapshot = h.store.snapshot(&job).await.unwrap();
        assert!(!snapshot.extraction_in_progress());
        assert_eq!(snapshot.first_frame_url, None);
    }

    #[tokio::test]
    async fn test_finished_job_is_not_rerun() {
        let h = harness(FakeExtractor::frames(1), FakeCaptioner::default());
        let (orch, _jobs) = orchestrator(&h, 1);
        let job = JobId::from_string("again");

        orch.run(&job, Path::new("/uploads/a.mp4"), 1.0).await.unwrap();
        let err = orch.run(&job, Path::new("/uploads/a.mp4"), 1.0).await.unwrap_err();
        assert!(matches!(
            err,
            WorkerError::AlreadyFinished {
                state: JobState::Success,
                ..
            }
        ));
    }

    #[test]
    fn test_job_frames_dir_is_sanitized() {
        let h = harness(FakeExtractor::frames(0), FakeCaptioner::default());
        let (orch, _) = orchestrator(&h, 1);
        assert_eq!(
            orch.job_frames_dir(&JobId::from_string("a:b c")),
            PathBuf::from("/tmp/vframe-test/a_b_c")
        );
    }
}
