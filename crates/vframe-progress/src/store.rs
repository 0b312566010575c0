//! Per-job progress sets.
//!
//! Workers mark frames in-process, done or failed while viewers read
//! consistent snapshots. Every mutation is atomic per job.

use std::collections::BTreeSet;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use vframe_models::{FrameInfo, FrameUrls, JobId, ProgressSnapshot};

use crate::error::{ProgressError, ProgressResult};

/// Concurrency-safe store of per-job frame progress.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Create an empty record for a job. Registering twice is a no-op.
    async fn register(&self, job_id: &JobId) -> ProgressResult<()>;

    /// Fix the job's total frame count. Only the first call succeeds.
    async fn set_total(&self, job_id: &JobId, total: u32) -> ProgressResult<()>;

    /// Record that a worker started on `index`.
    async fn mark_in_process(&self, job_id: &JobId, index: u32) -> ProgressResult<()>;

    /// Move `index` from in-process to done in one step.
    async fn mark_done(&self, job_id: &JobId, index: u32) -> ProgressResult<()>;

    /// Move `index` from in-process to failed in one step.
    async fn mark_failed(&self, job_id: &JobId, index: u32) -> ProgressResult<()>;

    /// Consistent view of all mutations completed before the call.
    async fn snapshot(&self, job_id: &JobId) -> ProgressResult<ProgressSnapshot>;

    /// Drop the job's record.
    async fn remove(&self, job_id: &JobId) -> ProgressResult<()>;
}

/// Frame sets for one job.
#[derive(Debug, Clone, Default)]
pub(crate) struct JobProgress {
    pub(crate) total: Option<u32>,
    pub(crate) in_process: BTreeSet<u32>,
    pub(crate) done: BTreeSet<u32>,
    pub(crate) failed: BTreeSet<u32>,
}

impl JobProgress {
    fn check_index(&self, job_id: &JobId, index: u32) -> ProgressResult<()> {
        match self.total {
            Some(total) if index >= total => Err(ProgressError::FrameOutOfRange {
                job_id: job_id.clone(),
                index,
                total,
            }),
            _ => Ok(()),
        }
    }

    pub(crate) fn snapshot(&self, job_id: &JobId, urls: &FrameUrls) -> ProgressSnapshot {
        let Some(total) = self.total else {
            return ProgressSnapshot::extracting();
        };

        let refs = |set: &BTreeSet<u32>| -> Vec<FrameInfo> {
            set.iter()
                .map(|&idx| FrameInfo::reference(idx, urls.frame_url(job_id, idx)))
                .collect()
        };

        ProgressSnapshot {
            in_process: refs(&self.in_process),
            done: refs(&self.done),
            failed: refs(&self.failed),
            total_frames: total,
            first_frame_url: (total > 0).then(|| urls.frame_url(job_id, 0)),
            total_known: true,
        }
    }
}

/// In-process store backed by a sharded concurrent map.
///
/// Each mutation holds only its shard's lock for a handful of set operations,
/// so distinct jobs proceed independently and readers never wait on a long
/// critical section.
pub struct InMemoryProgressStore {
    jobs: DashMap<JobId, JobProgress>,
    urls: FrameUrls,
}

impl InMemoryProgressStore {
    pub fn new(urls: FrameUrls) -> Self {
        Self {
            jobs: DashMap::new(),
            urls,
        }
    }

    /// Number of jobs currently tracked.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn with_job<T>(
        &self,
        job_id: &JobId,
        f: impl FnOnce(&mut JobProgress) -> ProgressResult<T>,
    ) -> ProgressResult<T> {
        let mut entry = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| ProgressError::not_found(job_id))?;
        f(entry.value_mut())
    }
}

impl Default for InMemoryProgressStore {
    fn default() -> Self {
        Self::new(FrameUrls::default())
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn register(&self, job_id: &JobId) -> ProgressResult<()> {
        self.jobs.entry(job_id.clone()).or_default();
        Ok(())
    }

    async fn set_total(&self, job_id: &JobId, total: u32) -> ProgressResult<()> {
        self.with_job(job_id, |progress| match progress.total {
            Some(_) => Err(ProgressError::TotalAlreadySet(job_id.clone())),
            None => {
                progress.total = Some(total);
                Ok(())
            }
        })
    }

    async fn mark_in_process(&self, job_id: &JobId, index: u32) -> ProgressResult<()> {
        self.with_job(job_id, |progress| {
            progress.check_index(job_id, index)?;
            if progress.done.contains(&index) {
                debug!(job_id = %job_id, frame_idx = index, "Frame already done, not re-marking");
                return Ok(());
            }
            progress.failed.remove(&index);
            progress.in_process.insert(index);
            Ok(())
        })
    }

    async fn mark_done(&self, job_id: &JobId, index: u32) -> ProgressResult<()> {
        self.with_job(job_id, |progress| {
            progress.check_index(job_id, index)?;
            progress.in_process.remove(&index);
            progress.failed.remove(&index);
            progress.done.insert(index);
            Ok(())
        })
    }

    async fn mark_failed(&self, job_id: &JobId, index: u32) -> ProgressResult<()> {
        self.with_job(job_id, |progress| {
            progress.check_index(job_id, index)?;
            progress.in_process.remove(&index);
            if !progress.done.contains(&index) {
                progress.failed.insert(index);
            }
            Ok(())
        })
    }

    async fn snapshot(&self, job_id: &JobId) -> ProgressResult<ProgressSnapshot> {
        let entry = self
            .jobs
            .get(job_id)
            .ok_or_else(|| ProgressError::not_found(job_id))?;
        Ok(entry.snapshot(job_id, &self.urls))
    }

    async fn remove(&self, job_id: &JobId) -> ProgressResult<()> {
        self.jobs
            .remove(job_id)
            .map(|_| ())
            .ok_or_else(|| ProgressError::not_found(job_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn job(id: &str) -> JobId {
        JobId::from_string(id)
    }

    async fn registered(id: &str, total: Option<u32>) -> (InMemoryProgressStore, JobId) {
        let store = InMemoryProgressStore::default();
        let job_id = job(id);
        store.register(&job_id).await.unwrap();
        if let Some(total) = total {
            store.set_total(&job_id, total).await.unwrap();
        }
        (store, job_id)
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let store = InMemoryProgressStore::default();
        let missing = job("missing");

        assert!(store.snapshot(&missing).await.unwrap_err().is_not_found());
        assert!(store.mark_in_process(&missing, 0).await.unwrap_err().is_not_found());
        assert!(store.mark_done(&missing, 0).await.unwrap_err().is_not_found());
        assert!(store.set_total(&missing, 3).await.unwrap_err().is_not_found());
        assert!(store.remove(&missing).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_snapshot_before_extraction_is_empty() {
        let (store, job_id) = registered("early", None).await;

        let snapshot = store.snapshot(&job_id).await.unwrap();
        assert!(snapshot.extraction_in_progress());
        assert_eq!(snapshot.total_frames, 0);
        assert!(snapshot.in_process.is_empty());
        assert!(snapshot.done.is_empty());
        assert!(snapshot.first_frame_url.is_none());
    }

    #[tokio::test]
    async fn test_total_is_set_once() {
        let (store, job_id) = registered("once", Some(5)).await;

        let err = store.set_total(&job_id, 9).await.unwrap_err();
        assert!(matches!(err, ProgressError::TotalAlreadySet(_)));
        assert_eq!(store.snapshot(&job_id).await.unwrap().total_frames, 5);
    }

    #[tokio::test]
    async fn test_mark_done_moves_frame() {
        let (store, job_id) = registered("move", Some(3)).await;

        store.mark_in_process(&job_id, 1).await.unwrap();
        let snapshot = store.snapshot(&job_id).await.unwrap();
        assert_eq!(snapshot.in_process_indices(), vec![1]);
        assert!(snapshot.done.is_empty());
        assert_eq!(
            snapshot.first_frame_url.as_deref(),
            Some("/frames/move/frame_00001.jpg")
        );

        store.mark_done(&job_id, 1).await.unwrap();
        let snapshot = store.snapshot(&job_id).await.unwrap();
        assert!(snapshot.in_process.is_empty());
        assert_eq!(snapshot.done_indices(), vec![1]);
        assert_eq!(snapshot.done[0].frame_url, "/frames/move/frame_00002.jpg");
    }

    #[tokio::test]
    async fn test_mark_failed_leaves_done_untouched() {
        let (store, job_id) = registered("fail", Some(4)).await;

        store.mark_in_process(&job_id, 2).await.unwrap();
        store.mark_failed(&job_id, 2).await.unwrap();
        store.mark_done(&job_id, 3).await.unwrap();
        store.mark_failed(&job_id, 3).await.unwrap();

        let snapshot = store.snapshot(&job_id).await.unwrap();
        assert!(snapshot.in_process.is_empty());
        assert_eq!(snapshot.failed_indices(), vec![2]);
        assert_eq!(snapshot.done_indices(), vec![3]);
    }

    #[tokio::test]
    async fn test_done_frame_is_not_re_marked() {
        let (store, job_id) = registered("redo", Some(2)).await;

        store.mark_done(&job_id, 0).await.unwrap();
        store.mark_in_process(&job_id, 0).await.unwrap();

        let snapshot = store.snapshot(&job_id).await.unwrap();
        assert!(snapshot.in_process.is_empty());
        assert_eq!(snapshot.done_indices(), vec![0]);
    }

    #[tokio::test]
    async fn test_index_beyond_total_is_rejected() {
        let (store, job_id) = registered("range", Some(2)).await;

        let err = store.mark_done(&job_id, 2).await.unwrap_err();
        assert!(matches!(err, ProgressError::FrameOutOfRange { index: 2, total: 2, .. }));
        assert!(store.snapshot(&job_id).await.unwrap().done.is_empty());
    }

    #[tokio::test]
    async fn test_zero_frame_video() {
        let (store, job_id) = registered("empty", Some(0)).await;

        let snapshot = store.snapshot(&job_id).await.unwrap();
        assert!(!snapshot.extraction_in_progress());
        assert_eq!(snapshot.total_frames, 0);
        assert!(snapshot.first_frame_url.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_is_idempotent() {
        let (store, job_id) = registered("idem", Some(6)).await;
        for idx in [4, 0, 2] {
            store.mark_in_process(&job_id, idx).await.unwrap();
        }
        store.mark_done(&job_id, 2).await.unwrap();

        let first = store.snapshot(&job_id).await.unwrap();
        let second = store.snapshot(&job_id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.in_process_indices(), vec![0, 4]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mark_done_loses_nothing() {
        let store = Arc::new(InMemoryProgressStore::default());
        let job_id = job("race");
        store.register(&job_id).await.unwrap();
        store.set_total(&job_id, 200).await.unwrap();

        let mut handles = Vec::new();
        for idx in 0..200u32 {
            let store = Arc::clone(&store);
            let job_id = job_id.clone();
            handles.push(tokio::spawn(async move {
                store.mark_in_process(&job_id, idx).await.unwrap();
                tokio::task::yield_now().await;
                store.mark_done(&job_id, idx).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = store.snapshot(&job_id).await.unwrap();
        assert!(snapshot.in_process.is_empty());
        assert_eq!(snapshot.done.len(), 200);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_two_workers_marking_done_together() {
        let store = Arc::new(InMemoryProgressStore::default());
        let job_id = job("pair");
        store.register(&job_id).await.unwrap();
        store.set_total(&job_id, 10).await.unwrap();
        store.mark_in_process(&job_id, 3).await.unwrap();
        store.mark_in_process(&job_id, 7).await.unwrap();

        let barrier = Arc::new(tokio::sync::Barrier::new(2));
        let tasks: Vec<_> = [3u32, 7]
            .into_iter()
            .map(|idx| {
                let store = Arc::clone(&store);
                let job_id = job_id.clone();
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    store.mark_done(&job_id, idx).await.unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let snapshot = store.snapshot(&job_id).await.unwrap();
        assert_eq!(snapshot.done_indices(), vec![3, 7]);
        assert!(snapshot.in_process.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_snapshots_are_disjoint_and_monotonic() {
        let store = Arc::new(InMemoryProgressStore::default());
        let job_id = job("mono");
        store.register(&job_id).await.unwrap();
        store.set_total(&job_id, 64).await.unwrap();

        let writer = {
            let store = Arc::clone(&store);
            let job_id = job_id.clone();
            tokio::spawn(async move {
                for idx in 0..64u32 {
                    store.mark_in_process(&job_id, idx).await.unwrap();
                    if idx % 5 == 0 {
                        store.mark_failed(&job_id, idx).await.unwrap();
                    } else {
                        store.mark_done(&job_id, idx).await.unwrap();
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut previous_done: HashSet<u32> = HashSet::new();
        while !writer.is_finished() {
            let snapshot = store.snapshot(&job_id).await.unwrap();
            let in_process: HashSet<u32> = snapshot.in_process_indices().into_iter().collect();
            let done: HashSet<u32> = snapshot.done_indices().into_iter().collect();

            assert!(in_process.is_disjoint(&done));
            assert!(done.len() as u32 <= snapshot.total_frames);
            assert!(done.is_superset(&previous_done));
            previous_done = done;
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        let snapshot = store.snapshot(&job_id).await.unwrap();
        assert_eq!(snapshot.done.len() + snapshot.failed.len(), 64);
    }

    #[tokio::test]
    async fn test_jobs_are_independent_and_removable() {
        let store = InMemoryProgressStore::default();
        let a = job("a");
        let b = job("b");
        store.register(&a).await.unwrap();
        store.register(&b).await.unwrap();
        store.set_total(&a, 2).await.unwrap();
        store.mark_done(&a, 1).await.unwrap();

        assert!(store.snapshot(&b).await.unwrap().done.is_empty());

        store.remove(&a).await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.snapshot(&a).await.unwrap_err().is_not_found());
    }
}
