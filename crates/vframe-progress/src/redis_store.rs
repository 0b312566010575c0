//! Redis-backed progress store.
//!
//! Layout per job:
//! - `vframe:progress:{job}:meta` hash (`registered`, `total`)
//! - `vframe:progress:{job}:in_process`, `:done`, `:failed` sets of indices
//!
//! Mutations run as Lua scripts so the existence check, range check and set
//! moves happen atomically on the server.

use std::collections::BTreeSet;

use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use tracing::debug;

use vframe_models::{FrameUrls, JobId, ProgressSnapshot};

use crate::error::{ProgressError, ProgressResult};
use crate::store::{JobProgress, ProgressStore};

const SET_TOTAL_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return 0 end
if redis.call('HSETNX', KEYS[1], 'total', ARGV[1]) == 0 then return 2 end
return 1
"#;

const MARK_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then return {0, 0} end
local idx = ARGV[1]
local total = redis.call('HGET', KEYS[1], 'total')
if total and tonumber(idx) >= tonumber(total) then return {2, tonumber(total)} end
local mode = ARGV[2]
if mode == 'in_process' then
  if redis.call('SISMEMBER', KEYS[3], idx) == 1 then return {1, 0} end
  redis.call('SREM', KEYS[4], idx)
  redis.call('SADD', KEYS[2], idx)
elseif mode == 'done' then
  redis.call('SREM', KEYS[2], idx)
  redis.call('SREM', KEYS[4], idx)
  redis.call('SADD', KEYS[3], idx)
else
  redis.call('SREM', KEYS[2], idx)
  if redis.call('SISMEMBER', KEYS[3], idx) == 0 then redis.call('SADD', KEYS[4], idx) end
end
return {1, 0}
"#;

#[derive(Debug, Clone, Copy)]
enum MarkMode {
    InProcess,
    Done,
    Failed,
}

impl MarkMode {
    fn as_str(&self) -> &'static str {
        match self {
            MarkMode::InProcess => "in_process",
            MarkMode::Done => "done",
            MarkMode::Failed => "failed",
        }
    }
}

struct Keys {
    meta: String,
    in_process: String,
    done: String,
    failed: String,
}

impl Keys {
    fn for_job(job_id: &JobId) -> Self {
        let base = format!("vframe:progress:{}", job_id);
        Self {
            meta: format!("{}:meta", base),
            in_process: format!("{}:in_process", base),
            done: format!("{}:done", base),
            failed: format!("{}:failed", base),
        }
    }
}

/// Progress store shared between worker and API processes through Redis.
pub struct RedisProgressStore {
    client: redis::Client,
    urls: FrameUrls,
    set_total_script: Script,
    mark_script: Script,
}

impl RedisProgressStore {
    /// Create a new Redis progress store.
    pub fn new(redis_url: &str, urls: FrameUrls) -> ProgressResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            urls,
            set_total_script: Script::new(SET_TOTAL_SCRIPT),
            mark_script: Script::new(MARK_SCRIPT),
        })
    }

    async fn mark(&self, job_id: &JobId, index: u32, mode: MarkMode) -> ProgressResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let keys = Keys::for_job(job_id);

        let (code, total): (i64, i64) = self
            .mark_script
            .prepare_invoke()
            .key(&keys.meta)
            .key(&keys.in_process)
            .key(&keys.done)
            .key(&keys.failed)
            .arg(index)
            .arg(mode.as_str())
            .invoke_async(&mut conn)
            .await?;

        debug!(job_id = %job_id, frame_idx = index, mode = mode.as_str(), code, "Marked frame");

        match code {
            0 => Err(ProgressError::not_found(job_id)),
            2 => Err(ProgressError::FrameOutOfRange {
                job_id: job_id.clone(),
                index,
                total: u32::try_from(total).unwrap_or(u32::MAX),
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl ProgressStore for RedisProgressStore {
    async fn register(&self, job_id: &JobId) -> ProgressResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let keys = Keys::for_job(job_id);
        conn.hset_nx::<_, _, _, ()>(&keys.meta, "registered", 1).await?;
        Ok(())
    }

    async fn set_total(&self, job_id: &JobId, total: u32) -> ProgressResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let keys = Keys::for_job(job_id);

        let code: i64 = self
            .set_total_script
            .prepare_invoke()
            .key(&keys.meta)
            .arg(total)
            .invoke_async(&mut conn)
            .await?;

        match code {
            0 => Err(ProgressError::not_found(job_id)),
            2 => Err(ProgressError::TotalAlreadySet(job_id.clone())),
            _ => Ok(()),
        }
    }

    async fn mark_in_process(&self, job_id: &JobId, index: u32) -> ProgressResult<()> {
        self.mark(job_id, index, MarkMode::InProcess).await
    }

    async fn mark_done(&self, job_id: &JobId, index: u32) -> ProgressResult<()> {
        self.mark(job_id, index, MarkMode::Done).await
    }

    async fn mark_failed(&self, job_id: &JobId, index: u32) -> ProgressResult<()> {
        self.mark(job_id, index, MarkMode::Failed).await
    }

    async fn snapshot(&self, job_id: &JobId) -> ProgressResult<ProgressSnapshot> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let keys = Keys::for_job(job_id);

        let (exists, total, in_process, done, failed): (
            bool,
            Option<u32>,
            Vec<u32>,
            Vec<u32>,
            Vec<u32>,
        ) = redis::pipe()
            .atomic()
            .exists(&keys.meta)
            .hget(&keys.meta, "total")
            .smembers(&keys.in_process)
            .smembers(&keys.done)
            .smembers(&keys.failed)
            .query_async(&mut conn)
            .await?;

        if !exists {
            return Err(ProgressError::not_found(job_id));
        }

        let progress = JobProgress {
            total,
            in_process: in_process.into_iter().collect::<BTreeSet<_>>(),
            done: done.into_iter().collect(),
            failed: failed.into_iter().collect(),
        };
        Ok(progress.snapshot(job_id, &self.urls))
    }

    async fn remove(&self, job_id: &JobId) -> ProgressResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let keys = Keys::for_job(job_id);

        let exists: bool = conn.exists(&keys.meta).await?;
        if !exists {
            return Err(ProgressError::not_found(job_id));
        }
        conn.del::<_, ()>(&[keys.meta, keys.in_process, keys.done, keys.failed])
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = Keys::for_job(&JobId::from_string("abc"));
        assert_eq!(keys.meta, "vframe:progress:abc:meta");
        assert_eq!(keys.in_process, "vframe:progress:abc:in_process");
        assert_eq!(keys.done, "vframe:progress:abc:done");
        assert_eq!(keys.failed, "vframe:progress:abc:failed");
    }

    #[test]
    fn test_mark_modes() {
        assert_eq!(MarkMode::InProcess.as_str(), "in_process");
        assert_eq!(MarkMode::Done.as_str(), "done");
        assert_eq!(MarkMode::Failed.as_str(), "failed");
    }
}
