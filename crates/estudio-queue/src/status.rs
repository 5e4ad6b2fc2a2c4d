//! Job status store for polling and stale detection.
//!
//! Status snapshots live in Redis so the UI can poll without touching the
//! queue. A periodic sweep marks entries whose worker heartbeat lapsed.

use redis::AsyncCommands;
use tracing::{debug, warn};

use estudio_models::{JobId, JobStatusCache};

use crate::error::QueueResult;

/// TTL for status entries (24 hours).
pub const JOB_STATUS_TTL_SECS: u64 = 86_400;

/// Heartbeat age after which a processing job counts as stale.
pub const STALE_THRESHOLD_SECS: i64 = 120;

/// Grace period for jobs that never sent a heartbeat.
pub const STALE_GRACE_PERIOD_SECS: i64 = 300;

/// Redis-backed store for [`JobStatusCache`] snapshots.
pub struct JobStatusStore {
    client: redis::Client,
}

impl JobStatusStore {
    /// Create a new status store.
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    /// Key for a job's status entry.
    pub fn status_key(job_id: &str) -> String {
        format!("estudio:status:{job_id}")
    }

    /// Write a status snapshot.
    pub async fn put(&self, status: &JobStatusCache) -> QueueResult<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(status)?;
        conn.set_ex::<_, _, ()>(Self::status_key(&status.job_id), payload, JOB_STATUS_TTL_SECS)
            .await?;
        Ok(())
    }

    /// Read a status snapshot.
    pub async fn get(&self, job_id: &JobId) -> QueueResult<Option<JobStatusCache>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = conn.get(Self::status_key(job_id.as_str())).await?;

        match payload {
            Some(json) => match serde_json::from_str(&json) {
                Ok(status) => Ok(Some(status)),
                Err(e) => {
                    warn!("Corrupt status entry for {}: {}", job_id, e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Read-modify-write a status snapshot.
    ///
    /// Single-writer per job (the owning worker), so the read-modify-write
    /// window is not contended in practice.
    pub async fn modify<F>(&self, job_id: &JobId, mutate: F) -> QueueResult<bool>
    where
        F: FnOnce(&mut JobStatusCache),
    {
        match self.get(job_id).await? {
            Some(mut status) => {
                mutate(&mut status);
                self.put(&status).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Record a worker heartbeat.
    pub async fn heartbeat(&self, job_id: &JobId) -> QueueResult<bool> {
        self.modify(job_id, |status| status.record_heartbeat()).await
    }

    /// Sweep all status entries and mark lapsed ones stale.
    ///
    /// Returns the number of entries marked. Terminal entries are never
    /// touched.
    pub async fn scan_stale(&self) -> QueueResult<u64> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;

        let keys: Vec<String> = {
            let mut iter = conn.scan_match::<_, String>("estudio:status:*").await?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let mut marked = 0u64;

        for key in keys {
            let payload: Option<String> = conn.get(&key).await?;
            let Some(json) = payload else { continue };
            let Ok(mut status) = serde_json::from_str::<JobStatusCache>(&json) else {
                warn!("Corrupt status entry at {}", key);
                continue;
            };

            if status.is_stale(STALE_THRESHOLD_SECS, STALE_GRACE_PERIOD_SECS) {
                status.mark_stale();
                let updated = serde_json::to_string(&status)?;
                conn.set_ex::<_, _, ()>(&key, updated, JOB_STATUS_TTL_SECS).await?;
                marked += 1;
                debug!("Marked stale: {}", key);
            }
        }

        Ok(marked)
    }
}
