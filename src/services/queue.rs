use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::job::{Job, JobPriority};

const QUEUE_KEY: &str = "stegnox:pending_jobs";

/// Width of one priority band in the Redis score; larger than any
/// millisecond timestamp we will see.
const PRIORITY_BAND: f64 = 1e13;

/// Entry in the pending set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedJob {
    pub job_id: Uuid,
    pub priority: JobPriority,
    pub created_at: DateTime<Utc>,
}

impl From<&Job> for QueuedJob {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            priority: job.priority,
            created_at: job.created_at,
        }
    }
}

/// Priority-ordered set of pending job ids.
///
/// `pop` returns the highest priority entry, oldest `created_at` first within
/// a priority, and removes it so no two consumers can receive the same id.
/// `push` is idempotent per job id.
#[async_trait]
pub trait PendingQueue: Send + Sync {
    async fn push(&self, entry: QueuedJob) -> Result<(), QueueError>;

    async fn pop(&self) -> Result<Option<Uuid>, QueueError>;

    /// Drop an entry, e.g. after cancellation. Returns whether it was queued.
    async fn remove(&self, job_id: Uuid) -> Result<bool, QueueError>;

    async fn depth(&self) -> Result<u64, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

type QueueKey = (Reverse<JobPriority>, DateTime<Utc>, u64);

#[derive(Default)]
struct PendingSet {
    order: BTreeMap<QueueKey, Uuid>,
    index: HashMap<Uuid, QueueKey>,
    seq: u64,
}

/// In-process pending set for single-process deployments.
#[derive(Default)]
pub struct MemoryQueue {
    inner: Mutex<PendingSet>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PendingQueue for MemoryQueue {
    async fn push(&self, entry: QueuedJob) -> Result<(), QueueError> {
        let mut set = self.inner.lock().await;
        if set.index.contains_key(&entry.job_id) {
            return Ok(());
        }
        set.seq += 1;
        let key = (Reverse(entry.priority), entry.created_at, set.seq);
        set.order.insert(key, entry.job_id);
        set.index.insert(entry.job_id, key);
        Ok(())
    }

    async fn pop(&self) -> Result<Option<Uuid>, QueueError> {
        let mut set = self.inner.lock().await;
        let Some((_, job_id)) = set.order.pop_first() else {
            return Ok(None);
        };
        set.index.remove(&job_id);
        Ok(Some(job_id))
    }

    async fn remove(&self, job_id: Uuid) -> Result<bool, QueueError> {
        let mut set = self.inner.lock().await;
        match set.index.remove(&job_id) {
            Some(key) => {
                set.order.remove(&key);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.inner.lock().await.order.len() as u64)
    }
}

/// Redis-backed pending set (sorted set), shared by every worker process.
///
/// Scores place each priority in its own band and order by creation time
/// inside the band; `ZPOPMIN` makes the pop exclusive.
pub struct RedisQueue {
    client: redis::Client,
}

impl RedisQueue {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self { client })
    }

    fn score(entry: &QueuedJob) -> f64 {
        let band = match entry.priority {
            JobPriority::High => 0.0,
            JobPriority::Normal => 1.0,
            JobPriority::Low => 2.0,
        };
        band * PRIORITY_BAND + entry.created_at.timestamp_millis() as f64
    }
}

#[async_trait]
impl PendingQueue for RedisQueue {
    async fn push(&self, entry: QueuedJob) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        // NX keeps the original position when a job is pushed twice
        redis::cmd("ZADD")
            .arg(QUEUE_KEY)
            .arg("NX")
            .arg(Self::score(&entry))
            .arg(entry.job_id.to_string())
            .query_async::<i64>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn pop(&self) -> Result<Option<Uuid>, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let popped: Vec<(String, f64)> = conn
            .zpopmin(QUEUE_KEY, 1)
            .await
            .map_err(QueueError::Redis)?;

        match popped.into_iter().next() {
            Some((member, _score)) => {
                let job_id = Uuid::parse_str(&member)
                    .map_err(|_| QueueError::InvalidEntry(member.clone()))?;
                Ok(Some(job_id))
            }
            None => Ok(None),
        }
    }

    async fn remove(&self, job_id: Uuid) -> Result<bool, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let removed: i64 = conn
            .zrem(QUEUE_KEY, job_id.to_string())
            .await
            .map_err(QueueError::Redis)?;
        Ok(removed > 0)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        let depth: u64 = conn.zcard(QUEUE_KEY).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    /// Check Redis connectivity (for health checks).
    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(QueueError::Redis)?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Invalid queue entry: {0}")]
    InvalidEntry(String),
}
