use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::models::job::{Job, JobFilter};
use crate::services::lifecycle::{Applied, LifecycleError, Transition};

/// Durable keyed record of jobs.
///
/// `apply` must run the transition atomically with respect to any other
/// transition on the same job. Jobs are independent, so implementations
/// should not serialize writes across different ids.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: &Job) -> Result<(), StoreError>;

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Jobs matching `filter`, newest first.
    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError>;

    async fn apply(
        &self,
        job_id: Uuid,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<Applied, LifecycleError>;

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// In-process job store with an optional JSON snapshot file.
///
/// Each job sits behind its own mutex; the outer map lock is only held to
/// look entries up or insert new ones.
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Arc<Mutex<Job>>>>,
    snapshot_path: Option<PathBuf>,
    persist_lock: Mutex<()>,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    /// Volatile store, used by tests and single-shot tools.
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            snapshot_path: None,
            persist_lock: Mutex::new(()),
        }
    }

    /// Open a store persisted at `path`, loading any existing snapshot.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut jobs = HashMap::new();

        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let saved: Vec<Job> = serde_json::from_slice(&bytes)?;
                for job in saved {
                    jobs.insert(job.id, Arc::new(Mutex::new(job)));
                }
                tracing::info!(path = %path.display(), jobs = jobs.len(), "Loaded job snapshot");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No job snapshot found, starting empty");
            }
            Err(e) => return Err(StoreError::Io(e)),
        }

        Ok(Self {
            jobs: RwLock::new(jobs),
            snapshot_path: Some(path),
            persist_lock: Mutex::new(()),
        })
    }

    async fn entry(&self, job_id: Uuid) -> Option<Arc<Mutex<Job>>> {
        self.jobs.read().await.get(&job_id).cloned()
    }

    async fn snapshot(&self) -> Vec<Job> {
        let entries: Vec<Arc<Mutex<Job>>> = self.jobs.read().await.values().cloned().collect();
        let mut jobs = Vec::with_capacity(entries.len());
        for entry in entries {
            jobs.push(entry.lock().await.clone());
        }
        jobs
    }

    /// Write the full snapshot. Never called while a job lock is held.
    async fn persist(&self) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };

        let _guard = self.persist_lock.lock().await;
        let mut jobs = self.snapshot().await;
        jobs.sort_by_key(|job| (job.created_at, job.id));

        let body = serde_json::to_vec_pretty(&jobs)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        {
            let mut jobs = self.jobs.write().await;
            if jobs.contains_key(&job.id) {
                return Err(StoreError::Duplicate(job.id));
            }
            jobs.insert(job.id, Arc::new(Mutex::new(job.clone())));
        }

        if let Err(e) = self.persist().await {
            self.jobs.write().await.remove(&job.id);
            return Err(e);
        }
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        match self.entry(job_id).await {
            Some(entry) => Ok(Some(entry.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|job| filter.matches(job))
            .collect();

        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let page = jobs.into_iter().skip(filter.offset);
        Ok(match filter.limit {
            Some(limit) => page.take(limit).collect(),
            None => page.collect(),
        })
    }

    async fn apply(
        &self,
        job_id: Uuid,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<Applied, LifecycleError> {
        let entry = self
            .entry(job_id)
            .await
            .ok_or(LifecycleError::NotFound(job_id))?;

        let (before, job, changed) = {
            let mut job = entry.lock().await;
            let before = job.clone();
            let changed = transition.apply(&mut job, now)?;
            (before, job.clone(), changed)
        };

        if changed {
            if let Err(e) = self.persist().await {
                // a later transition that already persisted keeps its state
                let mut current = entry.lock().await;
                if *current == job {
                    *current = before;
                }
                tracing::error!(job_id = %job_id, action = transition.action(), error = %e, "Snapshot write failed, transition rolled back");
                return Err(e.into());
            }
        }
        Ok(Applied { job, changed })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Job {0} already exists")]
    Duplicate(Uuid),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Corrupt job record: {0}")]
    Corrupt(String),
}
