use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::models::job::{Job, JobFilter, JobPriority, JobStatus};
use crate::services::job_store::StoreError;
use crate::services::lifecycle::{JobController, LifecycleError};
use crate::services::queue::{PendingQueue, QueueError, QueuedJob};

/// Input for a new analysis job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub image_reference: String,
    pub priority: JobPriority,
    pub original_filename: Option<String>,
}

/// Admits jobs, orders them by priority and hands them to workers.
pub struct Dispatcher {
    controller: Arc<JobController>,
    queue: Arc<dyn PendingQueue>,
    notify: Notify,
}

impl Dispatcher {
    pub fn new(controller: Arc<JobController>, queue: Arc<dyn PendingQueue>) -> Self {
        Self {
            controller,
            queue,
            notify: Notify::new(),
        }
    }

    pub fn controller(&self) -> &Arc<JobController> {
        &self.controller
    }

    pub fn queue(&self) -> &Arc<dyn PendingQueue> {
        &self.queue
    }

    /// Parse a priority name, case-insensitively. Missing means `normal`.
    pub fn parse_priority(raw: Option<&str>) -> Result<JobPriority, DispatchError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(JobPriority::Normal),
            Some(name) => JobPriority::from_str(name).map_err(|_| {
                DispatchError::Validation(format!(
                    "Invalid priority '{name}': expected low, normal or high"
                ))
            }),
        }
    }

    /// Create a pending job for `image_reference` and queue it.
    pub async fn submit(&self, image_reference: &str, priority: &str) -> Result<Job, DispatchError> {
        let priority = Self::parse_priority(Some(priority))?;
        self.submit_job(NewJob {
            image_reference: image_reference.to_string(),
            priority,
            original_filename: None,
        })
        .await
    }

    pub async fn submit_job(&self, new_job: NewJob) -> Result<Job, DispatchError> {
        let image_reference = new_job.image_reference.trim();
        if image_reference.is_empty() {
            return Err(DispatchError::Validation(
                "Image reference must not be empty".to_string(),
            ));
        }

        let job = Job::new(
            image_reference,
            new_job.priority,
            new_job.original_filename,
            Utc::now(),
        );
        self.controller.store().insert(&job).await?;
        self.queue.push(QueuedJob::from(&job)).await?;
        self.notify.notify_one();

        metrics::counter!("analysis_jobs_submitted", "priority" => job.priority.to_string())
            .increment(1);
        tracing::info!(
            job_id = %job.id,
            priority = %job.priority,
            image_reference = %job.image_reference,
            "Job submitted"
        );
        Ok(job)
    }

    /// Pop the next pending job without waiting.
    ///
    /// Entries whose job has left `pending` in the meantime are dropped.
    pub async fn dequeue(&self) -> Result<Option<Job>, DispatchError> {
        while let Some(job_id) = self.queue.pop().await? {
            match self.controller.store().get(job_id).await? {
                Some(job) if job.status == JobStatus::Pending => return Ok(Some(job)),
                Some(job) => {
                    tracing::debug!(job_id = %job_id, status = %job.status, "Discarding stale queue entry");
                }
                None => {
                    tracing::warn!(job_id = %job_id, "Queue entry has no job record");
                }
            }
        }
        Ok(None)
    }

    /// Like [`dequeue`](Self::dequeue), but waits up to `timeout` for a
    /// submission when the queue is empty.
    pub async fn wait_for_job(&self, timeout: Duration) -> Result<Option<Job>, DispatchError> {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(job) = self.dequeue().await? {
            return Ok(Some(job));
        }

        let _ = tokio::time::timeout(timeout, notified).await;
        self.dequeue().await
    }

    /// Wait until a job is submitted or `timeout` elapses. Safe to cancel.
    pub async fn wait_for_submission(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }

    /// Cancel a pending job. Returns `false` when it already left `pending`.
    pub async fn cancel(&self, job_id: Uuid) -> Result<bool, DispatchError> {
        match self.controller.cancel(job_id).await {
            Ok(_) => {
                if let Err(e) = self.queue.remove(job_id).await {
                    // dequeue skips the entry anyway
                    tracing::warn!(job_id = %job_id, error = %e, "Failed to drop cancelled job from queue");
                }
                Ok(true)
            }
            Err(LifecycleError::InvalidTransition { status, .. }) => {
                tracing::info!(job_id = %job_id, status = %status, "Cancel refused");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Return an in-flight job to the pending pool and queue it again.
    pub async fn reclaim(&self, job_id: Uuid) -> Result<bool, DispatchError> {
        let changed = self.controller.reclaim(job_id).await?;
        if changed {
            self.requeue(job_id).await?;
        }
        Ok(changed)
    }

    /// Reclaim every `processing` job that started more than `max_age` ago.
    pub async fn reclaim_stale(&self, max_age: Duration) -> Result<Vec<Uuid>, DispatchError> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|_| DispatchError::Validation("Reclaim age out of range".to_string()))?;
        let cutoff = Utc::now() - max_age;

        let processing = self
            .controller
            .store()
            .list(&JobFilter::with_status(JobStatus::Processing))
            .await?;

        let mut reclaimed = Vec::new();
        for job in processing {
            let stale = job.started_at.is_some_and(|started| started < cutoff);
            let Some(worker_id) = job.worker_id.as_deref().filter(|_| stale) else {
                continue;
            };

            match self.controller.reclaim_from(job.id, worker_id).await {
                Ok(true) => {
                    self.requeue(job.id).await?;
                    reclaimed.push(job.id);
                }
                Ok(false) => {}
                // finished between the listing and the reclaim
                Err(LifecycleError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        if !reclaimed.is_empty() {
            tracing::warn!(count = reclaimed.len(), "Reclaimed stale jobs");
        }
        Ok(reclaimed)
    }

    /// Rebuild the pending set from the job store. Run once at startup.
    pub async fn recover(&self) -> Result<usize, DispatchError> {
        let pending = self
            .controller
            .store()
            .list(&JobFilter::with_status(JobStatus::Pending))
            .await?;

        for job in &pending {
            self.queue.push(QueuedJob::from(job)).await?;
        }
        if !pending.is_empty() {
            self.notify.notify_waiters();
        }

        tracing::info!(jobs = pending.len(), "Recovered pending jobs");
        Ok(pending.len())
    }

    pub async fn queue_depth(&self) -> Result<u64, DispatchError> {
        let depth = self.queue.depth().await?;
        metrics::gauge!("analysis_queue_depth").set(depth as f64);
        Ok(depth)
    }

    async fn requeue(&self, job_id: Uuid) -> Result<(), DispatchError> {
        let job = self.controller.get(job_id).await?;
        self.queue.push(QueuedJob::from(&job)).await?;
        self.notify.notify_one();
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::job_store::{JobStore, MemoryJobStore};
    use crate::services::queue::MemoryQueue;

    fn dispatcher() -> Dispatcher {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let controller = Arc::new(JobController::new(store));
        Dispatcher::new(controller, Arc::new(MemoryQueue::new()))
    }

    #[test]
    fn test_parse_priority() {
        assert_eq!(Dispatcher::parse_priority(None).unwrap(), JobPriority::Normal);
        assert_eq!(Dispatcher::parse_priority(Some("")).unwrap(), JobPriority::Normal);
        assert_eq!(Dispatcher::parse_priority(Some("HIGH")).unwrap(), JobPriority::High);
        assert_eq!(Dispatcher::parse_priority(Some(" low ")).unwrap(), JobPriority::Low);
        assert!(matches!(
            Dispatcher::parse_priority(Some("urgent")),
            Err(DispatchError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_validates_input() {
        let dispatcher = dispatcher();
        assert!(matches!(
            dispatcher.submit("  ", "normal").await,
            Err(DispatchError::Validation(_))
        ));
        assert!(matches!(
            dispatcher.submit("uploads/a.png", "asap").await,
            Err(DispatchError::Validation(_))
        ));
        assert_eq!(dispatcher.queue_depth().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dequeue_order_is_priority_then_fifo() {
        let dispatcher = dispatcher();
        let mut submitted = Vec::new();
        for priority in ["low", "high", "normal", "high"] {
            submitted.push(dispatcher.submit("uploads/a.png", priority).await.unwrap());
        }

        let mut order = Vec::new();
        while let Some(job) = dispatcher.dequeue().await.unwrap() {
            order.push(job.id);
        }
        assert_eq!(
            order,
            vec![submitted[1].id, submitted[3].id, submitted[2].id, submitted[0].id]
        );
    }

    #[tokio::test]
    async fn test_cancelled_jobs_are_never_dispatched() {
        let dispatcher = dispatcher();
        let first = dispatcher.submit("uploads/a.png", "normal").await.unwrap();
        let second = dispatcher.submit("uploads/b.png", "normal").await.unwrap();

        assert!(dispatcher.cancel(first.id).await.unwrap());
        let next = dispatcher.dequeue().await.unwrap().unwrap();
        assert_eq!(next.id, second.id);
        assert!(dispatcher.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_in_flight_job_reports_false() {
        let dispatcher = dispatcher();
        let job = dispatcher.submit("uploads/a.png", "normal").await.unwrap();
        dispatcher.controller().claim(job.id, "w1").await.unwrap();

        assert!(!dispatcher.cancel(job.id).await.unwrap());
        let current = dispatcher.controller().get(job.id).await.unwrap();
        assert_eq!(current.status, JobStatus::Processing);

        assert!(matches!(
            dispatcher.cancel(Uuid::new_v4()).await,
            Err(DispatchError::Lifecycle(LifecycleError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_reclaim_requeues_job() {
        let dispatcher = dispatcher();
        let job = dispatcher.submit("uploads/a.png", "normal").await.unwrap();
        let claimed = dispatcher.dequeue().await.unwrap().unwrap();
        dispatcher.controller().claim(claimed.id, "w1").await.unwrap();

        assert!(dispatcher.reclaim(job.id).await.unwrap());
        assert!(!dispatcher.reclaim(job.id).await.unwrap());

        let again = dispatcher.dequeue().await.unwrap().unwrap();
        assert_eq!(again.id, job.id);
        assert_eq!(again.status, JobStatus::Pending);
        assert!(again.worker_id.is_none());
    }

    #[tokio::test]
    async fn test_reclaim_stale_only_touches_old_jobs() {
        let dispatcher = dispatcher();
        let job = dispatcher.submit("uploads/a.png", "normal").await.unwrap();
        dispatcher.dequeue().await.unwrap();
        dispatcher.controller().claim(job.id, "w1").await.unwrap();

        let reclaimed = dispatcher
            .reclaim_stale(Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(reclaimed.is_empty());

        let reclaimed = dispatcher.reclaim_stale(Duration::ZERO).await.unwrap();
        assert_eq!(reclaimed, vec![job.id]);
        assert_eq!(dispatcher.queue_depth().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_recover_rebuilds_pending_set() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let controller = Arc::new(JobController::new(store.clone()));
        let pending = Job::new("uploads/a.png", JobPriority::Low, None, Utc::now());
        let done = Job::new("uploads/b.png", JobPriority::High, None, Utc::now());
        store.insert(&pending).await.unwrap();
        store.insert(&done).await.unwrap();
        controller.cancel(done.id).await.unwrap();

        let dispatcher = Dispatcher::new(controller, Arc::new(MemoryQueue::new()));
        assert_eq!(dispatcher.recover().await.unwrap(), 1);
        assert_eq!(dispatcher.dequeue().await.unwrap().unwrap().id, pending.id);
    }

    #[tokio::test]
    async fn test_wait_for_job_wakes_on_submit() {
        let dispatcher = Arc::new(dispatcher());

        let waiter = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.wait_for_job(Duration::from_secs(5)).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let job = dispatcher.submit("uploads/a.png", "normal").await.unwrap();

        let woken = waiter.await.unwrap().unwrap().unwrap();
        assert_eq!(woken.id, job.id);
    }

    #[tokio::test]
    async fn test_wait_for_job_times_out_when_idle() {
        let dispatcher = dispatcher();
        let job = dispatcher
            .wait_for_job(Duration::from_millis(10))
            .await
            .unwrap();
        assert!(job.is_none());
    }
}
