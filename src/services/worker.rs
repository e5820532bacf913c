use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::job::{Job, JobStatus};
use crate::models::method_result::{Method, ResultSet};
use crate::services::dispatcher::{DispatchError, Dispatcher};
use crate::services::engine::Analyzer;
use crate::services::lifecycle::LifecycleError;
use crate::services::storage::ImageStore;

/// Outcome of one [`Worker::process_next`] call.
#[derive(Debug)]
pub enum Processed {
    /// Nothing was pending.
    Idle,
    /// Another worker claimed the job first.
    Skipped(Uuid),
    /// The job reached `completed` or `failed`.
    Finished(Job),
}

/// Executes analysis jobs one at a time. Never retries; a job whose worker
/// disappears is returned to the queue by the reaper.
pub struct Worker {
    id: String,
    dispatcher: Arc<Dispatcher>,
    images: Arc<dyn ImageStore>,
    engine: Arc<dyn Analyzer>,
    idle_wait: Duration,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        dispatcher: Arc<Dispatcher>,
        images: Arc<dyn ImageStore>,
        engine: Arc<dyn Analyzer>,
        idle_wait: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            dispatcher,
            images,
            engine,
            idle_wait,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Dequeue, claim and run the next pending job.
    pub async fn process_next(&self) -> Result<Processed, WorkerError> {
        let Some(job) = self.dispatcher.dequeue().await? else {
            return Ok(Processed::Idle);
        };

        let claimed = match self.dispatcher.controller().claim(job.id, &self.id).await {
            Ok(job) => job,
            Err(LifecycleError::AlreadyClaimed { .. } | LifecycleError::NotFound(_)) => {
                return Ok(Processed::Skipped(job.id));
            }
            Err(e) => return Err(e.into()),
        };

        self.run(&claimed).await.map(Processed::Finished)
    }

    /// Run a job this worker has claimed and record exactly one outcome.
    pub async fn run(&self, job: &Job) -> Result<Job, WorkerError> {
        if job.status != JobStatus::Processing || job.worker_id.as_deref() != Some(self.id.as_str()) {
            return Err(WorkerError::NotOwned {
                id: job.id,
                status: job.status,
            });
        }

        tracing::info!(job_id = %job.id, worker_id = %self.id, image = %job.image_reference, "Processing analysis job");
        let start = Instant::now();

        let controller = self.dispatcher.controller();
        let recorded = match self.analyze(job).await {
            Ok(results) => controller
                .complete_as(job.id, &self.id, results)
                .await
                .map(|job| (job, "completed")),
            Err(error) => controller
                .fail_as(job.id, &self.id, error)
                .await
                .map(|job| (job, "failed")),
        };

        let (finished, outcome) = match recorded {
            Ok(recorded) => recorded,
            Err(LifecycleError::InvalidTransition { status, .. }) => {
                tracing::warn!(
                    job_id = %job.id,
                    worker_id = %self.id,
                    status = %status,
                    "Job was reclaimed while running, discarding outcome"
                );
                metrics::histogram!("analysis_processing_seconds", "outcome" => "discarded")
                    .record(start.elapsed().as_secs_f64());
                return Err(WorkerError::Superseded { id: job.id });
            }
            Err(e) => return Err(e.into()),
        };

        metrics::histogram!("analysis_processing_seconds", "outcome" => outcome)
            .record(start.elapsed().as_secs_f64());
        Ok(finished)
    }

    /// Load the image and run every analysis method on the blocking pool.
    async fn analyze(&self, job: &Job) -> Result<ResultSet, String> {
        let bytes = self
            .images
            .get(&job.image_reference)
            .await
            .map_err(|e| format!("Failed to load image: {e}"))?;

        let engine = self.engine.clone();
        let raw = tokio::task::spawn_blocking(move || engine.analyze(&bytes, &Method::all()))
            .await
            .map_err(|e| format!("Analysis task aborted: {e}"))?
            .map_err(|e| e.to_string())?;

        Ok(ResultSet::from_raw(raw))
    }

    /// Process jobs until `shutdown` fires. A job already running is
    /// finished before the loop exits.
    pub async fn run_loop(&self, shutdown: CancellationToken) {
        tracing::info!(worker_id = %self.id, "Worker started");

        while !shutdown.is_cancelled() {
            match self.process_next().await {
                Ok(Processed::Finished(_)) | Ok(Processed::Skipped(_)) => continue,
                Ok(Processed::Idle) => {}
                Err(e) => {
                    tracing::error!(worker_id = %self.id, error = %e, "Error processing job");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.dispatcher.wait_for_submission(self.idle_wait) => {}
            }
        }

        tracing::info!(worker_id = %self.id, "Worker stopped");
    }
}

/// Periodically return jobs stuck in `processing` to the queue.
pub async fn run_reaper(
    dispatcher: Arc<Dispatcher>,
    max_age: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) {
    tracing::info!(
        max_age_secs = max_age.as_secs(),
        interval_secs = interval.as_secs(),
        "Reaper started"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        if let Err(e) = dispatcher.reclaim_stale(max_age).await {
            tracing::error!(error = %e, "Failed to reclaim stale jobs");
        }
        if let Err(e) = dispatcher.queue_depth().await {
            tracing::warn!(error = %e, "Failed to read queue depth");
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Job {id} is not held by this worker (status: {status})")]
    NotOwned { id: Uuid, status: JobStatus },

    #[error("Job {id} was reclaimed before this worker finished")]
    Superseded { id: Uuid },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}
