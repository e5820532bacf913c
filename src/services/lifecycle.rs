//! Job lifecycle state machine.
//!
//! ```text
//! pending ──claim──▶ processing ──complete──▶ completed
//!    │                   │ ▲
//!    │                   │ └──reclaim── (worker presumed dead)
//!    │                   └──fail──────▶ failed
//!    └──cancel──▶ cancelled
//! ```
//!
//! Every write to `status`, `worker_id`, timestamps, `results` and `error`
//! goes through [`Transition::apply`], executed by the job store under its
//! per-job lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::job::{Job, JobStatus};
use crate::models::method_result::ResultSet;
use crate::services::job_store::{JobStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Job {id} is already claimed (status: {status})")]
    AlreadyClaimed { id: Uuid, status: JobStatus },

    #[error("Cannot {action} job {id} while it is {status}")]
    InvalidTransition {
        id: Uuid,
        action: &'static str,
        status: JobStatus,
    },

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),
}

/// A state change request against a single job.
#[derive(Debug, Clone)]
pub enum Transition {
    Claim { worker_id: String },
    /// With `worker_id` set, only the owning worker may record the outcome.
    Complete {
        results: ResultSet,
        worker_id: Option<String>,
    },
    Fail {
        error: String,
        worker_id: Option<String>,
    },
    Cancel,
    /// Return an orphaned job to the pending pool. With `worker_id` set the
    /// reclaim only applies while that worker still owns the job.
    Reclaim { worker_id: Option<String> },
}

impl Transition {
    pub fn action(&self) -> &'static str {
        match self {
            Self::Claim { .. } => "claim",
            Self::Complete { .. } => "complete",
            Self::Fail { .. } => "fail",
            Self::Cancel => "cancel",
            Self::Reclaim { .. } => "reclaim",
        }
    }

    /// Apply the transition in place.
    ///
    /// Returns `Ok(false)` when the request was a permitted no-op (an
    /// idempotent reclaim); the job is then left untouched.
    pub fn apply(&self, job: &mut Job, now: DateTime<Utc>) -> Result<bool, LifecycleError> {
        let invalid = |job: &Job| LifecycleError::InvalidTransition {
            id: job.id,
            action: self.action(),
            status: job.status,
        };

        match self {
            Self::Claim { worker_id } => {
                if job.status != JobStatus::Pending {
                    return Err(LifecycleError::AlreadyClaimed {
                        id: job.id,
                        status: job.status,
                    });
                }
                let started = now.max(job.created_at);
                job.status = JobStatus::Processing;
                job.started_at = Some(started);
                job.worker_id = Some(worker_id.clone());
                job.updated_at = started;
            }
            Self::Complete { results, worker_id } => {
                if !in_flight_for(job, worker_id.as_deref()) {
                    return Err(invalid(job));
                }
                let finished = finish_time(job, now);
                job.status = JobStatus::Completed;
                job.results = Some(results.clone());
                job.error = None;
                job.completed_at = Some(finished);
                job.updated_at = finished;
            }
            Self::Fail { error, worker_id } => {
                if !in_flight_for(job, worker_id.as_deref()) {
                    return Err(invalid(job));
                }
                let finished = finish_time(job, now);
                job.status = JobStatus::Failed;
                job.error = Some(error.clone());
                job.results = None;
                job.completed_at = Some(finished);
                job.updated_at = finished;
            }
            Self::Cancel => {
                if job.status != JobStatus::Pending {
                    return Err(invalid(job));
                }
                let finished = finish_time(job, now);
                job.status = JobStatus::Cancelled;
                job.completed_at = Some(finished);
                job.updated_at = finished;
            }
            Self::Reclaim { worker_id } => match job.status {
                JobStatus::Pending => return Ok(false),
                JobStatus::Processing => {
                    if let Some(expected) = worker_id {
                        if job.worker_id.as_deref() != Some(expected.as_str()) {
                            return Ok(false);
                        }
                    }
                    job.status = JobStatus::Pending;
                    job.worker_id = None;
                    job.started_at = None;
                    job.updated_at = now.max(job.updated_at);
                }
                _ => return Err(invalid(job)),
            },
        }

        Ok(true)
    }
}

/// Whether `job` is processing and, if `worker_id` is given, held by that worker.
fn in_flight_for(job: &Job, worker_id: Option<&str>) -> bool {
    job.status == JobStatus::Processing
        && worker_id.map_or(true, |expected| job.worker_id.as_deref() == Some(expected))
}

/// Terminal timestamps never precede the start (or creation) of the job.
fn finish_time(job: &Job, now: DateTime<Utc>) -> DateTime<Utc> {
    now.max(job.started_at.unwrap_or(job.created_at))
}

/// Job snapshot after a transition request.
#[derive(Debug, Clone)]
pub struct Applied {
    pub job: Job,
    pub changed: bool,
}

/// Single authority for job state changes.
pub struct JobController {
    store: Arc<dyn JobStore>,
}

impl JobController {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Fetch a job snapshot, failing with `NotFound` for unknown ids.
    pub async fn get(&self, job_id: Uuid) -> Result<Job, LifecycleError> {
        self.store
            .get(job_id)
            .await?
            .ok_or(LifecycleError::NotFound(job_id))
    }

    /// `pending → processing`, binding the job to `worker_id`.
    pub async fn claim(&self, job_id: Uuid, worker_id: &str) -> Result<Job, LifecycleError> {
        let applied = self
            .transition(
                job_id,
                Transition::Claim {
                    worker_id: worker_id.to_string(),
                },
            )
            .await?;

        tracing::info!(job_id = %job_id, worker_id = %worker_id, "Job claimed");
        Ok(applied.job)
    }

    /// `processing → completed` with the analysis results.
    pub async fn complete(&self, job_id: Uuid, results: ResultSet) -> Result<Job, LifecycleError> {
        self.complete_with(job_id, None, results).await
    }

    /// Like [`complete`](Self::complete), but rejected unless `worker_id` still owns the job.
    pub async fn complete_as(
        &self,
        job_id: Uuid,
        worker_id: &str,
        results: ResultSet,
    ) -> Result<Job, LifecycleError> {
        self.complete_with(job_id, Some(worker_id.to_string()), results)
            .await
    }

    async fn complete_with(
        &self,
        job_id: Uuid,
        worker_id: Option<String>,
        results: ResultSet,
    ) -> Result<Job, LifecycleError> {
        let methods = results.len();
        let applied = self
            .transition(job_id, Transition::Complete { results, worker_id })
            .await?;

        metrics::counter!("analysis_jobs_completed").increment(1);
        tracing::info!(job_id = %job_id, methods, "Job completed");
        Ok(applied.job)
    }

    /// `processing → failed` with a human-readable description.
    pub async fn fail(&self, job_id: Uuid, error: impl Into<String>) -> Result<Job, LifecycleError> {
        self.fail_with(job_id, None, error.into()).await
    }

    /// Like [`fail`](Self::fail), but rejected unless `worker_id` still owns the job.
    pub async fn fail_as(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: impl Into<String>,
    ) -> Result<Job, LifecycleError> {
        self.fail_with(job_id, Some(worker_id.to_string()), error.into())
            .await
    }

    async fn fail_with(
        &self,
        job_id: Uuid,
        worker_id: Option<String>,
        error: String,
    ) -> Result<Job, LifecycleError> {
        let applied = self
            .transition(
                job_id,
                Transition::Fail {
                    error: error.clone(),
                    worker_id,
                },
            )
            .await?;

        metrics::counter!("analysis_jobs_failed").increment(1);
        tracing::warn!(job_id = %job_id, error = %error, "Job failed");
        Ok(applied.job)
    }

    /// `pending → cancelled`. In-flight jobs cannot be cancelled.
    pub async fn cancel(&self, job_id: Uuid) -> Result<Job, LifecycleError> {
        let applied = self.transition(job_id, Transition::Cancel).await?;

        metrics::counter!("analysis_jobs_cancelled").increment(1);
        tracing::info!(job_id = %job_id, "Job cancelled");
        Ok(applied.job)
    }

    /// `processing → pending` for a job whose worker is presumed dead.
    ///
    /// Returns `false` if the job was already pending.
    pub async fn reclaim(&self, job_id: Uuid) -> Result<bool, LifecycleError> {
        self.reclaim_with(job_id, None).await
    }

    /// Like [`reclaim`](Self::reclaim), but a no-op unless `worker_id` still owns the job.
    pub async fn reclaim_from(&self, job_id: Uuid, worker_id: &str) -> Result<bool, LifecycleError> {
        self.reclaim_with(job_id, Some(worker_id.to_string())).await
    }

    async fn reclaim_with(
        &self,
        job_id: Uuid,
        worker_id: Option<String>,
    ) -> Result<bool, LifecycleError> {
        let applied = self
            .transition(job_id, Transition::Reclaim { worker_id })
            .await?;

        if applied.changed {
            metrics::counter!("analysis_jobs_reclaimed").increment(1);
            tracing::warn!(job_id = %job_id, "Job reclaimed from unresponsive worker");
        }
        Ok(applied.changed)
    }

    async fn transition(
        &self,
        job_id: Uuid,
        transition: Transition,
    ) -> Result<Applied, LifecycleError> {
        let result = self.store.apply(job_id, &transition, Utc::now()).await;
        if let Err(e) = &result {
            tracing::debug!(job_id = %job_id, action = transition.action(), error = %e, "Transition rejected");
        }
        result
    }
}
