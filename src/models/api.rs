use chrono::{DateTime, Utc};
use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::{JobPriority, JobStatus};
use crate::services::engine::EncodeMethod;

/// Default page size for job listings.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Response after queueing an image for background analysis.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub created_at: DateTime<Utc>,
}

/// Query string for `GET /api/v1/jobs`.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct ListJobsQuery {
    #[garde(skip)]
    pub status: Option<String>,

    #[garde(range(min = 1, max = 100))]
    pub limit: Option<usize>,

    #[garde(skip)]
    pub offset: Option<usize>,
}

/// Response for a cancellation attempt.
///
/// `success` is false when the job had already left `pending`; `status` is the
/// job's status after the attempt.
#[derive(Debug, Serialize, Deserialize)]
pub struct CancelJobResponse {
    pub job_id: Uuid,
    pub success: bool,
    pub status: JobStatus,
}

/// Validated form of `POST /api/v1/analysis/encode`.
#[derive(Debug, Validate)]
pub struct EncodeRequest {
    #[garde(length(min = 1, max = 4096))]
    pub message: String,

    #[garde(skip)]
    pub method: EncodeMethod,
}

/// Response after embedding a message into an image.
#[derive(Debug, Serialize, Deserialize)]
pub struct EncodeResponse {
    pub message: String,
    pub filename: String,
}
