use std::str::FromStr;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::api::{CancelJobResponse, ListJobsQuery, SubmitJobResponse, DEFAULT_PAGE_SIZE};
use crate::models::job::{Job, JobFilter, JobStatus};
use crate::routes::error::{ApiError, ApiResult};
use crate::routes::upload::{extension, UploadForm};
use crate::services::dispatcher::{Dispatcher, NewJob};

fn parse_job_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("Invalid job id: {raw}")))
}

/// POST /api/v1/jobs: upload an image and queue it for analysis.
pub async fn create_job(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let form = UploadForm::read(multipart).await?;
    let (upload, format) = form.image()?;
    let priority = Dispatcher::parse_priority(form.field("priority"))?;

    let key = format!("uploads/{}.{}", Uuid::new_v4(), extension(format));
    state
        .images
        .put(&key, &upload.data, format.to_mime_type())
        .await?;

    let submitted = state
        .dispatcher
        .submit_job(NewJob {
            image_reference: key.clone(),
            priority,
            original_filename: upload.filename.clone(),
        })
        .await;

    let job = match submitted {
        Ok(job) => job,
        Err(e) => {
            if let Err(cleanup) = state.images.delete(&key).await {
                tracing::warn!(key = %key, error = %cleanup, "Failed to remove orphaned upload");
            }
            return Err(e.into());
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(SubmitJobResponse {
            job_id: job.id,
            status: job.status,
            priority: job.priority,
            created_at: job.created_at,
        }),
    ))
}

/// GET /api/v1/jobs: newest first, optionally filtered by status.
pub async fn list_jobs(
    State(state): State<AppState>,
    query: Result<Query<ListJobsQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Job>>> {
    let Query(query) = query.map_err(|e| ApiError::Validation(e.body_text()))?;
    query.validate()?;

    let status = query
        .status
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            JobStatus::from_str(s)
                .map_err(|_| ApiError::Validation(format!("Unknown job status: {s}")))
        })
        .transpose()?;

    let filter = JobFilter {
        status,
        limit: Some(query.limit.unwrap_or(DEFAULT_PAGE_SIZE)),
        offset: query.offset.unwrap_or(0),
    };

    let jobs = state
        .controller()
        .store()
        .list(&filter)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(jobs))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<Job>> {
    let job_id = parse_job_id(&job_id)?;
    let job = state.controller().get(job_id).await?;
    Ok(Json(job))
}

/// DELETE /api/v1/jobs/{id}: cancel a pending job.
///
/// A job that already left `pending` is reported with `success: false`.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<CancelJobResponse>> {
    let job_id = parse_job_id(&job_id)?;
    let success = state.dispatcher.cancel(job_id).await?;
    let job = state.controller().get(job_id).await?;

    Ok(Json(CancelJobResponse {
        job_id,
        success,
        status: job.status,
    }))
}
