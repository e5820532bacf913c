use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{Job, JobFilter, JobPriority, JobStatus};
use crate::models::method_result::ResultSet;
use crate::services::job_store::{JobStore, StoreError};
use crate::services::lifecycle::{Applied, LifecycleError, Transition};

/// Job store backed by the `analysis_jobs` table.
///
/// Transitions lock the row with `SELECT ... FOR UPDATE`, so concurrent
/// workers in different processes serialize per job.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let status: String = row.try_get("status")?;
    let status = JobStatus::from_str(&status)
        .map_err(|_| StoreError::Corrupt(format!("unknown status '{status}'")))?;

    let priority: String = row.try_get("priority")?;
    let priority = JobPriority::from_str(&priority)
        .map_err(|_| StoreError::Corrupt(format!("unknown priority '{priority}'")))?;

    let results = match row.try_get::<Option<serde_json::Value>, _>("results")? {
        None => None,
        Some(serde_json::Value::Object(raw)) => Some(ResultSet::from_raw(raw)),
        Some(other) => {
            return Err(StoreError::Corrupt(format!(
                "results must be an object, got {other}"
            )))
        }
    };

    Ok(Job {
        id: row.try_get("id")?,
        status,
        priority,
        image_reference: row.try_get("image_reference")?,
        original_filename: row.try_get("original_filename")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        worker_id: row.try_get("worker_id")?,
        results,
        error: row.try_get("error")?,
    })
}

fn results_json(job: &Job) -> Option<serde_json::Value> {
    job.results
        .as_ref()
        .map(|results| serde_json::Value::Object(results.to_raw()))
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: &Job) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO analysis_jobs
                (id, status, priority, image_reference, original_filename, created_at,
                 updated_at, started_at, completed_at, worker_id, results, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(job.id)
        .bind(job.status.as_ref())
        .bind(job.priority.as_ref())
        .bind(&job.image_reference)
        .bind(&job.original_filename)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(&job.worker_id)
        .bind(results_json(job))
        .bind(&job.error)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::Duplicate(job.id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, status, priority, image_reference, original_filename, created_at,
                   updated_at, started_at, completed_at, worker_id, results, error
            FROM analysis_jobs
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, status, priority, image_reference, original_filename, created_at,
                   updated_at, started_at, completed_at, worker_id, results, error
            FROM analysis_jobs
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY created_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(filter.status.map(|status| status.to_string()))
        .bind(filter.limit.map(|limit| limit as i64))
        .bind(filter.offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(job_from_row).collect()
    }

    async fn apply(
        &self,
        job_id: Uuid,
        transition: &Transition,
        now: DateTime<Utc>,
    ) -> Result<Applied, LifecycleError> {
        let db = |e: sqlx::Error| LifecycleError::Store(StoreError::Database(e));

        let mut tx = self.pool.begin().await.map_err(db)?;

        let row = sqlx::query(
            r#"
            SELECT id, status, priority, image_reference, original_filename, created_at,
                   updated_at, started_at, completed_at, worker_id, results, error
            FROM analysis_jobs
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db)?
        .ok_or(LifecycleError::NotFound(job_id))?;

        let mut job = job_from_row(&row)?;
        let changed = transition.apply(&mut job, now)?;

        if changed {
            sqlx::query(
                r#"
                UPDATE analysis_jobs
                SET status = $2,
                    updated_at = $3,
                    started_at = $4,
                    completed_at = $5,
                    worker_id = $6,
                    results = $7,
                    error = $8
                WHERE id = $1
                "#,
            )
            .bind(job.id)
            .bind(job.status.as_ref())
            .bind(job.updated_at)
            .bind(job.started_at)
            .bind(job.completed_at)
            .bind(&job.worker_id)
            .bind(results_json(&job))
            .bind(&job.error)
            .execute(&mut *tx)
            .await
            .map_err(db)?;
        }

        tx.commit().await.map_err(db)?;
        Ok(Applied { job, changed })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
