//! Job persistence
//!
//! Spec and metadata are stored as JSON text; timestamps as RFC 3339.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use thesis_common::{Error, Result};
use uuid::Uuid;

use crate::db::settings::get_max_lock_wait_ms;
use crate::models::{JobMetadata, JobState, ThesisJob, ThesisSpec};
use crate::utils::retry_on_lock;

const INTERRUPTED_MESSAGE: &str = "Job interrupted by a worker restart";

/// Insert or update a job
pub async fn save_job(pool: &SqlitePool, job: &ThesisJob) -> Result<()> {
    // Serialize before touching the database
    let job_id = job.job_id.to_string();
    let state = job.state.as_str();
    let spec = serde_json::to_string(&job.spec)?;
    let metadata = serde_json::to_string(&job.metadata)?;
    let created_at = job.created_at.to_rfc3339();
    let updated_at = job.updated_at.to_rfc3339();
    let ended_at = job.ended_at.map(|dt| dt.to_rfc3339());

    let max_wait_ms = get_max_lock_wait_ms(pool).await?;

    retry_on_lock("save_job", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO jobs (job_id, state, spec, metadata, error, created_at, updated_at, ended_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO UPDATE SET
                state = excluded.state,
                metadata = excluded.metadata,
                error = excluded.error,
                updated_at = excluded.updated_at,
                ended_at = excluded.ended_at
            "#,
        )
        .bind(&job_id)
        .bind(state)
        .bind(&spec)
        .bind(&metadata)
        .bind(&job.error)
        .bind(&created_at)
        .bind(&updated_at)
        .bind(&ended_at)
        .execute(pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    })
    .await
}

/// Insert a new job; false when `job_id` is already taken
pub async fn insert_job(pool: &SqlitePool, job: &ThesisJob) -> Result<bool> {
    let job_id = job.job_id.to_string();
    let state = job.state.as_str();
    let spec = serde_json::to_string(&job.spec)?;
    let metadata = serde_json::to_string(&job.metadata)?;
    let created_at = job.created_at.to_rfc3339();
    let updated_at = job.updated_at.to_rfc3339();
    let ended_at = job.ended_at.map(|dt| dt.to_rfc3339());

    let max_wait_ms = get_max_lock_wait_ms(pool).await?;

    retry_on_lock("insert_job", max_wait_ms, || async {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (job_id, state, spec, metadata, error, created_at, updated_at, ended_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(job_id) DO NOTHING
            "#,
        )
        .bind(&job_id)
        .bind(state)
        .bind(&spec)
        .bind(&metadata)
        .bind(&job.error)
        .bind(&created_at)
        .bind(&updated_at)
        .bind(&ended_at)
        .execute(pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() == 1)
    })
    .await
}

pub async fn load_job(pool: &SqlitePool, job_id: Uuid) -> Result<Option<ThesisJob>> {
    let row = sqlx::query(
        r#"
        SELECT job_id, state, spec, metadata, error, created_at, updated_at, ended_at
        FROM jobs
        WHERE job_id = ?
        "#,
    )
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|row| job_from_row(&row)).transpose()
}

/// Most recent jobs first
pub async fn list_jobs(pool: &SqlitePool, limit: i64) -> Result<Vec<ThesisJob>> {
    let rows = sqlx::query(
        r#"
        SELECT job_id, state, spec, metadata, error, created_at, updated_at, ended_at
        FROM jobs
        ORDER BY created_at DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(job_from_row).collect()
}

/// Fail jobs left in a non-terminal state by a previous run
///
/// The pipeline runs in an in-process task; a job that was running when the
/// worker stopped will never progress.
pub async fn cleanup_interrupted_jobs(pool: &SqlitePool) -> Result<usize> {
    let now = Utc::now().to_rfc3339();
    let result = sqlx::query(
        r#"
        UPDATE jobs
        SET state = 'FAILED',
            error = ?,
            updated_at = ?,
            ended_at = ?
        WHERE state NOT IN ('COMPLETED', 'FAILED')
        "#,
    )
    .bind(INTERRUPTED_MESSAGE)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

fn job_from_row(row: &SqliteRow) -> Result<ThesisJob> {
    let job_id: String = row.get("job_id");
    let job_id = Uuid::parse_str(&job_id)
        .map_err(|e| Error::Internal(format!("Failed to parse job_id: {}", e)))?;

    let state: String = row.get("state");
    let state = JobState::parse(&state)
        .ok_or_else(|| Error::Internal(format!("Unknown job state '{}'", state)))?;

    let spec: String = row.get("spec");
    let spec: ThesisSpec = serde_json::from_str(&spec)?;

    let metadata: String = row.get("metadata");
    let metadata: JobMetadata = serde_json::from_str(&metadata)?;

    Ok(ThesisJob {
        job_id,
        state,
        spec,
        metadata,
        error: row.get("error"),
        created_at: parse_timestamp(row.get("created_at"), "created_at")?,
        updated_at: parse_timestamp(row.get("updated_at"), "updated_at")?,
        ended_at: row
            .get::<Option<String>, _>("ended_at")
            .map(|s| parse_timestamp(s, "ended_at"))
            .transpose()?,
    })
}

pub(crate) fn parse_timestamp(value: String, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}
