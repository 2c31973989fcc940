//! Job submission and status handlers
//!
//! POST /jobs, GET /jobs, GET /jobs/:id, GET /jobs/:id/document, GET /jobs/:id/audit

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::audit::AuditEntry;
use crate::error::{ApiError, ApiResult};
use crate::models::{JobMetadata, JobState, ThesisJob, ThesisSpec};
use crate::services::SchedulerError;
use crate::AppState;

const DEFAULT_LIST_LIMIT: i64 = 50;

/// POST /jobs request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitJobRequest {
    /// Caller-chosen id; generated when absent
    #[serde(default, alias = "job_id")]
    pub job_id: Option<Uuid>,
    pub spec: ThesisSpec,
}

/// POST /jobs response
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitJobResponse {
    pub job_id: Uuid,
    pub status: String,
}

/// GET /jobs/:id response
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobState,
    pub metadata: JobMetadata,
    pub error: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub ended_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<ThesisJob> for JobStatusResponse {
    fn from(job: ThesisJob) -> Self {
        Self {
            job_id: job.job_id,
            status: job.state,
            metadata: job.metadata,
            error: job.error,
            created_at: job.created_at,
            updated_at: job.updated_at,
            ended_at: job.ended_at,
        }
    }
}

/// GET /jobs/:id/document response
#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub job_id: Uuid,
    pub markdown: String,
    pub bibliography: String,
    pub word_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::Duplicate(_) | SchedulerError::Closed => ApiError::Conflict(err.to_string()),
            SchedulerError::Persistence(e) => ApiError::Common(e),
        }
    }
}

/// POST /jobs
///
/// Validates the spec, persists the job as QUEUED and returns 202 Accepted.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<(StatusCode, Json<SubmitJobResponse>)> {
    let request: SubmitJobRequest = serde_json::from_value(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid job request: {}", e)))?;

    request
        .spec
        .validate()
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let job = ThesisJob::new(request.job_id.unwrap_or_else(Uuid::new_v4), request.spec);
    let job_id = state.scheduler.submit(job).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitJobResponse {
            job_id,
            status: "queued".to_string(),
        }),
    ))
}

/// GET /jobs
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<JobStatusResponse>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 500);
    let jobs = crate::db::jobs::list_jobs(&state.db, limit).await?;
    Ok(Json(jobs.into_iter().map(JobStatusResponse::from).collect()))
}

/// GET /jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job = crate::db::jobs::load_job(&state.db, job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))?;
    Ok(Json(job.into()))
}

/// GET /jobs/:id/document
///
/// 409 until the job has completed.
pub async fn get_document(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<DocumentResponse>> {
    let job = crate::db::jobs::load_job(&state.db, job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Job not found: {}", job_id)))?;

    if job.state != JobState::Completed {
        return Err(ApiError::Conflict(format!(
            "Job {} is {}, document not available",
            job_id, job.state
        )));
    }

    let document = crate::db::documents::load_document(&state.db, job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Document not found for job {}", job_id)))?;

    Ok(Json(DocumentResponse {
        job_id,
        markdown: document.markdown,
        bibliography: document.bibliography,
        word_count: document.word_count,
    }))
}

/// GET /jobs/:id/audit
pub async fn get_audit(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<Vec<AuditEntry>>> {
    if crate::db::jobs::load_job(&state.db, job_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("Job not found: {}", job_id)));
    }
    Ok(Json(crate::db::audit::load_audit(&state.db, job_id).await?))
}

/// Build job routes
pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/:job_id", get(get_job))
        .route("/jobs/:job_id/document", get(get_document))
        .route("/jobs/:job_id/audit", get(get_audit))
}
