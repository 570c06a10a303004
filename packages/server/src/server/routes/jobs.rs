//! Job lifecycle endpoints.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use niche_discovery::{Estimate, JobConfig, JobId, JobStatus, JobSummary};
use serde::{Deserialize, Serialize};

use crate::server::app::AppState;
use crate::server::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub project_id: String,
    pub config: JobConfig,
}

#[derive(Debug, Serialize)]
pub struct CreateJobResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub estimate: Estimate,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    #[serde(flatten)]
    pub summary: JobSummary,
    pub running: bool,
}

#[derive(Debug, Serialize)]
pub struct JobStatusChange {
    pub job_id: JobId,
    pub status: JobStatus,
}

/// POST /api/estimate
pub async fn estimate_handler(
    Extension(state): Extension<AppState>,
    Json(config): Json<JobConfig>,
) -> ApiResult<Json<Estimate>> {
    Ok(Json(state.pipeline.estimate(&config)?))
}

/// POST /api/jobs
pub async fn create_job_handler(
    Extension(state): Extension<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> ApiResult<(StatusCode, Json<CreateJobResponse>)> {
    if request.project_id.trim().is_empty() {
        return Err(ApiError::BadRequest("project_id is required".to_string()));
    }

    let job = state
        .pipeline
        .create_job(request.project_id, request.config)
        .await?;
    let estimate = state.pipeline.estimate(&job.config)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateJobResponse {
            job_id: job.id,
            status: job.status,
            estimate,
        }),
    ))
}

/// GET /api/jobs/:id
///
/// Reconciles stalled statuses and recomputes counters before reading.
pub async fn job_status_handler(
    Extension(state): Extension<AppState>,
    Path(job_id): Path<JobId>,
) -> ApiResult<Json<JobStatusResponse>> {
    state.pipeline.reconcile(job_id).await?;
    state.pipeline.refresh_counters(job_id).await?;
    let summary = state.results.job_summary(job_id).await?;

    Ok(Json(JobStatusResponse {
        summary,
        running: state.pipeline.is_running(job_id),
    }))
}

/// POST /api/jobs/:id/run
///
/// Starts the pipeline in a background task and returns immediately.
pub async fn run_job_handler(
    Extension(state): Extension<AppState>,
    Path(job_id): Path<JobId>,
) -> ApiResult<(StatusCode, Json<JobStatusChange>)> {
    let job = state.pipeline.get_job(job_id).await?;
    if state.pipeline.is_running(job_id) {
        return Err(ApiError::Conflict(format!("job {job_id} is already running")));
    }
    if job.status.is_terminal() {
        return Err(ApiError::Conflict(format!(
            "job {job_id} is {}; resume it before running",
            job.status
        )));
    }

    let pipeline = state.pipeline.clone();
    tokio::spawn(async move {
        match pipeline.run(job_id).await {
            Ok(outcome) => {
                tracing::info!(job_id = %job_id, status = %outcome.status, "background run finished")
            }
            Err(e) => tracing::error!(job_id = %job_id, error = %e, "background run failed"),
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(JobStatusChange {
            job_id,
            status: job.status,
        }),
    ))
}

/// POST /api/jobs/:id/cancel
pub async fn cancel_job_handler(
    Extension(state): Extension<AppState>,
    Path(job_id): Path<JobId>,
) -> ApiResult<Json<JobStatusChange>> {
    let status = state.pipeline.cancel(job_id).await?;
    Ok(Json(JobStatusChange { job_id, status }))
}

/// POST /api/jobs/:id/resume
///
/// Re-opens a terminal job at its checkpoint. `run` continues it.
pub async fn resume_job_handler(
    Extension(state): Extension<AppState>,
    Path(job_id): Path<JobId>,
) -> ApiResult<Json<JobStatusChange>> {
    let status = state.pipeline.resume(job_id).await?;
    Ok(Json(JobStatusChange { job_id, status }))
}
