//! HTTP surface of the agent.

pub mod error;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::archive::{ArchiveOutcome, Archiver, Freshness, SkipReason};
use crate::error::JobError;
use crate::lifecycle::{scalar_text, JobController, JobSpec, SubmitJobRequest};
use crate::scheduler::is_running_state;
use crate::store::JobId;
use crate::telemetry::{self, HostCounters};

pub use error::{ApiError, ErrorBody};

#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<JobController>,
    pub archiver: Arc<Archiver>,
    /// Prefix for download links, without a trailing slash
    pub download_base_url: String,
}

#[derive(Deserialize)]
struct JobIdRequest {
    #[serde(rename = "Job_id", alias = "job_id")]
    job_id: Option<Value>,
}

impl JobIdRequest {
    fn into_job_id(self) -> Result<JobId, JobError> {
        let raw = scalar_text(self.job_id.as_ref())
            .ok_or_else(|| JobError::InvalidRequest("Missing Job_id parameter".to_string()))?;
        JobId::parse(&raw)
    }
}

#[derive(Serialize)]
struct SubmitJobResponse {
    message: String,
    job_id: JobId,
    scheduler_job_id: Option<String>,
    sbatch_output: String,
}

#[derive(Serialize)]
struct CancelJobResponse {
    message: String,
    output: String,
}

#[derive(Serialize)]
struct ZipJobResponse {
    message: String,
    zip_file: Option<String>,
    outcome: &'static str,
}

#[derive(Serialize)]
struct JobStatusResponse {
    #[serde(rename = "jobId")]
    job_id: JobId,
    state: String,
    running: bool,
}

#[derive(Serialize)]
struct JobSummary {
    job_id: JobId,
    modified: DateTime<Utc>,
    archive: Freshness,
    download_url: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    counters: HostCounters,
}

#[derive(Serialize)]
struct UnhealthyResponse {
    status: &'static str,
    message: String,
}

/// Build the agent's router with CORS and request tracing applied.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/submit-job", post(submit_job_handler))
        .route("/cancel-job", post(cancel_job_handler))
        .route("/zip-job", post(zip_job_handler))
        .route("/download/:file", get(download_handler))
        .route("/job-status/:id", get(job_status_handler))
        .route("/jobs", get(list_jobs_handler))
        .route("/connect", get(health_handler))
        .route("/health-check", get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve the router on `addr` until `shutdown` is cancelled.
pub async fn run_server(
    addr: SocketAddr,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "Starting HTTP server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("HTTP server stopped");
    Ok(())
}

async fn submit_job_handler(
    State(state): State<AppState>,
    payload: Result<Json<SubmitJobRequest>, JsonRejection>,
) -> Result<Json<SubmitJobResponse>, ApiError> {
    let Json(payload) = payload?;
    let spec = JobSpec::try_from(payload)?;
    let handle = state.controller.submit(spec).await?;

    Ok(Json(SubmitJobResponse {
        message: format!("Job '{}' submitted successfully", handle.job_id),
        job_id: handle.job_id,
        scheduler_job_id: handle.scheduler_job_id,
        sbatch_output: handle.scheduler_output,
    }))
}

async fn cancel_job_handler(
    State(state): State<AppState>,
    payload: Result<Json<JobIdRequest>, JsonRejection>,
) -> Result<Json<CancelJobResponse>, ApiError> {
    let Json(payload) = payload?;
    let job_id = payload.into_job_id()?;
    let output = state.controller.cancel(&job_id).await?;

    Ok(Json(CancelJobResponse {
        message: format!("Job '{}' canceled successfully", job_id),
        output,
    }))
}

async fn zip_job_handler(
    State(state): State<AppState>,
    payload: Result<Json<JobIdRequest>, JsonRejection>,
) -> Result<Json<ZipJobResponse>, ApiError> {
    let Json(payload) = payload?;
    let job_id = payload.into_job_id()?;
    let outcome = state.archiver.ensure_archive(&job_id).await?;

    let zip_file = job_id.archive_file_name();
    let response = match outcome {
        ArchiveOutcome::Rebuilt => ZipJobResponse {
            message: format!("Job '{}' zipped successfully", job_id),
            zip_file: Some(zip_file),
            outcome: outcome.as_str(),
        },
        ArchiveOutcome::Skipped(SkipReason::Fresh) => ZipJobResponse {
            message: format!("Archive for job '{}' is up to date", job_id),
            zip_file: Some(zip_file),
            outcome: outcome.as_str(),
        },
        ArchiveOutcome::Skipped(SkipReason::Running) => {
            let existing = state
                .archiver
                .index()
                .archive_mtime(&job_id)
                .await
                .map_err(JobError::Io)?;
            ZipJobResponse {
                message: format!("Job '{}' is still running, archive not rebuilt", job_id),
                zip_file: existing.map(|_| zip_file),
                outcome: outcome.as_str(),
            }
        }
    };
    Ok(Json(response))
}

async fn download_handler(
    State(state): State<AppState>,
    Path(file): Path<String>,
) -> Result<Response, ApiError> {
    let not_found = || ApiError(JobError::NotFound(format!("Zip file '{}' not found", file)));

    let job_id = JobId::from_archive_file_name(&file).map_err(|_| not_found())?;
    let path = state.archiver.index().archive_path(&job_id);
    let archive = match tokio::fs::File::open(&path).await {
        Ok(archive) => archive,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(not_found()),
        Err(e) => return Err(JobError::Io(e).into()),
    };
    let len = archive.metadata().await.map_err(JobError::Io)?.len();

    tracing::info!(job_id = %job_id, bytes = len, "Serving archive");
    let headers = [
        (header::CONTENT_TYPE, "application/zip".to_string()),
        (header::CONTENT_LENGTH, len.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", job_id.archive_file_name()),
        ),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(archive))).into_response())
}

async fn job_status_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job_id = JobId::parse(&id)?;
    let job_state = state
        .controller
        .scheduler()
        .query_state(&job_id)
        .await
        .map_err(|e| JobError::Io(std::io::Error::other(e.to_string())))?
        .unwrap_or_else(|| "UNKNOWN".to_string());

    Ok(Json(JobStatusResponse {
        running: is_running_state(&job_state),
        job_id,
        state: job_state,
    }))
}

async fn list_jobs_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<JobSummary>>, ApiError> {
    let index = state.archiver.index();
    let mut jobs = Vec::new();

    for job_id in index.list_jobs().await.map_err(JobError::Io)? {
        // A folder removed mid-listing is simply skipped.
        let Ok(modified) = index.folder_mtime(&job_id).await else {
            continue;
        };
        let archive = match state.archiver.freshness(&job_id).await {
            Ok(freshness) => freshness,
            Err(JobError::NotFound(_)) => continue,
            Err(e) => return Err(e.into()),
        };
        let download_url = (archive != Freshness::Missing).then(|| {
            format!(
                "{}/download/{}",
                state.download_base_url,
                job_id.archive_file_name()
            )
        });
        jobs.push(JobSummary {
            job_id,
            modified: DateTime::<Utc>::from(modified),
            archive,
            download_url,
        });
    }

    Ok(Json(jobs))
}

async fn health_handler() -> Response {
    match telemetry::collect().await {
        Ok(counters) => Json(HealthResponse {
            status: "active",
            counters,
        })
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to collect host counters");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(UnhealthyResponse {
                    status: "inactive",
                    message: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}
