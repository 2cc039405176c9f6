//! HTTP Handlers: health, jobs, content and credits

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use recap_core::{CreditLedger, Job, JobId, JobStatus, JobStore, PhotoRefs};
use recap_payments::Provider;

use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub llm_provider: String,
    pub llm_connected: bool,
    pub payment_providers: Vec<Provider>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub user_id: String,
    pub user_photo_ref: String,
    pub friend_photo_ref: String,
    #[serde(default)]
    pub archive_ref: Option<String>,

    /// Start the pipeline right away when an archive is attached
    #[serde(default = "default_true")]
    pub process: bool,
}

const fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobResponse {
    pub job_id: JobId,
    pub ephemeral: bool,

    /// Balance left after this job
    pub credits: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    pub job_id: String,
    #[serde(default)]
    pub archive_ref: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListResponse {
    pub user_id: String,
    pub jobs: Vec<Job>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditsResponse {
    pub user_id: String,
    pub credits: u64,
}

/// Turn a JSON extractor rejection into our error body
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::Validation(rejection.body_text()))
}

fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    Ok(JobId::parse(raw)?)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// ============================================================================
// Health
// ============================================================================

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let llm_connected = state.provider.health_check().await.unwrap_or(false);

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        llm_provider: state.provider.info().name,
        llm_connected,
        payment_providers: state.gateways.providers(),
    })
}

// ============================================================================
// Jobs
// ============================================================================

/// Create a job, debiting one credit or falling back to a free trial
pub async fn create_job(
    State(state): State<AppState>,
    payload: Result<Json<CreateJobRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<CreateJobResponse>), ApiError> {
    let request = json_body(payload)?;
    let user_id = request.user_id.trim();
    if user_id.is_empty() {
        return Err(ApiError::Validation("userId is required".into()));
    }

    let photos = PhotoRefs {
        user_pic: request.user_photo_ref,
        friend_pic: request.friend_photo_ref,
    };

    let (job, ephemeral, credits) = open_job(
        state.ledger.as_ref(),
        state.jobs.as_ref(),
        user_id,
        photos,
        non_empty(request.archive_ref),
    )?;

    tracing::info!(
        job_id = %job.id,
        user_id,
        ephemeral,
        credits,
        "Job created"
    );

    if request.process && job.source_archive_url.is_some() {
        state.trigger.trigger(&job.id, None);
    }

    Ok((
        StatusCode::CREATED,
        Json(CreateJobResponse {
            job_id: job.id,
            ephemeral,
            credits,
        }),
    ))
}

/// Debit one credit (or fall back to a free trial), then store the job.
/// A debited credit is refunded when the job cannot be stored.
fn open_job(
    ledger: &dyn CreditLedger,
    jobs: &dyn JobStore,
    user_id: &str,
    photos: PhotoRefs,
    archive_ref: Option<String>,
) -> Result<(Job, bool, u64), ApiError> {
    let (ephemeral, credits) = if ledger.balance(user_id)? == 0 {
        (true, 0)
    } else {
        match ledger.try_debit(user_id, 1)? {
            Some(balance) => (false, balance),
            None => {
                tracing::warn!(user_id, "Credit spent concurrently, creating free-trial job");
                (true, 0)
            }
        }
    };

    let stored = jobs
        .create_job(user_id, photos, ephemeral)
        .and_then(|job| match archive_ref {
            Some(archive_ref) => jobs.attach_archive_ref(&job.id, &archive_ref),
            None => Ok(job),
        });

    match stored {
        Ok(job) => Ok((job, ephemeral, credits)),
        Err(e) => {
            if !ephemeral {
                refund(ledger, user_id);
            }
            Err(e.into())
        }
    }
}

fn refund(ledger: &dyn CreditLedger, user_id: &str) {
    match ledger.credit(user_id, 1) {
        Ok(balance) => tracing::info!(user_id, balance, "Credit refunded after failed job creation"),
        Err(e) => tracing::error!(user_id, error = %e, "Credit refund failed"),
    }
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let job = state.jobs.get_job(&parse_job_id(&id)?)?;
    Ok(Json(job))
}

/// The two photo references only
pub async fn get_job_metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<PhotoRefs>, ApiError> {
    let job = state.jobs.get_job(&parse_job_id(&id)?)?;
    Ok(Json(job.photos))
}

/// Stored retrospective document, cacheable once the job is completed
pub async fn get_job_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let job = state.jobs.get_job(&parse_job_id(&id)?)?;

    let content_ref = match (&job.status, &job.content_ref) {
        (JobStatus::Completed, Some(content_ref)) => content_ref,
        _ => {
            return Err(ApiError::NotFound(format!(
                "Content for job {} is not available (status: {})",
                job.id, job.status
            )));
        }
    };

    let bytes = state.content.get_content(content_ref).await?;

    let mut response = bytes.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=3600"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    Ok(response)
}

/// Run the pipeline and wait for it (manual retry and fallback trigger)
pub async fn process_job(
    State(state): State<AppState>,
    payload: Result<Json<ProcessRequest>, JsonRejection>,
) -> Result<Json<Job>, ApiError> {
    let request = json_body(payload)?;
    let job_id = parse_job_id(&request.job_id)?;

    tracing::info!(job_id = %job_id, "Manual processing requested");
    let job = state
        .pipeline
        .process(&job_id, non_empty(request.archive_ref))
        .await?;
    Ok(Json(job))
}

// ============================================================================
// Users
// ============================================================================

pub async fn list_user_jobs(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<JobListResponse>, ApiError> {
    let jobs = state.jobs.list_jobs(&user_id, false)?;
    Ok(Json(JobListResponse { user_id, jobs }))
}

pub async fn get_credits(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<CreditsResponse>, ApiError> {
    let credits = state.ledger.balance(&user_id)?;
    Ok(Json(CreditsResponse { user_id, credits }))
}
