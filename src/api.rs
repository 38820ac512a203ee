//! HTTP surface of the orchestrator.
//!
//! | Route | Effect |
//! | --- | --- |
//! | `POST /jobs` | accept a [`ProvisionRequest`], reply `202 {jobId}` |
//! | `GET /jobs/:job_id/status` | poll a job |
//! | `DELETE /jobs/:job_id` | request cancellation |
//! | `POST /jobs/:job_id/signals/:name?status=` | resolve a signal wait; `404` once the job ended |

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::ProvisionError;
use crate::job::{Job, JobId};
use crate::service::{ProvisionRequest, ProvisioningService};
use crate::signal::SignalReport;

/// Builds the router over `service`.
#[must_use]
pub fn router(service: ProvisioningService) -> Router {
    Router::new()
        .route("/jobs", post(create_job))
        .route("/jobs/:job_id", delete(cancel_job))
        .route("/jobs/:job_id/status", get(job_status))
        .route("/jobs/:job_id/signals/:name", post(deliver_signal))
        .with_state(service)
}

/// Body of a `202` reply to `POST /jobs`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Accepted {
    job_id: JobId,
}

/// Body of `GET /jobs/:job_id/status`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusView {
    state_description: String,
    is_ended: bool,
    is_succeeded: bool,
    is_failed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
}

impl From<Job> for StatusView {
    fn from(job: Job) -> Self {
        let error = job.terminal_failure.map(|failure| {
            failure
                .api_response
                .unwrap_or_else(|| json!({ "message": failure.message }))
        });
        Self {
            state_description: job.current_stage_description,
            is_ended: job.is_ended,
            is_succeeded: job.is_succeeded,
            is_failed: job.is_failed,
            error,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SignalQuery {
    #[serde(default)]
    status: Option<String>,
}

/// Error reply carrying a stable code.
struct ApiError(ProvisionError);

impl From<ProvisionError> for ApiError {
    fn from(error: ProvisionError) -> Self {
        Self(error)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ProvisionError::Validation(_) => StatusCode::BAD_REQUEST,
            ProvisionError::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(error = %self.0, "request failed");
        }
        let body = json!({ "code": self.0.code(), "message": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

fn unknown_job(id: &str) -> ApiError {
    ApiError(ProvisionError::NotFound {
        resource: format!("job '{id}'"),
    })
}

fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse().map_err(|_| unknown_job(raw))
}

async fn create_job(
    State(service): State<ProvisioningService>,
    Json(request): Json<ProvisionRequest>,
) -> Result<(StatusCode, Json<Accepted>), ApiError> {
    let handle = service.request_provisioning(request).await?;
    Ok((StatusCode::ACCEPTED, Json(Accepted { job_id: handle.id() })))
}

async fn job_status(
    State(service): State<ProvisioningService>,
    Path(raw_id): Path<String>,
) -> Result<Json<StatusView>, ApiError> {
    let id = parse_job_id(&raw_id)?;
    service
        .job_status(id)
        .map(|job| Json(StatusView::from(job)))
        .ok_or_else(|| unknown_job(&raw_id))
}

async fn cancel_job(
    State(service): State<ProvisioningService>,
    Path(raw_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_job_id(&raw_id)?;
    if service.cancel(id) {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(unknown_job(&raw_id))
    }
}

async fn deliver_signal(
    State(service): State<ProvisioningService>,
    Path((raw_id, name)): Path<(String, String)>,
    Query(query): Query<SignalQuery>,
    body: String,
) -> Result<StatusCode, ApiError> {
    let id = parse_job_id(&raw_id)?;
    let succeeded = query.status.as_deref().is_none_or(|status| status == "succeeded");
    debug!(job_id = %id, signal = %name, succeeded, "signal callback");
    let report = SignalReport::from_callback(succeeded, &body);
    if service.deliver_signal(id, &name, report) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(unknown_job(&raw_id))
    }
}
