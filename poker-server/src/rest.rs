use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts, Path, State};
use axum::http::{header, request::Parts, StatusCode};
use axum::routing::{get, post};
use axum::{async_trait, Json, Router};
use chrono::{DateTime, Utc};
use poker_collab::db::NewExportJob;
use poker_collab::Collab;
use poker_core::{ExportFormat, ExportJobStatus, JobId, SessionId, UserId, EXPORT_JOBS_STREAM};
use serde::{Deserialize, Serialize};

use crate::context::ServerContext;
use crate::errors::{ServerError, ServerResult};

/// An authenticated REST caller, resolved from a `Bearer` Authorization
/// header via the same [poker_collab::TokenValidator] the gateway uses.
pub struct AuthenticatedUser(pub UserId);

#[async_trait]
impl FromRequestParts<ServerContext> for AuthenticatedUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &ServerContext) -> Result<Self, Self::Rejection> {
        let collab = Arc::<Collab>::from_ref(state);

        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(ServerError::Unauthenticated)?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ServerError::BadRequest("Authorization header must be Bearer".to_string()))?;

        let user_id = collab
            .context
            .token_validator
            .validate(token)
            .await
            .ok_or(ServerError::Unauthenticated)?;

        Ok(Self(user_id))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateExportRequest {
    session_id: SessionId,
    format: ExportFormat,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateExportResponse {
    job_id: JobId,
}

async fn create_export(
    State(collab): State<Arc<Collab>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Json(body): Json<CreateExportRequest>,
) -> ServerResult<(StatusCode, Json<CreateExportResponse>)> {
    if matches!(body.format, ExportFormat::Pdf) && !collab.context.feature_gate.pdf_export_enabled(Some(user_id)) {
        return Err(ServerError::Forbidden);
    }

    let job = collab
        .context
        .store
        .create_export_job(NewExportJob {
            user_id,
            session_id: body.session_id,
            format: body.format,
        })
        .await?;

    let message = serde_json::json!({ "jobId": job.id });
    let payload = serde_json::to_vec(&message).expect("export job message always serializes");

    if let Err(e) = collab.context.bus.append_job(EXPORT_JOBS_STREAM, payload).await {
        collab
            .context
            .store
            .set_export_job_status(
                job.id,
                ExportJobStatus::Failed,
                Some(poker_collab::db::ExportJobOutcome::Failed {
                    error_message: "could not enqueue export job".to_string(),
                }),
            )
            .await?;

        return Err(e.into());
    }

    Ok((StatusCode::ACCEPTED, Json(CreateExportResponse { job_id: job.id })))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportJobStatusResponse {
    job_id: JobId,
    status: ExportJobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    completed_at: Option<DateTime<Utc>>,
}

async fn job_status(
    State(collab): State<Arc<Collab>>,
    AuthenticatedUser(user_id): AuthenticatedUser,
    Path(job_id): Path<JobId>,
) -> ServerResult<Json<ExportJobStatusResponse>> {
    let job = collab
        .context
        .store
        .export_job_by_id(job_id)
        .await
        .map_err(|e| match e {
            poker_collab::db::DatabaseError::NotFound { .. } => {
                ServerError::NotFound { resource: "export_job", identifier: "id" }
            }
            e => e.into(),
        })?;

    if job.user_id != user_id {
        return Err(ServerError::Forbidden);
    }

    Ok(Json(ExportJobStatusResponse {
        job_id: job.id,
        status: job.status,
        download_url: job.download_url,
        error_message: job.error_message,
        created_at: job.created_at,
        completed_at: job.completed_at,
    }))
}

pub fn router() -> Router<ServerContext> {
    Router::new()
        .route("/reports/export", post(create_export))
        .route("/jobs/:job_id", get(job_status))
}
