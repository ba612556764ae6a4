//! services/api/src/web/training.rs
//!
//! Training sessions: the windows that open scenarios to a roster of students.
//! Administrators only.

use crate::error::{port_failure, HandlerError};
use crate::web::middleware::AdminEmail;
use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use ecos_core::access::{is_window_open, validate_training_draft};
use ecos_core::domain::{TrainingSession, TrainingSessionDraft};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSessionRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub scenario_ids: Vec<Uuid>,
    #[serde(default)]
    pub student_emails: Vec<String>,
}

impl From<TrainingSessionRequest> for TrainingSessionDraft {
    fn from(r: TrainingSessionRequest) -> Self {
        Self {
            title: r.title,
            description: r.description.trim().to_string(),
            start_date: r.start_date,
            end_date: r.end_date,
            scenario_ids: r.scenario_ids,
            student_emails: r.student_emails,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSessionResponse {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub scenario_ids: Vec<Uuid>,
    pub student_emails: Vec<String>,
    pub scenario_count: usize,
    pub student_count: usize,
    /// Whether the window is open right now.
    pub is_active: bool,
}

fn training_view(t: TrainingSession, now: DateTime<Utc>) -> TrainingSessionResponse {
    TrainingSessionResponse {
        is_active: is_window_open(&t, now),
        scenario_count: t.scenario_ids.len(),
        student_count: t.student_emails.len(),
        id: t.id,
        title: t.title,
        description: t.description,
        start_date: t.start_date,
        end_date: t.end_date,
        created_by: t.created_by,
        created_at: t.created_at,
        scenario_ids: t.scenario_ids,
        student_emails: t.student_emails,
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrainingSessionListResponse {
    pub training_sessions: Vec<TrainingSessionResponse>,
}

/// GET /api/training-sessions - All training sessions
#[utoipa::path(
    get,
    path = "/api/training-sessions",
    params(("email" = String, Query, description = "Administrator email")),
    responses(
        (status = 200, description = "All training sessions", body = TrainingSessionListResponse),
        (status = 403, description = "Not an administrator")
    )
)]
pub async fn list_training_sessions_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<TrainingSessionListResponse>, HandlerError> {
    let trainings = state
        .db
        .list_training_sessions()
        .await
        .map_err(|e| port_failure("list training sessions", e))?;
    let now = Utc::now();
    Ok(Json(TrainingSessionListResponse {
        training_sessions: trainings
            .into_iter()
            .map(|t| training_view(t, now))
            .collect(),
    }))
}

/// GET /api/training-sessions/{id} - One training session
#[utoipa::path(
    get,
    path = "/api/training-sessions/{id}",
    params(
        ("id" = Uuid, Path, description = "Training session id"),
        ("email" = String, Query, description = "Administrator email")
    ),
    responses(
        (status = 200, description = "The training session", body = TrainingSessionResponse),
        (status = 404, description = "No such training session")
    )
)]
pub async fn get_training_session_handler(
    State(state): State<Arc<AppState>>,
    Path(training_id): Path<Uuid>,
) -> Result<Json<TrainingSessionResponse>, HandlerError> {
    let training = state
        .db
        .get_training_session_by_id(training_id)
        .await
        .map_err(|e| port_failure("load training session", e))?;
    Ok(Json(training_view(training, Utc::now())))
}

/// POST /api/training-sessions - Open a new window
#[utoipa::path(
    post,
    path = "/api/training-sessions",
    request_body = TrainingSessionRequest,
    params(("email" = String, Query, description = "Administrator email")),
    responses(
        (status = 201, description = "Training session created", body = TrainingSessionResponse),
        (status = 400, description = "Invalid dates, emails or scenario ids")
    )
)]
pub async fn create_training_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(AdminEmail(admin)): Extension<AdminEmail>,
    Json(req): Json<TrainingSessionRequest>,
) -> Result<(StatusCode, Json<TrainingSessionResponse>), HandlerError> {
    let draft = validate_training_draft(req.into())
        .map_err(|e| port_failure("create training session", e))?;
    let training = state
        .db
        .create_training_session(draft, &admin)
        .await
        .map_err(|e| port_failure("create training session", e))?;
    info!(
        "Training session {} created by {} ({} students)",
        training.id,
        admin,
        training.student_emails.len()
    );
    Ok((StatusCode::CREATED, Json(training_view(training, Utc::now()))))
}

/// PUT /api/training-sessions/{id} - Edit a window and replace its rosters
#[utoipa::path(
    put,
    path = "/api/training-sessions/{id}",
    request_body = TrainingSessionRequest,
    params(
        ("id" = Uuid, Path, description = "Training session id"),
        ("email" = String, Query, description = "Administrator email")
    ),
    responses(
        (status = 200, description = "Training session updated", body = TrainingSessionResponse),
        (status = 400, description = "Invalid dates, emails or scenario ids"),
        (status = 404, description = "No such training session")
    )
)]
pub async fn update_training_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(AdminEmail(admin)): Extension<AdminEmail>,
    Path(training_id): Path<Uuid>,
    Json(req): Json<TrainingSessionRequest>,
) -> Result<Json<TrainingSessionResponse>, HandlerError> {
    let draft = validate_training_draft(req.into())
        .map_err(|e| port_failure("update training session", e))?;
    let training = state
        .db
        .update_training_session(training_id, draft)
        .await
        .map_err(|e| port_failure("update training session", e))?;
    info!("Training session {} edited by {}", training_id, admin);
    Ok(Json(training_view(training, Utc::now())))
}

/// DELETE /api/training-sessions/{id} - Remove a window
///
/// Exam sessions started under it are kept and lose the link.
#[utoipa::path(
    delete,
    path = "/api/training-sessions/{id}",
    params(
        ("id" = Uuid, Path, description = "Training session id"),
        ("email" = String, Query, description = "Administrator email")
    ),
    responses(
        (status = 204, description = "Training session deleted"),
        (status = 404, description = "No such training session")
    )
)]
pub async fn delete_training_session_handler(
    State(state): State<Arc<AppState>>,
    Extension(AdminEmail(admin)): Extension<AdminEmail>,
    Path(training_id): Path<Uuid>,
) -> Result<StatusCode, HandlerError> {
    state
        .db
        .delete_training_session(training_id)
        .await
        .map_err(|e| port_failure("delete training session", e))?;
    info!("Training session {} deleted by {}", training_id, admin);
    Ok(StatusCode::NO_CONTENT)
}
