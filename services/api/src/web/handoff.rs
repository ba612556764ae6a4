//! services/api/src/web/handoff.rs
//!
//! The LMS webhook. The embedding platform posts the learner's email when the
//! chatbot page opens; the service registers the user and hands back a session.

use crate::error::{port_failure, HandlerError};
use crate::web::middleware::require_email;
use crate::web::state::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Duration, Utc};
use ecos_core::quota::{quota_day, QuotaStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Deserialize, ToSchema)]
pub struct WebhookRequest {
    pub email: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub session_id: Uuid,
    pub email: String,
    pub expires_at: DateTime<Utc>,
    pub questions_used: u32,
    pub questions_remaining: u32,
}

/// POST /api/webhook - Register an LMS learner and open or refresh their session
#[utoipa::path(
    post,
    path = "/api/webhook",
    request_body = WebhookRequest,
    responses(
        (status = 200, description = "Session created or refreshed", body = WebhookResponse),
        (status = 400, description = "Missing or invalid email")
    )
)]
pub async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WebhookRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let email = require_email(&req.email)?;
    let now = Utc::now();
    let lifetime = Duration::hours(state.config.lms_session_hours);

    // 1. Make sure the user exists
    state
        .db
        .get_or_create_user(&email)
        .await
        .map_err(|e| port_failure("register user", e))?;

    // 2. Create or refresh the session
    let session = state
        .db
        .upsert_lms_session(&email, now + lifetime)
        .await
        .map_err(|e| port_failure("create session", e))?;
    info!("LMS handoff for {} (session {})", email, session.id);

    // 3. Report the quota so the widget can render immediately
    let used = state
        .db
        .get_daily_count(&email, quota_day(now))
        .await
        .map_err(|e| port_failure("load quota", e))?;
    let quota = QuotaStatus::from_used(&email, used, state.config.max_daily_questions);

    let cookie = format!(
        "session={}; HttpOnly; Secure; SameSite=None; Path=/; Max-Age={}",
        session.id,
        lifetime.num_seconds()
    );

    let response = WebhookResponse {
        session_id: session.id,
        email,
        expires_at: session.expires_at,
        questions_used: quota.questions_used,
        questions_remaining: quota.questions_remaining,
    };

    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie)], Json(response)))
}
