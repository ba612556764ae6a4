//! services/api/src/web/chat.rs
//!
//! The course chat: quota status, asking a question and the exchange history.
//!
//! A question at the limit is refused before any model call. Otherwise the
//! answer is generated first, then counted and stored in one unit guarded by the
//! limit, so a failed answer is never counted and the counter never goes down.

use crate::error::{port_failure, upstream_failure, HandlerError};
use crate::web::middleware::require_email;
use crate::web::state::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use ecos_core::domain::Exchange;
use ecos_core::ports::PortResult;
use ecos_core::quota::{quota_day, QuotaStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

const MAX_QUESTION_CHARS: usize = 4000;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, IntoParams)]
pub struct EmailQuery {
    pub email: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub email: String,
    pub questions_used: u32,
    pub questions_remaining: u32,
    pub max_daily_questions: u32,
    pub limit_reached: bool,
}

impl From<QuotaStatus> for StatusResponse {
    fn from(s: QuotaStatus) -> Self {
        Self {
            email: s.email,
            questions_used: s.questions_used,
            questions_remaining: s.questions_remaining,
            max_daily_questions: s.max_daily_questions,
            limit_reached: s.limit_reached,
        }
    }
}

#[derive(Deserialize, ToSchema)]
pub struct AskRequest {
    pub email: String,
    pub question: String,
}

/// When the quota is exhausted the answer fields are `null` and `limitReached`
/// is true; that is a normal 200 response, not an error.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    pub id: Option<Uuid>,
    pub question: String,
    pub response: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub questions_used: u32,
    pub questions_remaining: u32,
    pub limit_reached: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ExchangeView {
    pub id: Uuid,
    pub question: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HistoryResponse {
    pub exchanges: Vec<ExchangeView>,
}

//=========================================================================================
// Handlers
//=========================================================================================

/// GET /api/status - Today's quota for a user
#[utoipa::path(
    get,
    path = "/api/status",
    params(EmailQuery),
    responses(
        (status = 200, description = "Current quota", body = StatusResponse),
        (status = 400, description = "Missing or invalid email")
    )
)]
pub async fn status_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EmailQuery>,
) -> Result<Json<StatusResponse>, HandlerError> {
    let email = require_email(&query.email)?;
    let used = state
        .db
        .get_daily_count(&email, quota_day(Utc::now()))
        .await
        .map_err(|e| port_failure("load quota", e))?;

    let status = QuotaStatus::from_used(&email, used, state.config.max_daily_questions);
    Ok(Json(status.into()))
}

/// POST /api/ask - Ask the course assistant a question
#[utoipa::path(
    post,
    path = "/api/ask",
    request_body = AskRequest,
    responses(
        (status = 200, description = "Answer, or limitReached when the daily quota is used up", body = AskResponse),
        (status = 400, description = "Invalid request"),
        (status = 502, description = "The language model or vector index failed")
    )
)]
pub async fn ask_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AskRequest>,
) -> Result<Json<AskResponse>, HandlerError> {
    let email = require_email(&req.email)?;
    let question = req.question.trim().to_string();
    if question.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "question cannot be empty".to_string()));
    }
    if question.chars().count() > MAX_QUESTION_CHARS {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("question is longer than {} characters", MAX_QUESTION_CHARS),
        ));
    }

    let limit = state.config.max_daily_questions;
    let now = Utc::now();
    let day = quota_day(now);

    // 1. Refuse early at the limit
    let used = state
        .db
        .get_daily_count(&email, day)
        .await
        .map_err(|e| port_failure("load quota", e))?;
    if used >= limit {
        return Ok(Json(limit_reached(&email, question, limit)));
    }

    // 2. Answer
    let response = answer(&state, &email, &question)
        .await
        .map_err(|e| upstream_failure("answer question", e))?;

    // 3. Count and store together; a concurrent asker may have taken the last slot
    let exchange = Exchange {
        id: Uuid::new_v4(),
        email: email.clone(),
        question,
        response,
        created_at: now,
    };
    let recorded = state
        .db
        .record_exchange_within_quota(exchange.clone(), day, limit)
        .await
        .map_err(|e| port_failure("record question", e))?;

    let Some(used) = recorded else {
        return Ok(Json(limit_reached(&email, exchange.question, limit)));
    };

    let status = QuotaStatus::from_used(&email, used, limit);
    Ok(Json(AskResponse {
        id: Some(exchange.id),
        question: exchange.question,
        response: Some(exchange.response),
        timestamp: Some(exchange.created_at),
        questions_used: status.questions_used,
        questions_remaining: status.questions_remaining,
        limit_reached: status.limit_reached,
    }))
}

fn limit_reached(email: &str, question: String, limit: u32) -> AskResponse {
    info!("Daily limit reached for {}", email);
    let status = QuotaStatus::from_used(email, limit, limit);
    AskResponse {
        id: None,
        question,
        response: None,
        timestamp: None,
        questions_used: status.questions_used,
        questions_remaining: status.questions_remaining,
        limit_reached: true,
    }
}

async fn answer(state: &AppState, email: &str, question: &str) -> PortResult<String> {
    state.db.get_or_create_user(email).await?;

    let passages = match state
        .knowledge_base
        .search(question, state.config.retrieval_top_k)
        .await
    {
        Ok(passages) => passages,
        Err(e) => {
            // Retrieval only improves the answer; the model can still reply.
            warn!("Retrieval failed, answering without context: {}", e);
            Vec::new()
        }
    };
    let context = passages.join("\n\n---\n\n");

    state.qa_adapter.answer_question(question, &context).await
}

/// GET /api/history - Past exchanges, newest first
#[utoipa::path(
    get,
    path = "/api/history",
    params(EmailQuery),
    responses(
        (status = 200, description = "Exchange history", body = HistoryResponse),
        (status = 400, description = "Missing or invalid email")
    )
)]
pub async fn history_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EmailQuery>,
) -> Result<Json<HistoryResponse>, HandlerError> {
    let email = require_email(&query.email)?;
    let exchanges = state
        .db
        .get_exchanges_for_user(&email, state.config.history_limit)
        .await
        .map_err(|e| port_failure("load history", e))?;

    Ok(Json(HistoryResponse {
        exchanges: exchanges
            .into_iter()
            .map(|e| ExchangeView {
                id: e.id,
                question: e.question,
                response: e.response,
                timestamp: e.created_at,
            })
            .collect(),
    }))
}
