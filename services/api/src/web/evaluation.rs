//! services/api/src/web/evaluation.rs
//!
//! Scoring finished ECOS sessions against their rubric.

use crate::error::{port_failure, upstream_failure, HandlerError};
use crate::web::ecos_sessions::{complete_session, load_session_for};
use crate::web::middleware::require_email;
use crate::web::state::AppState;
use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use ecos_core::domain::{Rubric, SessionEvaluation};
use ecos_core::evaluation::build_session_evaluation;
use ecos_core::ports::{PortError, PortResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

/// Returns the stored evaluation of a completed session, producing it first if
/// needed. The evaluation model is only called when no report exists yet.
pub(crate) async fn evaluate_session(
    state: &AppState,
    session_id: Uuid,
) -> PortResult<SessionEvaluation> {
    if let Some(existing) = state.db.get_evaluation(session_id).await? {
        return Ok(existing);
    }

    let session = state.db.get_ecos_session_by_id(session_id).await?;
    if session.is_in_progress() {
        return Err(PortError::Conflict(
            "The session is still in progress".to_string(),
        ));
    }
    let scenario = state.db.get_scenario_by_id(session.scenario_id).await?;
    let transcript = state.db.get_ecos_messages(session_id).await?;

    let draft = state
        .evaluator_adapter
        .evaluate_transcript(&scenario, &transcript)
        .await?;
    let evaluation =
        build_session_evaluation(session_id, &scenario.evaluation_criteria, draft, Utc::now());

    if state.db.save_evaluation(evaluation.clone()).await? {
        info!(
            "Session {} scored {}/{}",
            session_id, evaluation.report.total_score, evaluation.report.max_score
        );
        Ok(evaluation)
    } else {
        // Someone else stored a report in the meantime; theirs is the one that counts.
        state.db.get_evaluation(session_id).await?.ok_or_else(|| {
            PortError::Unexpected(format!("Evaluation of {} vanished", session_id))
        })
    }
}

/// Fire-and-forget evaluation after a session completes.
pub(crate) fn spawn_evaluation(state: Arc<AppState>, session_id: Uuid) {
    tokio::spawn(async move {
        match evaluate_session(&state, session_id).await {
            Ok(_) => info!("Background evaluation of session {} done", session_id),
            Err(e) => error!("Background evaluation of session {} failed: {}", session_id, e),
        }
    });
}

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRequest {
    pub session_id: Uuid,
    pub email: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CriterionView {
    pub criterion_id: String,
    pub score: f64,
    pub max_score: u32,
    pub feedback: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResponse {
    pub session_id: Uuid,
    pub criteria: Vec<CriterionView>,
    pub total_score: f64,
    pub max_score: u32,
    pub percentage: f64,
    pub summary: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub recommendations: Vec<String>,
    pub created_at: DateTime<Utc>,
}

pub(crate) fn evaluation_view(evaluation: SessionEvaluation, rubric: &Rubric) -> EvaluationResponse {
    let report = evaluation.report;
    EvaluationResponse {
        session_id: report.session_id,
        criteria: evaluation
            .criteria
            .into_iter()
            .map(|c| CriterionView {
                max_score: rubric.get(&c.criterion_id).copied().unwrap_or(0),
                criterion_id: c.criterion_id,
                score: c.score,
                feedback: c.feedback,
            })
            .collect(),
        total_score: report.total_score,
        max_score: report.max_score,
        percentage: report.percentage,
        summary: report.summary,
        strengths: report.strengths,
        weaknesses: report.weaknesses,
        recommendations: report.recommendations,
        created_at: report.created_at,
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /api/ecos/evaluate - Evaluate a session, ending it first if needed
///
/// Calling this again returns the stored report.
#[utoipa::path(
    post,
    path = "/api/ecos/evaluate",
    request_body = EvaluateRequest,
    responses(
        (status = 200, description = "The session's evaluation", body = EvaluationResponse),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "No such session"),
        (status = 502, description = "The evaluation model failed")
    )
)]
pub async fn evaluate_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EvaluateRequest>,
) -> Result<Json<EvaluationResponse>, HandlerError> {
    let email = require_email(&req.email)?;
    let session = load_session_for(&state, req.session_id, &email)
        .await
        .map_err(|e| port_failure("load session", e))?;

    // Evaluated inline below, so no background run.
    if session.is_in_progress() {
        complete_session(&state, &session, Utc::now(), false)
            .await
            .map_err(|e| port_failure("end session", e))?;
    }

    let evaluation = evaluate_session(&state, session.id)
        .await
        .map_err(|e| upstream_failure("evaluate session", e))?;
    let scenario = state
        .db
        .get_scenario_by_id(session.scenario_id)
        .await
        .map_err(|e| port_failure("load scenario", e))?;

    Ok(Json(evaluation_view(evaluation, &scenario.evaluation_criteria)))
}
