//! services/api/src/web/simulator.rs
//!
//! The simulated patient. Each student line is answered in character by the
//! patient model, and both lines are appended to the session transcript.

use crate::error::{port_failure, upstream_failure, HandlerError};
use crate::web::ecos_sessions::{enforce_time_limit, load_session_for};
use crate::web::middleware::require_email;
use crate::web::state::AppState;
use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use ecos_core::domain::{EcosMessage, MessageRole};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

const MAX_MESSAGE_CHARS: usize = 2000;

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorRequest {
    pub session_id: Uuid,
    pub email: String,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SimulatorResponse {
    pub response: String,
    pub remaining_seconds: i64,
}

/// POST /api/ecos/patient-simulator - Talk to the simulated patient
#[utoipa::path(
    post,
    path = "/api/ecos/patient-simulator",
    request_body = SimulatorRequest,
    responses(
        (status = 200, description = "The patient's reply", body = SimulatorResponse),
        (status = 400, description = "Empty or oversized message"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "No such session"),
        (status = 409, description = "The session is over"),
        (status = 502, description = "The patient model failed")
    )
)]
pub async fn patient_simulator_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SimulatorRequest>,
) -> Result<Json<SimulatorResponse>, HandlerError> {
    let email = require_email(&req.email)?;
    let text = req.message.trim().to_string();
    if text.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "message cannot be empty".to_string()));
    }
    if text.chars().count() > MAX_MESSAGE_CHARS {
        return Err((
            StatusCode::BAD_REQUEST,
            format!("message is longer than {} characters", MAX_MESSAGE_CHARS),
        ));
    }

    // 1. Load the session with the clock applied
    let session = load_session_for(&state, req.session_id, &email)
        .await
        .map_err(|e| port_failure("load session", e))?;
    if !session.is_in_progress() {
        return Err((StatusCode::CONFLICT, "The session is over".to_string()));
    }

    // 2. Build the transcript including the new line
    let scenario = state
        .db
        .get_scenario_by_id(session.scenario_id)
        .await
        .map_err(|e| port_failure("load scenario", e))?;
    let mut transcript = state
        .db
        .get_ecos_messages(session.id)
        .await
        .map_err(|e| port_failure("load transcript", e))?;
    let question = EcosMessage {
        id: Uuid::new_v4(),
        session_id: session.id,
        role: MessageRole::User,
        content: text,
        created_at: Utc::now(),
    };
    transcript.push(question.clone());

    // 3. Ask the patient, then store both lines
    let reply = state
        .patient_adapter
        .reply_as_patient(&scenario, &transcript)
        .await
        .map_err(|e| upstream_failure("simulate patient", e))?;

    // 4. The session may have ended while the patient was answering
    let now = Utc::now();
    let current = state
        .db
        .get_ecos_session_by_id(session.id)
        .await
        .map_err(|e| port_failure("load session", e))?;
    let current = enforce_time_limit(&state, current, now)
        .await
        .map_err(|e| port_failure("load session", e))?;
    if !current.is_in_progress() {
        info!("Dropping a late patient reply for session {}", session.id);
        return Err((StatusCode::CONFLICT, "The session is over".to_string()));
    }

    state
        .db
        .save_ecos_message(question)
        .await
        .map_err(|e| port_failure("save transcript", e))?;
    state
        .db
        .save_ecos_message(EcosMessage {
            id: Uuid::new_v4(),
            session_id: session.id,
            role: MessageRole::Assistant,
            content: reply.clone(),
            created_at: now,
        })
        .await
        .map_err(|e| port_failure("save transcript", e))?;
    info!("Patient replied in session {}", session.id);

    Ok(Json(SimulatorResponse {
        response: reply,
        remaining_seconds: state.session_clock().remaining(&session, now).num_seconds(),
    }))
}
