//! services/api/src/web/ecos_sessions.rs
//!
//! ECOS exam sessions: starting, listing, reading and ending them.
//!
//! The exam clock is enforced here, not in the browser. Every read of a
//! session checks its deadline and completes it when time is up; the sweep in
//! `web::sweep` does the same for sessions nobody touches any more.

use crate::error::{port_failure, HandlerError};
use crate::web::evaluation::{evaluation_view, spawn_evaluation, EvaluationResponse};
use crate::web::middleware::require_email;
use crate::web::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use ecos_core::access::find_grant;
use ecos_core::domain::{EcosMessage, EcosSession, SessionStatus};
use ecos_core::lifecycle::{can_access, Completion, SessionClock};
use ecos_core::ports::{PortError, PortResult};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

//=========================================================================================
// Lifecycle Operations
//=========================================================================================

/// Ends `session` at `now` (or at its deadline if that came first).
///
/// Only the call that actually performs the transition gets `Completed`; it
/// also starts the evaluation in the background when `evaluate` is set.
pub(crate) async fn complete_session(
    state: &Arc<AppState>,
    session: &EcosSession,
    now: DateTime<Utc>,
    evaluate: bool,
) -> PortResult<Completion> {
    let end_time = state.session_clock().completion_time(session, now);
    match state.db.complete_ecos_session(session.id, end_time).await? {
        Some(done) => {
            info!("ECOS session {} completed at {}", done.id, end_time);
            if evaluate {
                spawn_evaluation(state.clone(), done.id);
            }
            Ok(Completion::Completed(done))
        }
        None => {
            let current = state.db.get_ecos_session_by_id(session.id).await?;
            Ok(Completion::AlreadyCompleted(current))
        }
    }
}

/// Completes the session if its time is up, and returns its current state.
pub(crate) async fn enforce_time_limit(
    state: &Arc<AppState>,
    session: EcosSession,
    now: DateTime<Utc>,
) -> PortResult<EcosSession> {
    if state.session_clock().is_expired(&session, now) {
        info!("ECOS session {} ran out of time", session.id);
        Ok(complete_session(state, &session, now, true)
            .await?
            .into_session())
    } else {
        Ok(session)
    }
}

/// Loads a session the caller is allowed to act on, with the clock applied.
pub(crate) async fn load_session_for(
    state: &Arc<AppState>,
    session_id: Uuid,
    email: &str,
) -> PortResult<EcosSession> {
    let session = state.db.get_ecos_session_by_id(session_id).await?;
    if !can_access(&session, email, state.config.is_admin(email)) {
        warn!("{} tried to access ECOS session {}", email, session_id);
        return Err(PortError::Unauthorized);
    }
    enforce_time_limit(state, session, Utc::now()).await
}

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct EcosSessionResponse {
    pub id: Uuid,
    pub scenario_id: Uuid,
    pub student_email: String,
    pub training_session_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub deadline: DateTime<Utc>,
    pub status: String,
    pub remaining_seconds: i64,
}

pub(crate) fn session_view(
    clock: &SessionClock,
    session: EcosSession,
    now: DateTime<Utc>,
) -> EcosSessionResponse {
    EcosSessionResponse {
        deadline: clock.deadline(&session),
        remaining_seconds: clock.remaining(&session, now).num_seconds(),
        status: session.status.to_string(),
        id: session.id,
        scenario_id: session.scenario_id,
        student_email: session.student_email,
        training_session_id: session.training_session_id,
        start_time: session.start_time,
        end_time: session.end_time,
    }
}

#[derive(Deserialize, IntoParams)]
pub struct ListSessionsQuery {
    pub email: String,
    /// `in_progress` or `completed`.
    pub status: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionListResponse {
    pub sessions: Vec<EcosSessionResponse>,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub scenario_id: Uuid,
    pub student_email: String,
    pub training_session_id: Option<Uuid>,
}

#[derive(Deserialize, IntoParams)]
pub struct SessionQuery {
    pub email: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEntry {
    pub id: Uuid,
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl From<EcosMessage> for TranscriptEntry {
    fn from(m: EcosMessage) -> Self {
        Self {
            id: m.id,
            role: m.role.as_str().to_string(),
            content: m.content,
            timestamp: m.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetailResponse {
    pub session: EcosSessionResponse,
    pub messages: Vec<TranscriptEntry>,
    pub evaluation: Option<EvaluationResponse>,
}

#[derive(Deserialize, ToSchema)]
pub struct UpdateSessionRequest {
    pub email: String,
    /// Only `completed` is accepted.
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSessionResponse {
    pub session: EcosSessionResponse,
    /// False when the session had already been completed.
    pub transitioned: bool,
}

//=========================================================================================
// Handlers
//=========================================================================================

/// GET /api/ecos/sessions - Sessions visible to the caller
#[utoipa::path(
    get,
    path = "/api/ecos/sessions",
    params(ListSessionsQuery),
    responses(
        (status = 200, description = "Administrators get every session, students their own", body = SessionListResponse),
        (status = 400, description = "Invalid email or status")
    )
)]
pub async fn list_sessions_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<SessionListResponse>, HandlerError> {
    let email = require_email(&query.email)?;
    let status = query
        .status
        .as_deref()
        .map(str::parse::<SessionStatus>)
        .transpose()
        .map_err(|e| (StatusCode::BAD_REQUEST, e))?;

    let owner = if state.config.is_admin(&email) {
        None
    } else {
        Some(email.as_str())
    };
    let sessions = state
        .db
        .list_ecos_sessions(owner, status)
        .await
        .map_err(|e| port_failure("list sessions", e))?;

    // Overdue sessions are closed before they are reported.
    let now = Utc::now();
    let sessions = try_join_all(
        sessions
            .into_iter()
            .map(|s| enforce_time_limit(&state, s, now)),
    )
    .await
    .map_err(|e| port_failure("close expired sessions", e))?;

    let clock = state.session_clock();
    Ok(Json(SessionListResponse {
        sessions: sessions
            .into_iter()
            .filter(|s| status.map_or(true, |wanted| s.status == wanted))
            .map(|s| session_view(&clock, s, now))
            .collect(),
    }))
}

/// POST /api/ecos/sessions - Start an exam on a scenario
#[utoipa::path(
    post,
    path = "/api/ecos/sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session started", body = EcosSessionResponse),
        (status = 403, description = "The scenario is not available to this student"),
        (status = 404, description = "No such scenario or training session")
    )
)]
pub async fn create_session_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<EcosSessionResponse>), HandlerError> {
    let email = require_email(&req.student_email)?;
    let now = Utc::now();

    state
        .db
        .get_scenario_by_id(req.scenario_id)
        .await
        .map_err(|e| port_failure("load scenario", e))?;

    // Administrators may preview any scenario; students need an open training session.
    let training_session_id = if state.config.is_admin(&email) {
        if let Some(training_id) = req.training_session_id {
            state
                .db
                .get_training_session_by_id(training_id)
                .await
                .map_err(|e| port_failure("load training session", e))?;
        }
        req.training_session_id
    } else {
        let trainings = state
            .db
            .get_training_sessions_for_student(&email)
            .await
            .map_err(|e| port_failure("load training sessions", e))?;
        let grant = find_grant(
            &trainings,
            &email,
            req.scenario_id,
            req.training_session_id,
            now,
        )
        .ok_or_else(|| {
            warn!("{} is not allowed to start scenario {}", email, req.scenario_id);
            (
                StatusCode::FORBIDDEN,
                "This scenario is not available to you right now".to_string(),
            )
        })?;
        Some(grant.training_session_id)
    };

    state
        .db
        .get_or_create_user(&email)
        .await
        .map_err(|e| port_failure("register user", e))?;
    let session = state
        .db
        .create_ecos_session(req.scenario_id, &email, training_session_id, now)
        .await
        .map_err(|e| port_failure("start session", e))?;
    info!(
        "ECOS session {} started by {} on scenario {}",
        session.id, email, session.scenario_id
    );

    Ok((
        StatusCode::CREATED,
        Json(session_view(&state.session_clock(), session, now)),
    ))
}

/// GET /api/ecos/sessions/{id} - A session with its transcript and evaluation
#[utoipa::path(
    get,
    path = "/api/ecos/sessions/{id}",
    params(("id" = Uuid, Path, description = "Session id"), SessionQuery),
    responses(
        (status = 200, description = "Session details", body = SessionDetailResponse),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "No such session")
    )
)]
pub async fn get_session_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<SessionDetailResponse>, HandlerError> {
    let email = require_email(&query.email)?;
    let session = load_session_for(&state, session_id, &email)
        .await
        .map_err(|e| port_failure("load session", e))?;

    let messages = state
        .db
        .get_ecos_messages(session_id)
        .await
        .map_err(|e| port_failure("load transcript", e))?;
    let evaluation = match state
        .db
        .get_evaluation(session_id)
        .await
        .map_err(|e| port_failure("load evaluation", e))?
    {
        Some(evaluation) => {
            let scenario = state
                .db
                .get_scenario_by_id(session.scenario_id)
                .await
                .map_err(|e| port_failure("load scenario", e))?;
            Some(evaluation_view(evaluation, &scenario.evaluation_criteria))
        }
        None => None,
    };

    Ok(Json(SessionDetailResponse {
        session: session_view(&state.session_clock(), session, Utc::now()),
        messages: messages.into_iter().map(Into::into).collect(),
        evaluation,
    }))
}

/// PUT /api/ecos/sessions/{id} - End a session
///
/// Ending a session that is already completed changes nothing and answers 200
/// with `transitioned: false`.
#[utoipa::path(
    put,
    path = "/api/ecos/sessions/{id}",
    request_body = UpdateSessionRequest,
    params(("id" = Uuid, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session completed", body = UpdateSessionResponse),
        (status = 400, description = "Unsupported status"),
        (status = 403, description = "Not the owner"),
        (status = 404, description = "No such session")
    )
)]
pub async fn update_session_handler(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<Uuid>,
    Json(req): Json<UpdateSessionRequest>,
) -> Result<Json<UpdateSessionResponse>, HandlerError> {
    let email = require_email(&req.email)?;
    if req.status.parse::<SessionStatus>() != Ok(SessionStatus::Completed) {
        return Err((
            StatusCode::BAD_REQUEST,
            "status can only be set to 'completed'".to_string(),
        ));
    }

    let session = state
        .db
        .get_ecos_session_by_id(session_id)
        .await
        .map_err(|e| port_failure("load session", e))?;
    if !can_access(&session, &email, state.config.is_admin(&email)) {
        return Err(port_failure("end session", PortError::Unauthorized));
    }

    let now = Utc::now();
    let completion = complete_session(&state, &session, now, true)
        .await
        .map_err(|e| port_failure("end session", e))?;
    let transitioned = completion.transitioned();

    Ok(Json(UpdateSessionResponse {
        session: session_view(&state.session_clock(), completion.into_session(), now),
        transitioned,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestContext, ADMIN, STUDENT};
    use chrono::Duration;

    fn start(scenario_id: Uuid, email: &str) -> Json<CreateSessionRequest> {
        Json(CreateSessionRequest {
            scenario_id,
            student_email: email.to_string(),
            training_session_id: None,
        })
    }

    fn end(email: &str) -> Json<UpdateSessionRequest> {
        Json(UpdateSessionRequest {
            email: email.to_string(),
            status: "completed".to_string(),
        })
    }

    #[tokio::test]
    async fn enrolled_student_starts_a_session_inside_the_window() {
        let ctx = TestContext::new();
        let scenario = ctx.seed_scenario(&[("anamnese", 20)]);
        let training = ctx.seed_training(&[scenario.id], &[STUDENT], Duration::days(1));

        let (status, Json(session)) =
            create_session_handler(State(ctx.state.clone()), start(scenario.id, STUDENT))
                .await
                .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(session.status, "in_progress");
        assert_eq!(session.training_session_id, Some(training.id));
        assert_eq!(session.remaining_seconds, 8 * 60);
    }

    #[tokio::test]
    async fn student_outside_roster_or_window_is_refused() {
        let ctx = TestContext::new();
        let scenario = ctx.seed_scenario(&[("anamnese", 20)]);
        ctx.seed_training(&[scenario.id], &["someone.else@fac.fr"], Duration::days(1));

        let err = create_session_handler(State(ctx.state.clone()), start(scenario.id, STUDENT))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);

        let closed = ctx.seed_scenario(&[("anamnese", 20)]);
        ctx.seed_closed_training(&[closed.id], &[STUDENT]);
        let err = create_session_handler(State(ctx.state.clone()), start(closed.id, STUDENT))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn admin_can_preview_any_scenario() {
        let ctx = TestContext::new();
        let scenario = ctx.seed_scenario(&[("anamnese", 20)]);
        let (_, Json(session)) =
            create_session_handler(State(ctx.state.clone()), start(scenario.id, ADMIN))
                .await
                .unwrap();
        assert_eq!(session.training_session_id, None);
    }

    #[tokio::test]
    async fn ending_twice_transitions_once() {
        let ctx = TestContext::new();
        let scenario = ctx.seed_scenario(&[("anamnese", 20)]);
        let session = ctx.seed_session(scenario.id, STUDENT, Utc::now());

        let Json(first) =
            update_session_handler(State(ctx.state.clone()), Path(session.id), end(STUDENT))
                .await
                .unwrap();
        assert!(first.transitioned);
        assert_eq!(first.session.status, "completed");
        let ended_at = first.session.end_time.unwrap();

        let Json(second) =
            update_session_handler(State(ctx.state.clone()), Path(session.id), end(STUDENT))
                .await
                .unwrap();
        assert!(!second.transitioned);
        assert_eq!(second.session.end_time, Some(ended_at));
    }

    #[tokio::test]
    async fn only_owner_or_admin_can_end_a_session() {
        let ctx = TestContext::new();
        let scenario = ctx.seed_scenario(&[("anamnese", 20)]);
        let session = ctx.seed_session(scenario.id, STUDENT, Utc::now());

        let err = update_session_handler(
            State(ctx.state.clone()),
            Path(session.id),
            end("intruder@fac.fr"),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::FORBIDDEN);

        let Json(res) =
            update_session_handler(State(ctx.state.clone()), Path(session.id), end(ADMIN))
                .await
                .unwrap();
        assert!(res.transitioned);
    }

    #[tokio::test]
    async fn other_statuses_are_rejected() {
        let ctx = TestContext::new();
        let scenario = ctx.seed_scenario(&[("anamnese", 20)]);
        let session = ctx.seed_session(scenario.id, STUDENT, Utc::now());
        let err = update_session_handler(
            State(ctx.state.clone()),
            Path(session.id),
            Json(UpdateSessionRequest {
                email: STUDENT.to_string(),
                status: "in_progress".to_string(),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn reading_an_overdue_session_completes_it_at_the_deadline() {
        let ctx = TestContext::new();
        let scenario = ctx.seed_scenario(&[("anamnese", 20)]);
        let started = Utc::now() - Duration::minutes(20);
        let session = ctx.seed_session(scenario.id, STUDENT, started);

        let Json(detail) = get_session_handler(
            State(ctx.state.clone()),
            Path(session.id),
            Query(SessionQuery {
                email: STUDENT.to_string(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(detail.session.status, "completed");
        assert_eq!(detail.session.end_time, Some(started + Duration::minutes(8)));
        assert_eq!(detail.session.remaining_seconds, 0);
    }

    #[tokio::test]
    async fn students_list_only_their_sessions() {
        let ctx = TestContext::new();
        let scenario = ctx.seed_scenario(&[("anamnese", 20)]);
        ctx.seed_session(scenario.id, STUDENT, Utc::now());
        ctx.seed_session(scenario.id, "other@fac.fr", Utc::now());

        let list = |email: &str, status: Option<&str>| {
            list_sessions_handler(
                State(ctx.state.clone()),
                Query(ListSessionsQuery {
                    email: email.to_string(),
                    status: status.map(str::to_string),
                }),
            )
        };

        assert_eq!(list(STUDENT, None).await.unwrap().0.sessions.len(), 1);
        assert_eq!(list(ADMIN, None).await.unwrap().0.sessions.len(), 2);
        assert_eq!(list(ADMIN, Some("completed")).await.unwrap().0.sessions.len(), 0);
        assert_eq!(
            list(ADMIN, Some("paused")).await.unwrap_err().0,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn listing_closes_overdue_sessions() {
        let ctx = TestContext::new();
        let scenario = ctx.seed_scenario(&[("anamnese", 20)]);
        let started = Utc::now() - Duration::minutes(20);
        let overdue = ctx.seed_session(scenario.id, STUDENT, started);
        let live = ctx.seed_session(scenario.id, STUDENT, Utc::now());

        let Json(in_progress) = list_sessions_handler(
            State(ctx.state.clone()),
            Query(ListSessionsQuery {
                email: STUDENT.to_string(),
                status: Some("in_progress".to_string()),
            }),
        )
        .await
        .unwrap();
        let ids: Vec<Uuid> = in_progress.sessions.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![live.id]);

        let stored = ctx.state.db.get_ecos_session_by_id(overdue.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert_eq!(stored.end_time, Some(started + Duration::minutes(8)));
    }

    #[tokio::test]
    async fn admin_start_with_unknown_training_session_is_not_found() {
        let ctx = TestContext::new();
        let scenario = ctx.seed_scenario(&[("anamnese", 20)]);

        let err = create_session_handler(
            State(ctx.state.clone()),
            Json(CreateSessionRequest {
                scenario_id: scenario.id,
                student_email: ADMIN.to_string(),
                training_session_id: Some(Uuid::new_v4()),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
        assert!(err.1.starts_with("Training session"));
    }
}
