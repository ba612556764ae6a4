//! services/api/src/web/router.rs
//!
//! The route table and the master definition of the OpenAPI document.

use crate::web::{
    chat, ecos_sessions, evaluation, handoff, middleware::require_admin, scenarios, simulator,
    state::AppState, student, training,
};
use axum::{
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use utoipa::OpenApi;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        handoff::webhook_handler,
        chat::status_handler,
        chat::ask_handler,
        chat::history_handler,
        scenarios::list_scenarios_handler,
        scenarios::create_scenario_handler,
        scenarios::update_scenario_handler,
        scenarios::delete_scenario_handler,
        training::list_training_sessions_handler,
        training::get_training_session_handler,
        training::create_training_session_handler,
        training::update_training_session_handler,
        training::delete_training_session_handler,
        student::available_scenarios_handler,
        ecos_sessions::list_sessions_handler,
        ecos_sessions::create_session_handler,
        ecos_sessions::get_session_handler,
        ecos_sessions::update_session_handler,
        simulator::patient_simulator_handler,
        evaluation::evaluate_handler,
    ),
    components(
        schemas(
            handoff::WebhookRequest,
            handoff::WebhookResponse,
            chat::StatusResponse,
            chat::AskRequest,
            chat::AskResponse,
            chat::ExchangeView,
            chat::HistoryResponse,
            scenarios::ScenarioRequest,
            scenarios::ScenarioResponse,
            scenarios::ScenarioListResponse,
            training::TrainingSessionRequest,
            training::TrainingSessionResponse,
            training::TrainingSessionListResponse,
            student::AvailableScenario,
            student::AvailableScenariosResponse,
            ecos_sessions::EcosSessionResponse,
            ecos_sessions::SessionListResponse,
            ecos_sessions::CreateSessionRequest,
            ecos_sessions::TranscriptEntry,
            ecos_sessions::SessionDetailResponse,
            ecos_sessions::UpdateSessionRequest,
            ecos_sessions::UpdateSessionResponse,
            simulator::SimulatorRequest,
            simulator::SimulatorResponse,
            evaluation::EvaluateRequest,
            evaluation::CriterionView,
            evaluation::EvaluationResponse,
        )
    ),
    tags(
        (name = "ECOS Assistant API", description = "Course chat under a daily quota and simulated clinical exams.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Routes
//=========================================================================================

/// Builds every API route. CORS, tracing and the Swagger UI are layered on by
/// the binary.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Public routes (identity is the email the LMS passes along)
    let public_routes = Router::new()
        .route("/api/webhook", post(handoff::webhook_handler))
        .route("/api/status", get(chat::status_handler))
        .route("/api/ask", post(chat::ask_handler))
        .route("/api/history", get(chat::history_handler))
        .route(
            "/api/student/available-scenarios",
            get(student::available_scenarios_handler),
        )
        .route(
            "/api/ecos/sessions",
            get(ecos_sessions::list_sessions_handler).post(ecos_sessions::create_session_handler),
        )
        .route(
            "/api/ecos/sessions/{id}",
            get(ecos_sessions::get_session_handler).put(ecos_sessions::update_session_handler),
        )
        .route(
            "/api/ecos/patient-simulator",
            post(simulator::patient_simulator_handler),
        )
        .route("/api/ecos/evaluate", post(evaluation::evaluate_handler));

    // Administrator routes
    let admin_routes = Router::new()
        .route(
            "/api/ecos/scenarios",
            get(scenarios::list_scenarios_handler).post(scenarios::create_scenario_handler),
        )
        .route(
            "/api/ecos/scenarios/{id}",
            put(scenarios::update_scenario_handler).delete(scenarios::delete_scenario_handler),
        )
        .route(
            "/api/training-sessions",
            get(training::list_training_sessions_handler)
                .post(training::create_training_session_handler),
        )
        .route(
            "/api/training-sessions/{id}",
            get(training::get_training_session_handler)
                .put(training::update_training_session_handler)
                .delete(training::delete_training_session_handler),
        )
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_admin,
        ));

    Router::new()
        .merge(public_routes)
        .merge(admin_routes)
        .with_state(state)
}
