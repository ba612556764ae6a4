//! services/api/src/web/scenarios.rs
//!
//! Scenario authoring. Every route here sits behind `require_admin`.

use crate::error::{port_failure, HandlerError};
use crate::web::middleware::AdminEmail;
use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use ecos_core::domain::{EcosScenario, Rubric, ScenarioDraft};
use ecos_core::evaluation::{rubric_max, validate_rubric};
use ecos_core::ports::PortError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub patient_prompt: String,
    /// Criterion id -> maximum points.
    pub evaluation_criteria: BTreeMap<String, u32>,
}

impl ScenarioRequest {
    fn into_draft(self) -> Result<ScenarioDraft, PortError> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(PortError::Invalid("title cannot be empty".to_string()));
        }
        let patient_prompt = self.patient_prompt.trim().to_string();
        if patient_prompt.is_empty() {
            return Err(PortError::Invalid("patientPrompt cannot be empty".to_string()));
        }
        let evaluation_criteria: Rubric = self
            .evaluation_criteria
            .into_iter()
            .map(|(k, v)| (k.trim().to_string(), v))
            .collect();
        validate_rubric(&evaluation_criteria)?;

        Ok(ScenarioDraft {
            title,
            description: self.description.trim().to_string(),
            patient_prompt,
            evaluation_criteria,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioResponse {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub patient_prompt: String,
    pub evaluation_criteria: BTreeMap<String, u32>,
    pub max_score: u32,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

impl From<EcosScenario> for ScenarioResponse {
    fn from(s: EcosScenario) -> Self {
        Self {
            max_score: rubric_max(&s.evaluation_criteria),
            id: s.id,
            title: s.title,
            description: s.description,
            patient_prompt: s.patient_prompt,
            evaluation_criteria: s.evaluation_criteria,
            created_by: s.created_by,
            created_at: s.created_at,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ScenarioListResponse {
    pub scenarios: Vec<ScenarioResponse>,
}

/// GET /api/ecos/scenarios - All scenarios
#[utoipa::path(
    get,
    path = "/api/ecos/scenarios",
    params(("email" = String, Query, description = "Administrator email")),
    responses(
        (status = 200, description = "All scenarios", body = ScenarioListResponse),
        (status = 403, description = "Not an administrator")
    )
)]
pub async fn list_scenarios_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ScenarioListResponse>, HandlerError> {
    let scenarios = state
        .db
        .list_scenarios()
        .await
        .map_err(|e| port_failure("list scenarios", e))?;
    Ok(Json(ScenarioListResponse {
        scenarios: scenarios.into_iter().map(Into::into).collect(),
    }))
}

/// POST /api/ecos/scenarios - Author a scenario
#[utoipa::path(
    post,
    path = "/api/ecos/scenarios",
    request_body = ScenarioRequest,
    params(("email" = String, Query, description = "Administrator email")),
    responses(
        (status = 201, description = "Scenario created", body = ScenarioResponse),
        (status = 400, description = "Invalid scenario"),
        (status = 403, description = "Not an administrator")
    )
)]
pub async fn create_scenario_handler(
    State(state): State<Arc<AppState>>,
    Extension(AdminEmail(admin)): Extension<AdminEmail>,
    Json(req): Json<ScenarioRequest>,
) -> Result<(StatusCode, Json<ScenarioResponse>), HandlerError> {
    let draft = req
        .into_draft()
        .map_err(|e| port_failure("create scenario", e))?;
    let scenario = state
        .db
        .create_scenario(draft, &admin)
        .await
        .map_err(|e| port_failure("create scenario", e))?;
    info!("Scenario {} created by {}", scenario.id, admin);
    Ok((StatusCode::CREATED, Json(scenario.into())))
}

/// PUT /api/ecos/scenarios/{id} - Edit a scenario
#[utoipa::path(
    put,
    path = "/api/ecos/scenarios/{id}",
    request_body = ScenarioRequest,
    params(
        ("id" = Uuid, Path, description = "Scenario id"),
        ("email" = String, Query, description = "Administrator email")
    ),
    responses(
        (status = 200, description = "Scenario updated", body = ScenarioResponse),
        (status = 400, description = "Invalid scenario"),
        (status = 404, description = "No such scenario")
    )
)]
pub async fn update_scenario_handler(
    State(state): State<Arc<AppState>>,
    Extension(AdminEmail(admin)): Extension<AdminEmail>,
    Path(scenario_id): Path<Uuid>,
    Json(req): Json<ScenarioRequest>,
) -> Result<Json<ScenarioResponse>, HandlerError> {
    let draft = req
        .into_draft()
        .map_err(|e| port_failure("update scenario", e))?;
    let scenario = state
        .db
        .update_scenario(scenario_id, draft)
        .await
        .map_err(|e| port_failure("update scenario", e))?;
    info!("Scenario {} edited by {}", scenario_id, admin);
    Ok(Json(scenario.into()))
}

/// DELETE /api/ecos/scenarios/{id} - Remove a scenario that no session uses
#[utoipa::path(
    delete,
    path = "/api/ecos/scenarios/{id}",
    params(
        ("id" = Uuid, Path, description = "Scenario id"),
        ("email" = String, Query, description = "Administrator email")
    ),
    responses(
        (status = 204, description = "Scenario deleted"),
        (status = 404, description = "No such scenario"),
        (status = 409, description = "Exam sessions reference the scenario")
    )
)]
pub async fn delete_scenario_handler(
    State(state): State<Arc<AppState>>,
    Extension(AdminEmail(admin)): Extension<AdminEmail>,
    Path(scenario_id): Path<Uuid>,
) -> Result<StatusCode, HandlerError> {
    state
        .db
        .delete_scenario(scenario_id)
        .await
        .map_err(|e| port_failure("delete scenario", e))?;
    info!("Scenario {} deleted by {}", scenario_id, admin);
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestContext, ADMIN};

    fn request(criteria: &[(&str, u32)]) -> ScenarioRequest {
        ScenarioRequest {
            title: " Douleur thoracique ".to_string(),
            description: "Homme de 55 ans".to_string(),
            patient_prompt: "Vous avez mal dans la poitrine depuis ce matin.".to_string(),
            evaluation_criteria: criteria.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }

    fn admin() -> Extension<AdminEmail> {
        Extension(AdminEmail(ADMIN.to_string()))
    }

    #[tokio::test]
    async fn create_then_list() {
        let ctx = TestContext::new();
        let (status, Json(created)) = create_scenario_handler(
            State(ctx.state.clone()),
            admin(),
            Json(request(&[("anamnese", 20), ("examen_physique", 30)])),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created.title, "Douleur thoracique");
        assert_eq!(created.max_score, 50);
        assert_eq!(created.created_by, ADMIN);

        let Json(list) = list_scenarios_handler(State(ctx.state.clone())).await.unwrap();
        assert_eq!(list.scenarios.len(), 1);
    }

    #[tokio::test]
    async fn zero_weight_rubric_is_rejected() {
        let ctx = TestContext::new();
        let err = create_scenario_handler(
            State(ctx.state.clone()),
            admin(),
            Json(request(&[("anamnese", 0)])),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_rubric_is_rejected() {
        let ctx = TestContext::new();
        let err = create_scenario_handler(
            State(ctx.state.clone()),
            admin(),
            Json(request(&[("anamnese", 3_000_000_000), ("examen", 3_000_000_000)])),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn edit_replaces_the_rubric() {
        let ctx = TestContext::new();
        let scenario = ctx.seed_scenario(&[("anamnese", 20)]);
        let Json(updated) = update_scenario_handler(
            State(ctx.state.clone()),
            admin(),
            Path(scenario.id),
            Json(request(&[("communication", 10)])),
        )
        .await
        .unwrap();
        assert_eq!(updated.evaluation_criteria.len(), 1);
        assert_eq!(updated.evaluation_criteria["communication"], 10);
    }

    #[tokio::test]
    async fn referenced_scenario_cannot_be_deleted() {
        let ctx = TestContext::new();
        let used = ctx.seed_scenario(&[("anamnese", 20)]);
        let unused = ctx.seed_scenario(&[("anamnese", 20)]);
        ctx.seed_session(used.id, "student@fac.fr", Utc::now());

        let err = delete_scenario_handler(State(ctx.state.clone()), admin(), Path(used.id))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::CONFLICT);

        let status = delete_scenario_handler(State(ctx.state.clone()), admin(), Path(unused.id))
            .await
            .unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let missing = delete_scenario_handler(State(ctx.state.clone()), admin(), Path(unused.id))
            .await
            .unwrap_err();
        assert_eq!(missing.0, StatusCode::NOT_FOUND);
    }
}
