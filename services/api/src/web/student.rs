//! services/api/src/web/student.rs
//!
//! What a student can start right now.

use crate::error::{port_failure, HandlerError};
use crate::web::chat::EmailQuery;
use crate::web::middleware::require_email;
use crate::web::state::AppState;
use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use ecos_core::access::visible_scenarios;
use ecos_core::evaluation::rubric_max;
use ecos_core::ports::PortError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

/// A scenario as students see it. The patient script stays hidden.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AvailableScenario {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub evaluation_criteria: BTreeMap<String, u32>,
    pub max_score: u32,
    pub training_session_id: Uuid,
    pub training_session_title: String,
    pub available_until: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AvailableScenariosResponse {
    pub scenarios: Vec<AvailableScenario>,
}

/// GET /api/student/available-scenarios - Scenarios open to a student now
#[utoipa::path(
    get,
    path = "/api/student/available-scenarios",
    params(EmailQuery),
    responses(
        (status = 200, description = "Scenarios granted by currently open training sessions", body = AvailableScenariosResponse),
        (status = 400, description = "Missing or invalid email")
    )
)]
pub async fn available_scenarios_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EmailQuery>,
) -> Result<Json<AvailableScenariosResponse>, HandlerError> {
    let email = require_email(&query.email)?;
    let trainings = state
        .db
        .get_training_sessions_for_student(&email)
        .await
        .map_err(|e| port_failure("load training sessions", e))?;

    let mut scenarios = Vec::new();
    for grant in visible_scenarios(&trainings, &email, Utc::now()) {
        let scenario = match state.db.get_scenario_by_id(grant.scenario_id).await {
            Ok(s) => s,
            Err(PortError::NotFound(_)) => {
                warn!("Training session links missing scenario {}", grant.scenario_id);
                continue;
            }
            Err(e) => return Err(port_failure("load scenario", e)),
        };
        let training_session_title = trainings
            .iter()
            .find(|t| t.id == grant.training_session_id)
            .map(|t| t.title.clone())
            .unwrap_or_default();

        scenarios.push(AvailableScenario {
            max_score: rubric_max(&scenario.evaluation_criteria),
            id: scenario.id,
            title: scenario.title,
            description: scenario.description,
            evaluation_criteria: scenario.evaluation_criteria,
            training_session_id: grant.training_session_id,
            training_session_title,
            available_until: grant.available_until,
        });
    }

    Ok(Json(AvailableScenariosResponse { scenarios }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestContext, STUDENT};
    use chrono::Duration;

    async fn available(ctx: &TestContext, email: &str) -> Vec<AvailableScenario> {
        available_scenarios_handler(
            State(ctx.state.clone()),
            Query(EmailQuery {
                email: email.to_string(),
            }),
        )
        .await
        .unwrap()
        .0
        .scenarios
    }

    #[tokio::test]
    async fn only_open_windows_count() {
        let ctx = TestContext::new();
        let open = ctx.seed_scenario(&[("anamnese", 20)]);
        let closed = ctx.seed_scenario(&[("anamnese", 20)]);
        ctx.seed_training(&[open.id], &[STUDENT], Duration::days(1));
        ctx.seed_closed_training(&[closed.id], &[STUDENT]);

        let scenarios = available(&ctx, STUDENT).await;
        assert_eq!(scenarios.len(), 1);
        assert_eq!(scenarios[0].id, open.id);
        assert_eq!(scenarios[0].max_score, 20);
    }

    #[tokio::test]
    async fn overlapping_windows_list_a_scenario_once() {
        let ctx = TestContext::new();
        let scenario = ctx.seed_scenario(&[("anamnese", 20)]);
        ctx.seed_training(&[scenario.id], &[STUDENT], Duration::days(1));
        let longer = ctx.seed_training(&[scenario.id], &[STUDENT], Duration::days(10));

        let scenarios = available(&ctx, STUDENT).await;
        assert_eq!(scenarios.len(), 1);
        assert_eq!(scenarios[0].training_session_id, longer.id);
    }

    #[tokio::test]
    async fn students_off_the_roster_see_nothing() {
        let ctx = TestContext::new();
        let scenario = ctx.seed_scenario(&[("anamnese", 20)]);
        ctx.seed_training(&[scenario.id], &[STUDENT], Duration::days(1));
        assert!(available(&ctx, "other@fac.fr").await.is_empty());
    }
}
