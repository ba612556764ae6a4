//! crates/ecos_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use crate::domain::{
    EcosMessage, EcosScenario, EcosSession, EvaluationDraft, Exchange, LmsSession, ScenarioDraft,
    SessionEvaluation, SessionStatus, TrainingSession, TrainingSessionDraft, User,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid input: {0}")]
    Invalid(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Users and LMS handoff ---
    async fn get_or_create_user(&self, email: &str) -> PortResult<User>;

    /// Creates the LMS session for `email`, or pushes the expiry of the existing one.
    async fn upsert_lms_session(
        &self,
        email: &str,
        expires_at: DateTime<Utc>,
    ) -> PortResult<LmsSession>;

    // --- Daily quota ---
    async fn get_daily_count(&self, email: &str, day: NaiveDate) -> PortResult<u32>;

    /// Counts `exchange` against the counter for `(email, day)` and stores it,
    /// both in one unit, unless the counter already reached `limit`. Returns the
    /// new count, or `None` when the limit refused it and nothing was stored.
    /// The counter never goes down.
    async fn record_exchange_within_quota(
        &self,
        exchange: Exchange,
        day: NaiveDate,
        limit: u32,
    ) -> PortResult<Option<u32>>;

    // --- Chat exchanges ---
    /// Newest first.
    async fn get_exchanges_for_user(&self, email: &str, limit: u32) -> PortResult<Vec<Exchange>>;

    // --- Scenarios ---
    async fn list_scenarios(&self) -> PortResult<Vec<EcosScenario>>;

    async fn get_scenario_by_id(&self, scenario_id: Uuid) -> PortResult<EcosScenario>;

    async fn create_scenario(
        &self,
        draft: ScenarioDraft,
        created_by: &str,
    ) -> PortResult<EcosScenario>;

    async fn update_scenario(
        &self,
        scenario_id: Uuid,
        draft: ScenarioDraft,
    ) -> PortResult<EcosScenario>;

    /// Fails with `PortError::Conflict` while any ECOS session references the scenario.
    async fn delete_scenario(&self, scenario_id: Uuid) -> PortResult<()>;

    // --- Training sessions ---
    async fn list_training_sessions(&self) -> PortResult<Vec<TrainingSession>>;

    async fn get_training_session_by_id(&self, training_id: Uuid) -> PortResult<TrainingSession>;

    async fn create_training_session(
        &self,
        draft: TrainingSessionDraft,
        created_by: &str,
    ) -> PortResult<TrainingSession>;

    /// Updates the fields and replaces both the scenario list and the roster.
    async fn update_training_session(
        &self,
        training_id: Uuid,
        draft: TrainingSessionDraft,
    ) -> PortResult<TrainingSession>;

    async fn delete_training_session(&self, training_id: Uuid) -> PortResult<()>;

    /// All training sessions whose roster contains `email`, regardless of dates.
    async fn get_training_sessions_for_student(
        &self,
        email: &str,
    ) -> PortResult<Vec<TrainingSession>>;

    // --- ECOS sessions ---
    async fn create_ecos_session(
        &self,
        scenario_id: Uuid,
        student_email: &str,
        training_session_id: Option<Uuid>,
        start_time: DateTime<Utc>,
    ) -> PortResult<EcosSession>;

    async fn get_ecos_session_by_id(&self, session_id: Uuid) -> PortResult<EcosSession>;

    /// Newest first; both filters are optional.
    async fn list_ecos_sessions(
        &self,
        student_email: Option<&str>,
        status: Option<SessionStatus>,
    ) -> PortResult<Vec<EcosSession>>;

    /// Moves an in-progress session to completed. Returns `None` when the
    /// session was already completed, so that exactly one caller wins.
    async fn complete_ecos_session(
        &self,
        session_id: Uuid,
        end_time: DateTime<Utc>,
    ) -> PortResult<Option<EcosSession>>;

    /// In-progress sessions started at or before `started_before`.
    async fn list_stale_ecos_sessions(
        &self,
        started_before: DateTime<Utc>,
    ) -> PortResult<Vec<EcosSession>>;

    // --- Transcripts ---
    async fn save_ecos_message(&self, message: EcosMessage) -> PortResult<()>;

    /// Oldest first.
    async fn get_ecos_messages(&self, session_id: Uuid) -> PortResult<Vec<EcosMessage>>;

    // --- Evaluations ---
    /// Stores the rubric rows and the report in one unit. Returns `false` and
    /// stores nothing when the session already has a report.
    async fn save_evaluation(&self, evaluation: SessionEvaluation) -> PortResult<bool>;

    async fn get_evaluation(&self, session_id: Uuid) -> PortResult<Option<SessionEvaluation>>;
}

#[async_trait]
pub trait KnowledgeBaseService: Send + Sync {
    /// Returns the text of the `top_k` passages most similar to `query`.
    async fn search(&self, query: &str, top_k: usize) -> PortResult<Vec<String>>;
}

#[async_trait]
pub trait QuestionAnsweringService: Send + Sync {
    /// Answers a question based on a provided context.
    async fn answer_question(&self, question: &str, context: &str) -> PortResult<String>;
}

#[async_trait]
pub trait PatientSimulationService: Send + Sync {
    /// Produces the patient's next line given the scenario and the transcript so far.
    async fn reply_as_patient(
        &self,
        scenario: &EcosScenario,
        transcript: &[EcosMessage],
    ) -> PortResult<String>;
}

#[async_trait]
pub trait EvaluationService: Send + Sync {
    /// Scores a finished transcript against the scenario rubric.
    async fn evaluate_transcript(
        &self,
        scenario: &EcosScenario,
        transcript: &[EcosMessage],
    ) -> PortResult<EvaluationDraft>;
}
