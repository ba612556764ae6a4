//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use chrono::Duration;
use ecos_core::lifecycle::SessionClock;
use ecos_core::ports::{
    DatabaseService, EvaluationService, KnowledgeBaseService, PatientSimulationService,
    QuestionAnsweringService,
};
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
    pub knowledge_base: Arc<dyn KnowledgeBaseService>,
    pub qa_adapter: Arc<dyn QuestionAnsweringService>,
    pub patient_adapter: Arc<dyn PatientSimulationService>,
    pub evaluator_adapter: Arc<dyn EvaluationService>,
}

impl AppState {
    /// The exam clock built from the configured time limit.
    pub fn session_clock(&self) -> SessionClock {
        SessionClock::new(Duration::minutes(self.config.ecos_session_minutes))
    }
}
