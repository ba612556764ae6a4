//! services/api/src/test_support.rs
//!
//! In-memory stand-ins for every port, and a `TestContext` that wires them into
//! an `AppState` the handlers can be called with directly.

use crate::config::Config;
use crate::web::state::AppState;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use ecos_core::domain::{
    CriterionScore, EcosMessage, EcosScenario, EcosSession, EvaluationDraft, Exchange, LmsSession,
    ScenarioDraft, SessionEvaluation, SessionStatus, TrainingSession, TrainingSessionDraft, User,
};
use ecos_core::ports::{
    DatabaseService, EvaluationService, KnowledgeBaseService, PatientSimulationService, PortError,
    PortResult, QuestionAnsweringService,
};
use ecos_core::quota::quota_day;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const STUDENT: &str = "student@fac.fr";
pub const ADMIN: &str = "prof@fac.fr";

//=========================================================================================
// Test Context
//=========================================================================================

pub struct TestContext {
    pub state: Arc<AppState>,
    pub db: Arc<InMemoryDb>,
    pub knowledge_base: Arc<StubKnowledgeBase>,
    pub answers: Arc<StubAnswers>,
    pub patient: Arc<StubPatient>,
    pub evaluator: Arc<StubEvaluator>,
}

impl TestContext {
    pub fn new() -> Self {
        let db = Arc::new(InMemoryDb::default());
        let knowledge_base = Arc::new(StubKnowledgeBase::default());
        let answers = Arc::new(StubAnswers::default());
        let patient = Arc::new(StubPatient::default());
        let evaluator = Arc::new(StubEvaluator::default());

        let state = Arc::new(AppState {
            db: db.clone(),
            config: Arc::new(test_config()),
            knowledge_base: knowledge_base.clone(),
            qa_adapter: answers.clone(),
            patient_adapter: patient.clone(),
            evaluator_adapter: evaluator.clone(),
        });

        Self {
            state,
            db,
            knowledge_base,
            answers,
            patient,
            evaluator,
        }
    }

    pub fn seed_scenario(&self, criteria: &[(&str, u32)]) -> EcosScenario {
        let scenario = EcosScenario {
            id: Uuid::new_v4(),
            title: "Douleur thoracique".to_string(),
            description: "Homme de 55 ans aux urgences".to_string(),
            patient_prompt: "Vous avez une douleur oppressive depuis une heure.".to_string(),
            evaluation_criteria: criteria.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            created_by: ADMIN.to_string(),
            created_at: Utc::now(),
        };
        self.db.tables().scenarios.push(scenario.clone());
        scenario
    }

    pub fn seed_session(
        &self,
        scenario_id: Uuid,
        email: &str,
        start_time: DateTime<Utc>,
    ) -> EcosSession {
        let session = EcosSession {
            id: Uuid::new_v4(),
            scenario_id,
            student_email: email.to_string(),
            training_session_id: None,
            start_time,
            end_time: None,
            status: SessionStatus::InProgress,
        };
        self.db.tables().sessions.push(session.clone());
        session
    }

    /// A window that opened an hour ago and stays open for `open_for`.
    pub fn seed_training(
        &self,
        scenario_ids: &[Uuid],
        students: &[&str],
        open_for: Duration,
    ) -> TrainingSession {
        let now = Utc::now();
        self.insert_training(scenario_ids, students, now - Duration::hours(1), now + open_for)
    }

    /// A window that closed yesterday.
    pub fn seed_closed_training(&self, scenario_ids: &[Uuid], students: &[&str]) -> TrainingSession {
        let now = Utc::now();
        self.insert_training(
            scenario_ids,
            students,
            now - Duration::days(7),
            now - Duration::days(1),
        )
    }

    fn insert_training(
        &self,
        scenario_ids: &[Uuid],
        students: &[&str],
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> TrainingSession {
        let training = TrainingSession {
            id: Uuid::new_v4(),
            title: "Module cardiologie".to_string(),
            description: String::new(),
            start_date,
            end_date,
            created_by: ADMIN.to_string(),
            created_at: Utc::now(),
            scenario_ids: scenario_ids.to_vec(),
            student_emails: students.iter().map(|s| s.to_string()).collect(),
        };
        self.db.tables().trainings.push(training.clone());
        training
    }
}

fn test_config() -> Config {
    Config {
        bind_address: "127.0.0.1:0".parse().unwrap(),
        database_url: "postgres://unused".to_string(),
        log_level: tracing::Level::DEBUG,
        cors_origin: "http://localhost:3000".to_string(),
        openai_api_key: None,
        chat_model: "test-chat".to_string(),
        patient_model: "test-patient".to_string(),
        evaluation_model: "test-evaluator".to_string(),
        embedding_model: "test-embedding".to_string(),
        pinecone_api_key: None,
        pinecone_index_host: None,
        retrieval_top_k: 3,
        max_daily_questions: 20,
        ecos_session_minutes: 8,
        ecos_sweep_interval_secs: 30,
        lms_session_hours: 24,
        history_limit: 50,
        admin_emails: HashSet::from([ADMIN.to_string()]),
    }
}

//=========================================================================================
// In-memory Database
//=========================================================================================

#[derive(Default)]
struct Tables {
    users: HashMap<String, User>,
    lms_sessions: HashMap<String, LmsSession>,
    counters: HashMap<(String, NaiveDate), u32>,
    exchanges: Vec<Exchange>,
    scenarios: Vec<EcosScenario>,
    trainings: Vec<TrainingSession>,
    sessions: Vec<EcosSession>,
    messages: Vec<EcosMessage>,
    evaluations: HashMap<Uuid, SessionEvaluation>,
}

/// Follows the same rules as the Postgres adapter, including the conditional
/// updates that make completion and evaluation happen once.
#[derive(Default)]
pub struct InMemoryDb {
    tables: Mutex<Tables>,
}

impl InMemoryDb {
    fn tables(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap()
    }

    pub fn count_today(&self, email: &str) -> u32 {
        let key = (email.to_string(), quota_day(Utc::now()));
        self.tables().counters.get(&key).copied().unwrap_or(0)
    }

    pub fn has_user(&self, email: &str) -> bool {
        self.tables().users.contains_key(email)
    }
}

fn check_scenarios_exist(tables: &Tables, ids: &[Uuid]) -> PortResult<()> {
    match ids
        .iter()
        .find(|id| !tables.scenarios.iter().any(|s| s.id == **id))
    {
        Some(missing) => Err(PortError::Invalid(format!(
            "Scenario {} does not exist",
            missing
        ))),
        None => Ok(()),
    }
}

#[async_trait]
impl DatabaseService for InMemoryDb {
    async fn get_or_create_user(&self, email: &str) -> PortResult<User> {
        let mut t = self.tables();
        let user = t.users.entry(email.to_string()).or_insert_with(|| User {
            email: email.to_string(),
            created_at: Utc::now(),
        });
        Ok(user.clone())
    }

    async fn upsert_lms_session(
        &self,
        email: &str,
        expires_at: DateTime<Utc>,
    ) -> PortResult<LmsSession> {
        let mut t = self.tables();
        let session = t
            .lms_sessions
            .entry(email.to_string())
            .or_insert_with(|| LmsSession {
                id: Uuid::new_v4(),
                email: email.to_string(),
                created_at: Utc::now(),
                expires_at,
            });
        session.expires_at = expires_at;
        Ok(session.clone())
    }

    async fn get_daily_count(&self, email: &str, day: NaiveDate) -> PortResult<u32> {
        let t = self.tables();
        Ok(t.counters.get(&(email.to_string(), day)).copied().unwrap_or(0))
    }

    async fn record_exchange_within_quota(
        &self,
        exchange: Exchange,
        day: NaiveDate,
        limit: u32,
    ) -> PortResult<Option<u32>> {
        let mut t = self.tables();
        let count = t.counters.entry((exchange.email.clone(), day)).or_insert(0);
        if *count >= limit {
            return Ok(None);
        }
        *count += 1;
        let count = *count;
        t.exchanges.push(exchange);
        Ok(Some(count))
    }

    async fn get_exchanges_for_user(&self, email: &str, limit: u32) -> PortResult<Vec<Exchange>> {
        let t = self.tables();
        let mut exchanges: Vec<Exchange> = t
            .exchanges
            .iter()
            .rev()
            .filter(|e| e.email == email)
            .cloned()
            .collect();
        exchanges.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        exchanges.truncate(limit as usize);
        Ok(exchanges)
    }

    async fn list_scenarios(&self) -> PortResult<Vec<EcosScenario>> {
        let t = self.tables();
        let mut scenarios: Vec<EcosScenario> = t.scenarios.iter().rev().cloned().collect();
        scenarios.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(scenarios)
    }

    async fn get_scenario_by_id(&self, scenario_id: Uuid) -> PortResult<EcosScenario> {
        self.tables()
            .scenarios
            .iter()
            .find(|s| s.id == scenario_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Scenario {} not found", scenario_id)))
    }

    async fn create_scenario(
        &self,
        draft: ScenarioDraft,
        created_by: &str,
    ) -> PortResult<EcosScenario> {
        let scenario = EcosScenario {
            id: Uuid::new_v4(),
            title: draft.title,
            description: draft.description,
            patient_prompt: draft.patient_prompt,
            evaluation_criteria: draft.evaluation_criteria,
            created_by: created_by.to_string(),
            created_at: Utc::now(),
        };
        self.tables().scenarios.push(scenario.clone());
        Ok(scenario)
    }

    async fn update_scenario(
        &self,
        scenario_id: Uuid,
        draft: ScenarioDraft,
    ) -> PortResult<EcosScenario> {
        let mut t = self.tables();
        let scenario = t
            .scenarios
            .iter_mut()
            .find(|s| s.id == scenario_id)
            .ok_or_else(|| PortError::NotFound(format!("Scenario {} not found", scenario_id)))?;
        scenario.title = draft.title;
        scenario.description = draft.description;
        scenario.patient_prompt = draft.patient_prompt;
        scenario.evaluation_criteria = draft.evaluation_criteria;
        Ok(scenario.clone())
    }

    async fn delete_scenario(&self, scenario_id: Uuid) -> PortResult<()> {
        let mut t = self.tables();
        if !t.scenarios.iter().any(|s| s.id == scenario_id) {
            return Err(PortError::NotFound(format!("Scenario {} not found", scenario_id)));
        }
        if t.sessions.iter().any(|s| s.scenario_id == scenario_id) {
            return Err(PortError::Conflict(format!(
                "Scenario {} is used by exam sessions",
                scenario_id
            )));
        }
        t.scenarios.retain(|s| s.id != scenario_id);
        for training in t.trainings.iter_mut() {
            training.scenario_ids.retain(|id| *id != scenario_id);
        }
        Ok(())
    }

    async fn list_training_sessions(&self) -> PortResult<Vec<TrainingSession>> {
        let mut trainings = self.tables().trainings.clone();
        trainings.sort_by(|a, b| b.start_date.cmp(&a.start_date));
        Ok(trainings)
    }

    async fn get_training_session_by_id(&self, training_id: Uuid) -> PortResult<TrainingSession> {
        self.tables()
            .trainings
            .iter()
            .find(|t| t.id == training_id)
            .cloned()
            .ok_or_else(|| {
                PortError::NotFound(format!("Training session {} not found", training_id))
            })
    }

    async fn create_training_session(
        &self,
        draft: TrainingSessionDraft,
        created_by: &str,
    ) -> PortResult<TrainingSession> {
        let mut t = self.tables();
        check_scenarios_exist(&t, &draft.scenario_ids)?;
        let training = TrainingSession {
            id: Uuid::new_v4(),
            title: draft.title,
            description: draft.description,
            start_date: draft.start_date,
            end_date: draft.end_date,
            created_by: created_by.to_string(),
            created_at: Utc::now(),
            scenario_ids: draft.scenario_ids,
            student_emails: draft.student_emails,
        };
        t.trainings.push(training.clone());
        Ok(training)
    }

    async fn update_training_session(
        &self,
        training_id: Uuid,
        draft: TrainingSessionDraft,
    ) -> PortResult<TrainingSession> {
        let mut t = self.tables();
        check_scenarios_exist(&t, &draft.scenario_ids)?;
        let training = t
            .trainings
            .iter_mut()
            .find(|tr| tr.id == training_id)
            .ok_or_else(|| {
                PortError::NotFound(format!("Training session {} not found", training_id))
            })?;
        training.title = draft.title;
        training.description = draft.description;
        training.start_date = draft.start_date;
        training.end_date = draft.end_date;
        training.scenario_ids = draft.scenario_ids;
        training.student_emails = draft.student_emails;
        Ok(training.clone())
    }

    async fn delete_training_session(&self, training_id: Uuid) -> PortResult<()> {
        let mut t = self.tables();
        if !t.trainings.iter().any(|tr| tr.id == training_id) {
            return Err(PortError::NotFound(format!(
                "Training session {} not found",
                training_id
            )));
        }
        t.trainings.retain(|tr| tr.id != training_id);
        for session in t.sessions.iter_mut() {
            if session.training_session_id == Some(training_id) {
                session.training_session_id = None;
            }
        }
        Ok(())
    }

    async fn get_training_sessions_for_student(
        &self,
        email: &str,
    ) -> PortResult<Vec<TrainingSession>> {
        let t = self.tables();
        Ok(t.trainings
            .iter()
            .filter(|tr| tr.student_emails.iter().any(|s| s == email))
            .cloned()
            .collect())
    }

    async fn create_ecos_session(
        &self,
        scenario_id: Uuid,
        student_email: &str,
        training_session_id: Option<Uuid>,
        start_time: DateTime<Utc>,
    ) -> PortResult<EcosSession> {
        let mut t = self.tables();
        if !t.scenarios.iter().any(|s| s.id == scenario_id) {
            return Err(PortError::NotFound(format!("Scenario {} not found", scenario_id)));
        }
        let session = EcosSession {
            id: Uuid::new_v4(),
            scenario_id,
            student_email: student_email.to_string(),
            training_session_id,
            start_time,
            end_time: None,
            status: SessionStatus::InProgress,
        };
        t.sessions.push(session.clone());
        Ok(session)
    }

    async fn get_ecos_session_by_id(&self, session_id: Uuid) -> PortResult<EcosSession> {
        self.tables()
            .sessions
            .iter()
            .find(|s| s.id == session_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))
    }

    async fn list_ecos_sessions(
        &self,
        student_email: Option<&str>,
        status: Option<SessionStatus>,
    ) -> PortResult<Vec<EcosSession>> {
        let t = self.tables();
        let mut sessions: Vec<EcosSession> = t
            .sessions
            .iter()
            .rev()
            .filter(|s| student_email.map_or(true, |e| s.student_email == e))
            .filter(|s| status.map_or(true, |st| s.status == st))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(sessions)
    }

    async fn complete_ecos_session(
        &self,
        session_id: Uuid,
        end_time: DateTime<Utc>,
    ) -> PortResult<Option<EcosSession>> {
        let mut t = self.tables();
        let session = t
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| PortError::NotFound(format!("Session {} not found", session_id)))?;
        if !session.is_in_progress() {
            return Ok(None);
        }
        session.status = SessionStatus::Completed;
        session.end_time = Some(end_time);
        Ok(Some(session.clone()))
    }

    async fn list_stale_ecos_sessions(
        &self,
        started_before: DateTime<Utc>,
    ) -> PortResult<Vec<EcosSession>> {
        let t = self.tables();
        Ok(t.sessions
            .iter()
            .filter(|s| s.is_in_progress() && s.start_time <= started_before)
            .cloned()
            .collect())
    }

    async fn save_ecos_message(&self, message: EcosMessage) -> PortResult<()> {
        self.tables().messages.push(message);
        Ok(())
    }

    async fn get_ecos_messages(&self, session_id: Uuid) -> PortResult<Vec<EcosMessage>> {
        let t = self.tables();
        let mut messages: Vec<EcosMessage> = t
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }

    async fn save_evaluation(&self, evaluation: SessionEvaluation) -> PortResult<bool> {
        let mut t = self.tables();
        let session_id = evaluation.report.session_id;
        if t.evaluations.contains_key(&session_id) {
            return Ok(false);
        }
        t.evaluations.insert(session_id, evaluation);
        Ok(true)
    }

    async fn get_evaluation(&self, session_id: Uuid) -> PortResult<Option<SessionEvaluation>> {
        Ok(self.tables().evaluations.get(&session_id).cloned())
    }
}

//=========================================================================================
// Stub Model Ports
//=========================================================================================

#[derive(Default)]
pub struct StubKnowledgeBase {
    passages: Mutex<Vec<String>>,
}

impl StubKnowledgeBase {
    pub fn set_passages(&self, passages: Vec<&str>) {
        *self.passages.lock().unwrap() = passages.into_iter().map(str::to_string).collect();
    }
}

#[async_trait]
impl KnowledgeBaseService for StubKnowledgeBase {
    async fn search(&self, _query: &str, top_k: usize) -> PortResult<Vec<String>> {
        let passages = self.passages.lock().unwrap();
        Ok(passages.iter().take(top_k).cloned().collect())
    }
}

/// Echoes the question and the context it was given.
#[derive(Default)]
pub struct StubAnswers {
    calls: AtomicUsize,
    fail_next: AtomicBool,
}

impl StubAnswers {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl QuestionAnsweringService for StubAnswers {
    async fn answer_question(&self, question: &str, context: &str) -> PortResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(PortError::Unexpected("model unavailable".to_string()));
        }
        Ok(format!("Answer to '{}' from: {}", question, context))
    }
}

#[derive(Default)]
pub struct StubPatient {
    last_transcript_len: AtomicUsize,
    fail_next: AtomicBool,
    delay: Mutex<Option<std::time::Duration>>,
}

impl StubPatient {
    /// Makes every following reply take `delay`.
    pub fn set_delay(&self, delay: std::time::Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn last_transcript_len(&self) -> usize {
        self.last_transcript_len.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PatientSimulationService for StubPatient {
    async fn reply_as_patient(
        &self,
        _scenario: &EcosScenario,
        transcript: &[EcosMessage],
    ) -> PortResult<String> {
        self.last_transcript_len
            .store(transcript.len(), Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(PortError::Unexpected("model unavailable".to_string()));
        }
        Ok(format!("J'ai mal depuis ce matin. ({} lignes)", transcript.len()))
    }
}

/// Returns whatever scores were last set, for any transcript.
#[derive(Default)]
pub struct StubEvaluator {
    scores: Mutex<Vec<CriterionScore>>,
    calls: AtomicUsize,
    fail_next: AtomicBool,
}

impl StubEvaluator {
    pub fn set_scores(&self, scores: &[(&str, f64)]) {
        *self.scores.lock().unwrap() = scores
            .iter()
            .map(|(id, score)| CriterionScore {
                criterion_id: id.to_string(),
                score: *score,
                feedback: format!("{} observed", id),
            })
            .collect();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl EvaluationService for StubEvaluator {
    async fn evaluate_transcript(
        &self,
        _scenario: &EcosScenario,
        _transcript: &[EcosMessage],
    ) -> PortResult<EvaluationDraft> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(PortError::Unexpected("model unavailable".to_string()));
        }
        Ok(EvaluationDraft {
            scores: self.scores.lock().unwrap().clone(),
            summary: "Examen correct".to_string(),
            strengths: vec!["Anamnèse structurée".to_string()],
            weaknesses: vec!["Examen incomplet".to_string()],
            recommendations: vec!["Ausculter systématiquement".to_string()],
        })
    }
}
