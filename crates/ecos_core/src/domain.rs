//! crates/ecos_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A learner or teacher known to the service. Identity is owned by the LMS,
/// so the email is the only key.
#[derive(Debug, Clone)]
pub struct User {
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// The per-user counter for one calendar day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyCounter {
    pub email: String,
    pub day: NaiveDate,
    pub count: u32,
}

/// A single question-and-answer turn in the general chat.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub id: Uuid,
    pub email: String,
    pub question: String,
    pub response: String,
    pub created_at: DateTime<Utc>,
}

/// A browser session handed over by the LMS webhook.
#[derive(Debug, Clone)]
pub struct LmsSession {
    pub id: Uuid,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Weighted rubric: criterion id -> maximum points.
pub type Rubric = BTreeMap<String, u32>;

/// A teacher-authored clinical case.
#[derive(Debug, Clone, PartialEq)]
pub struct EcosScenario {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub patient_prompt: String,
    pub evaluation_criteria: Rubric,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// The editable fields of a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioDraft {
    pub title: String,
    pub description: String,
    pub patient_prompt: String,
    pub evaluation_criteria: Rubric,
}

/// A time-boxed enrollment window grouping scenarios and students.
#[derive(Debug, Clone)]
pub struct TrainingSession {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub scenario_ids: Vec<Uuid>,
    pub student_emails: Vec<String>,
}

/// The editable fields of a training session, including both rosters.
#[derive(Debug, Clone)]
pub struct TrainingSessionDraft {
    pub title: String,
    pub description: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub scenario_ids: Vec<Uuid>,
    pub student_emails: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    InProgress,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(SessionStatus::InProgress),
            "completed" => Ok(SessionStatus::Completed),
            other => Err(format!("unknown session status '{}'", other)),
        }
    }
}

/// One simulated exam attempt by one student on one scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct EcosSession {
    pub id: Uuid,
    pub scenario_id: Uuid,
    pub student_email: String,
    pub training_session_id: Option<Uuid>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: SessionStatus,
}

impl EcosSession {
    pub fn is_in_progress(&self) -> bool {
        self.status == SessionStatus::InProgress
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            other => Err(format!("unknown message role '{}'", other)),
        }
    }
}

/// A single transcript entry of an ECOS session.
#[derive(Debug, Clone)]
pub struct EcosMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A score for one rubric criterion, as proposed by the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct CriterionScore {
    pub criterion_id: String,
    pub score: f64,
    pub feedback: String,
}

/// The raw output of the evaluation model before it is checked against the rubric.
#[derive(Debug, Clone, Default)]
pub struct EvaluationDraft {
    pub scores: Vec<CriterionScore>,
    pub summary: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub recommendations: Vec<String>,
}

/// One persisted rubric row.
#[derive(Debug, Clone, PartialEq)]
pub struct EcosEvaluation {
    pub session_id: Uuid,
    pub criterion_id: String,
    pub score: f64,
    pub feedback: String,
}

/// The narrative report generated once per completed session.
#[derive(Debug, Clone, PartialEq)]
pub struct EcosReport {
    pub session_id: Uuid,
    pub summary: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub recommendations: Vec<String>,
    pub total_score: f64,
    pub max_score: u32,
    pub percentage: f64,
    pub created_at: DateTime<Utc>,
}

/// Everything stored about the evaluation of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEvaluation {
    pub criteria: Vec<EcosEvaluation>,
    pub report: EcosReport,
}

/// A scenario a student may currently start, and the window that grants it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioGrant {
    pub scenario_id: Uuid,
    pub training_session_id: Uuid,
    pub available_until: DateTime<Utc>,
}
