//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use ecos_core::domain::{
    DailyCounter, EcosEvaluation, EcosMessage, EcosReport, EcosScenario, EcosSession, Exchange,
    LmsSession, MessageRole, Rubric, ScenarioDraft, SessionEvaluation, SessionStatus,
    TrainingSession, TrainingSessionDraft, User,
};
use ecos_core::ports::{DatabaseService, PortError, PortResult};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Attaches the scenario lists and rosters to a batch of training rows.
    async fn hydrate_trainings(
        &self,
        records: Vec<TrainingSessionRecord>,
    ) -> PortResult<Vec<TrainingSession>> {
        let ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();

        let scenario_links = sqlx::query_as::<_, (Uuid, Uuid)>(
            "SELECT training_session_id, scenario_id FROM training_session_scenarios \
             WHERE training_session_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let roster_links = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT training_session_id, student_email FROM training_session_students \
             WHERE training_session_id = ANY($1) ORDER BY student_email ASC",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let mut scenarios: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for (training_id, scenario_id) in scenario_links {
            scenarios.entry(training_id).or_default().push(scenario_id);
        }
        let mut students: HashMap<Uuid, Vec<String>> = HashMap::new();
        for (training_id, email) in roster_links {
            students.entry(training_id).or_default().push(email);
        }

        Ok(records
            .into_iter()
            .map(|r| {
                let scenario_ids = scenarios.remove(&r.id).unwrap_or_default();
                let student_emails = students.remove(&r.id).unwrap_or_default();
                r.to_domain(scenario_ids, student_emails)
            })
            .collect())
    }

    async fn replace_training_links(
        tx: &mut Transaction<'_, Postgres>,
        training_id: Uuid,
        draft: &TrainingSessionDraft,
    ) -> PortResult<()> {
        sqlx::query("DELETE FROM training_session_scenarios WHERE training_session_id = $1")
            .bind(training_id)
            .execute(&mut **tx)
            .await
            .map_err(unexpected)?;
        sqlx::query("DELETE FROM training_session_students WHERE training_session_id = $1")
            .bind(training_id)
            .execute(&mut **tx)
            .await
            .map_err(unexpected)?;

        for scenario_id in &draft.scenario_ids {
            sqlx::query(
                "INSERT INTO training_session_scenarios (training_session_id, scenario_id) \
                 VALUES ($1, $2)",
            )
            .bind(training_id)
            .bind(scenario_id)
            .execute(&mut **tx)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    PortError::Invalid(format!("Scenario {} does not exist", scenario_id))
                } else {
                    unexpected(e)
                }
            })?;
        }
        for email in &draft.student_emails {
            sqlx::query(
                "INSERT INTO training_session_students (training_session_id, student_email) \
                 VALUES ($1, $2)",
            )
            .bind(training_id)
            .bind(email)
            .execute(&mut **tx)
            .await
            .map_err(unexpected)?;
        }
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

fn not_found_or_unexpected(e: sqlx::Error, what: String) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what),
        _ => unexpected(e),
    }
}

fn is_foreign_key_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|d| d.code())
        .map_or(false, |code| code == "23503")
}

const SCENARIO_COLUMNS: &str =
    "id, title, description, patient_prompt, evaluation_criteria, created_by, created_at";
const TRAINING_COLUMNS: &str =
    "id, title, description, start_date, end_date, created_by, created_at";
const SESSION_COLUMNS: &str =
    "id, scenario_id, student_email, training_session_id, start_time, end_time, status";

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    email: String,
    created_at: DateTime<Utc>,
}
impl UserRecord {
    fn to_domain(self) -> User {
        User {
            email: self.email,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct LmsSessionRecord {
    id: Uuid,
    email: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}
impl LmsSessionRecord {
    fn to_domain(self) -> LmsSession {
        LmsSession {
            id: self.id,
            email: self.email,
            created_at: self.created_at,
            expires_at: self.expires_at,
        }
    }
}

#[derive(FromRow)]
struct DailyCounterRecord {
    email: String,
    day: NaiveDate,
    count: i32,
}
impl DailyCounterRecord {
    fn to_domain(self) -> DailyCounter {
        DailyCounter {
            email: self.email,
            day: self.day,
            count: self.count.max(0) as u32,
        }
    }
}

#[derive(FromRow)]
struct ExchangeRecord {
    id: Uuid,
    email: String,
    question: String,
    response: String,
    created_at: DateTime<Utc>,
}
impl ExchangeRecord {
    fn to_domain(self) -> Exchange {
        Exchange {
            id: self.id,
            email: self.email,
            question: self.question,
            response: self.response,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct ScenarioRecord {
    id: Uuid,
    title: String,
    description: String,
    patient_prompt: String,
    evaluation_criteria: Json<Rubric>,
    created_by: String,
    created_at: DateTime<Utc>,
}
impl ScenarioRecord {
    fn to_domain(self) -> EcosScenario {
        EcosScenario {
            id: self.id,
            title: self.title,
            description: self.description,
            patient_prompt: self.patient_prompt,
            evaluation_criteria: self.evaluation_criteria.0,
            created_by: self.created_by,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct TrainingSessionRecord {
    id: Uuid,
    title: String,
    description: String,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    created_by: String,
    created_at: DateTime<Utc>,
}
impl TrainingSessionRecord {
    fn to_domain(self, scenario_ids: Vec<Uuid>, student_emails: Vec<String>) -> TrainingSession {
        TrainingSession {
            id: self.id,
            title: self.title,
            description: self.description,
            start_date: self.start_date,
            end_date: self.end_date,
            created_by: self.created_by,
            created_at: self.created_at,
            scenario_ids,
            student_emails,
        }
    }
}

#[derive(FromRow)]
struct EcosSessionRecord {
    id: Uuid,
    scenario_id: Uuid,
    student_email: String,
    training_session_id: Option<Uuid>,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    status: String,
}
impl EcosSessionRecord {
    fn to_domain(self) -> PortResult<EcosSession> {
        Ok(EcosSession {
            id: self.id,
            scenario_id: self.scenario_id,
            student_email: self.student_email,
            training_session_id: self.training_session_id,
            start_time: self.start_time,
            end_time: self.end_time,
            status: self.status.parse().map_err(PortError::Unexpected)?,
        })
    }
}

#[derive(FromRow)]
struct EcosMessageRecord {
    id: Uuid,
    session_id: Uuid,
    role: String,
    content: String,
    created_at: DateTime<Utc>,
}
impl EcosMessageRecord {
    fn to_domain(self) -> PortResult<EcosMessage> {
        Ok(EcosMessage {
            id: self.id,
            session_id: self.session_id,
            role: self.role.parse::<MessageRole>().map_err(PortError::Unexpected)?,
            content: self.content,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct EvaluationRecord {
    session_id: Uuid,
    criterion_id: String,
    score: f64,
    feedback: String,
}
impl EvaluationRecord {
    fn to_domain(self) -> EcosEvaluation {
        EcosEvaluation {
            session_id: self.session_id,
            criterion_id: self.criterion_id,
            score: self.score,
            feedback: self.feedback,
        }
    }
}

#[derive(FromRow)]
struct ReportRecord {
    session_id: Uuid,
    summary: String,
    strengths: Vec<String>,
    weaknesses: Vec<String>,
    recommendations: Vec<String>,
    total_score: f64,
    max_score: i32,
    percentage: f64,
    created_at: DateTime<Utc>,
}
impl ReportRecord {
    fn to_domain(self) -> EcosReport {
        EcosReport {
            session_id: self.session_id,
            summary: self.summary,
            strengths: self.strengths,
            weaknesses: self.weaknesses,
            recommendations: self.recommendations,
            total_score: self.total_score,
            max_score: self.max_score.max(0) as u32,
            percentage: self.percentage,
            created_at: self.created_at,
        }
    }
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn get_or_create_user(&self, email: &str) -> PortResult<User> {
        sqlx::query("INSERT INTO users (email) VALUES ($1) ON CONFLICT (email) DO NOTHING")
            .bind(email)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;

        let record = sqlx::query_as::<_, UserRecord>(
            "SELECT email, created_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found_or_unexpected(e, format!("User {} not found", email)))?;

        Ok(record.to_domain())
    }

    async fn upsert_lms_session(
        &self,
        email: &str,
        expires_at: DateTime<Utc>,
    ) -> PortResult<LmsSession> {
        let record = sqlx::query_as::<_, LmsSessionRecord>(
            "INSERT INTO lms_sessions (id, email, expires_at) VALUES ($1, $2, $3) \
             ON CONFLICT (email) DO UPDATE SET expires_at = EXCLUDED.expires_at \
             RETURNING id, email, created_at, expires_at",
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_daily_count(&self, email: &str, day: NaiveDate) -> PortResult<u32> {
        let record = sqlx::query_as::<_, DailyCounterRecord>(
            "SELECT email, day, count FROM daily_counters WHERE email = $1 AND day = $2",
        )
        .bind(email)
        .bind(day)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map_or(0, |r| r.to_domain().count))
    }

    async fn record_exchange_within_quota(
        &self,
        exchange: Exchange,
        day: NaiveDate,
        limit: u32,
    ) -> PortResult<Option<u32>> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        // The row lock taken by the upsert serializes concurrent askers until
        // commit, and the WHERE clause refuses the slot past the limit.
        let count = sqlx::query_scalar::<_, i32>(
            "INSERT INTO daily_counters (email, day, count) VALUES ($1, $2, 1) \
             ON CONFLICT (email, day) DO UPDATE SET count = daily_counters.count + 1 \
             WHERE daily_counters.count < $3 \
             RETURNING count",
        )
        .bind(&exchange.email)
        .bind(day)
        .bind(i32::try_from(limit).unwrap_or(i32::MAX))
        .fetch_optional(&mut *tx)
        .await
        .map_err(unexpected)?;

        let Some(count) = count else {
            tx.rollback().await.map_err(unexpected)?;
            return Ok(None);
        };

        sqlx::query(
            "INSERT INTO exchanges (id, email, question, response, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(exchange.id)
        .bind(&exchange.email)
        .bind(&exchange.question)
        .bind(&exchange.response)
        .bind(exchange.created_at)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?;

        tx.commit().await.map_err(unexpected)?;
        Ok(Some(count.max(0) as u32))
    }

    async fn get_exchanges_for_user(&self, email: &str, limit: u32) -> PortResult<Vec<Exchange>> {
        let records = sqlx::query_as::<_, ExchangeRecord>(
            "SELECT id, email, question, response, created_at FROM exchanges \
             WHERE email = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(email)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn list_scenarios(&self) -> PortResult<Vec<EcosScenario>> {
        let records = sqlx::query_as::<_, ScenarioRecord>(&format!(
            "SELECT {} FROM ecos_scenarios ORDER BY created_at DESC",
            SCENARIO_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn get_scenario_by_id(&self, scenario_id: Uuid) -> PortResult<EcosScenario> {
        let record = sqlx::query_as::<_, ScenarioRecord>(&format!(
            "SELECT {} FROM ecos_scenarios WHERE id = $1",
            SCENARIO_COLUMNS
        ))
        .bind(scenario_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found_or_unexpected(e, format!("Scenario {} not found", scenario_id)))?;
        Ok(record.to_domain())
    }

    async fn create_scenario(
        &self,
        draft: ScenarioDraft,
        created_by: &str,
    ) -> PortResult<EcosScenario> {
        let record = sqlx::query_as::<_, ScenarioRecord>(&format!(
            "INSERT INTO ecos_scenarios \
             (id, title, description, patient_prompt, evaluation_criteria, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            SCENARIO_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(&draft.patient_prompt)
        .bind(Json(&draft.evaluation_criteria))
        .bind(created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn update_scenario(
        &self,
        scenario_id: Uuid,
        draft: ScenarioDraft,
    ) -> PortResult<EcosScenario> {
        let record = sqlx::query_as::<_, ScenarioRecord>(&format!(
            "UPDATE ecos_scenarios SET title = $2, description = $3, patient_prompt = $4, \
             evaluation_criteria = $5 WHERE id = $1 RETURNING {}",
            SCENARIO_COLUMNS
        ))
        .bind(scenario_id)
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(&draft.patient_prompt)
        .bind(Json(&draft.evaluation_criteria))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found_or_unexpected(e, format!("Scenario {} not found", scenario_id)))?;
        Ok(record.to_domain())
    }

    async fn delete_scenario(&self, scenario_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM ecos_scenarios WHERE id = $1")
            .bind(scenario_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_foreign_key_violation(&e) {
                    PortError::Conflict(format!(
                        "Scenario {} is referenced by exam sessions",
                        scenario_id
                    ))
                } else {
                    unexpected(e)
                }
            })?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Scenario {} not found", scenario_id)));
        }
        Ok(())
    }

    async fn list_training_sessions(&self) -> PortResult<Vec<TrainingSession>> {
        let records = sqlx::query_as::<_, TrainingSessionRecord>(&format!(
            "SELECT {} FROM training_sessions ORDER BY start_date DESC",
            TRAINING_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        self.hydrate_trainings(records).await
    }

    async fn get_training_session_by_id(&self, training_id: Uuid) -> PortResult<TrainingSession> {
        let record = sqlx::query_as::<_, TrainingSessionRecord>(&format!(
            "SELECT {} FROM training_sessions WHERE id = $1",
            TRAINING_COLUMNS
        ))
        .bind(training_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            not_found_or_unexpected(e, format!("Training session {} not found", training_id))
        })?;
        let mut hydrated = self.hydrate_trainings(vec![record]).await?;
        hydrated
            .pop()
            .ok_or_else(|| PortError::NotFound(format!("Training session {} not found", training_id)))
    }

    async fn create_training_session(
        &self,
        draft: TrainingSessionDraft,
        created_by: &str,
    ) -> PortResult<TrainingSession> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let record = sqlx::query_as::<_, TrainingSessionRecord>(&format!(
            "INSERT INTO training_sessions \
             (id, title, description, start_date, end_date, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            TRAINING_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(draft.start_date)
        .bind(draft.end_date)
        .bind(created_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(unexpected)?;

        Self::replace_training_links(&mut tx, record.id, &draft).await?;
        tx.commit().await.map_err(unexpected)?;

        Ok(record.to_domain(draft.scenario_ids, draft.student_emails))
    }

    async fn update_training_session(
        &self,
        training_id: Uuid,
        draft: TrainingSessionDraft,
    ) -> PortResult<TrainingSession> {
        let mut tx = self.pool.begin().await.map_err(unexpected)?;
        let record = sqlx::query_as::<_, TrainingSessionRecord>(&format!(
            "UPDATE training_sessions SET title = $2, description = $3, start_date = $4, \
             end_date = $5 WHERE id = $1 RETURNING {}",
            TRAINING_COLUMNS
        ))
        .bind(training_id)
        .bind(&draft.title)
        .bind(&draft.description)
        .bind(draft.start_date)
        .bind(draft.end_date)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            not_found_or_unexpected(e, format!("Training session {} not found", training_id))
        })?;

        Self::replace_training_links(&mut tx, training_id, &draft).await?;
        tx.commit().await.map_err(unexpected)?;

        Ok(record.to_domain(draft.scenario_ids, draft.student_emails))
    }

    async fn delete_training_session(&self, training_id: Uuid) -> PortResult<()> {
        let result = sqlx::query("DELETE FROM training_sessions WHERE id = $1")
            .bind(training_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        if result.rows_affected() == 0 {
            return Err(PortError::NotFound(format!(
                "Training session {} not found",
                training_id
            )));
        }
        Ok(())
    }

    async fn get_training_sessions_for_student(
        &self,
        email: &str,
    ) -> PortResult<Vec<TrainingSession>> {
        let records = sqlx::query_as::<_, TrainingSessionRecord>(
            "SELECT t.id, t.title, t.description, t.start_date, t.end_date, t.created_by, \
             t.created_at FROM training_sessions t \
             JOIN training_session_students s ON s.training_session_id = t.id \
             WHERE s.student_email = $1 ORDER BY t.start_date DESC",
        )
        .bind(email)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        self.hydrate_trainings(records).await
    }

    async fn create_ecos_session(
        &self,
        scenario_id: Uuid,
        student_email: &str,
        training_session_id: Option<Uuid>,
        start_time: DateTime<Utc>,
    ) -> PortResult<EcosSession> {
        let record = sqlx::query_as::<_, EcosSessionRecord>(&format!(
            "INSERT INTO ecos_sessions \
             (id, scenario_id, student_email, training_session_id, start_time, status) \
             VALUES ($1, $2, $3, $4, $5, 'in_progress') RETURNING {}",
            SESSION_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(scenario_id)
        .bind(student_email)
        .bind(training_session_id)
        .bind(start_time)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if !is_foreign_key_violation(&e) {
                return unexpected(e);
            }
            let on_training = e
                .as_database_error()
                .and_then(|d| d.constraint())
                .map_or(false, |c| c.contains("training_session"));
            match (on_training, training_session_id) {
                (true, Some(id)) => PortError::NotFound(format!("Training session {} not found", id)),
                _ => PortError::NotFound(format!("Scenario {} not found", scenario_id)),
            }
        })?;
        record.to_domain()
    }

    async fn get_ecos_session_by_id(&self, session_id: Uuid) -> PortResult<EcosSession> {
        let record = sqlx::query_as::<_, EcosSessionRecord>(&format!(
            "SELECT {} FROM ecos_sessions WHERE id = $1",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| not_found_or_unexpected(e, format!("Session {} not found", session_id)))?;
        record.to_domain()
    }

    async fn list_ecos_sessions(
        &self,
        student_email: Option<&str>,
        status: Option<SessionStatus>,
    ) -> PortResult<Vec<EcosSession>> {
        let records = sqlx::query_as::<_, EcosSessionRecord>(&format!(
            "SELECT {} FROM ecos_sessions \
             WHERE ($1::TEXT IS NULL OR student_email = $1) \
             AND ($2::TEXT IS NULL OR status = $2) \
             ORDER BY start_time DESC",
            SESSION_COLUMNS
        ))
        .bind(student_email)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn complete_ecos_session(
        &self,
        session_id: Uuid,
        end_time: DateTime<Utc>,
    ) -> PortResult<Option<EcosSession>> {
        let record = sqlx::query_as::<_, EcosSessionRecord>(&format!(
            "UPDATE ecos_sessions SET status = 'completed', end_time = $2 \
             WHERE id = $1 AND status = 'in_progress' RETURNING {}",
            SESSION_COLUMNS
        ))
        .bind(session_id)
        .bind(end_time)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        match record {
            Some(r) => Ok(Some(r.to_domain()?)),
            None => {
                // Distinguish "already completed" from "no such session".
                self.get_ecos_session_by_id(session_id).await?;
                Ok(None)
            }
        }
    }

    async fn list_stale_ecos_sessions(
        &self,
        started_before: DateTime<Utc>,
    ) -> PortResult<Vec<EcosSession>> {
        let records = sqlx::query_as::<_, EcosSessionRecord>(&format!(
            "SELECT {} FROM ecos_sessions \
             WHERE status = 'in_progress' AND start_time <= $1 ORDER BY start_time ASC",
            SESSION_COLUMNS
        ))
        .bind(started_before)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn save_ecos_message(&self, message: EcosMessage) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO ecos_messages (id, session_id, role, content, created_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(message.id)
        .bind(message.session_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn get_ecos_messages(&self, session_id: Uuid) -> PortResult<Vec<EcosMessage>> {
        let records = sqlx::query_as::<_, EcosMessageRecord>(
            "SELECT id, session_id, role, content, created_at FROM ecos_messages \
             WHERE session_id = $1 ORDER BY created_at ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn save_evaluation(&self, evaluation: SessionEvaluation) -> PortResult<bool> {
        let report = &evaluation.report;
        let mut tx = self.pool.begin().await.map_err(unexpected)?;

        let inserted = sqlx::query(
            "INSERT INTO ecos_reports (session_id, summary, strengths, weaknesses, \
             recommendations, total_score, max_score, percentage, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (session_id) DO NOTHING",
        )
        .bind(report.session_id)
        .bind(&report.summary)
        .bind(&report.strengths)
        .bind(&report.weaknesses)
        .bind(&report.recommendations)
        .bind(report.total_score)
        .bind(i32::try_from(report.max_score).unwrap_or(i32::MAX))
        .bind(report.percentage)
        .bind(report.created_at)
        .execute(&mut *tx)
        .await
        .map_err(unexpected)?
        .rows_affected();

        if inserted == 0 {
            tx.rollback().await.map_err(unexpected)?;
            return Ok(false);
        }

        for row in &evaluation.criteria {
            sqlx::query(
                "INSERT INTO ecos_evaluations (session_id, criterion_id, score, feedback) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(row.session_id)
            .bind(&row.criterion_id)
            .bind(row.score)
            .bind(&row.feedback)
            .execute(&mut *tx)
            .await
            .map_err(unexpected)?;
        }

        tx.commit().await.map_err(unexpected)?;
        Ok(true)
    }

    async fn get_evaluation(&self, session_id: Uuid) -> PortResult<Option<SessionEvaluation>> {
        let report = sqlx::query_as::<_, ReportRecord>(
            "SELECT session_id, summary, strengths, weaknesses, recommendations, total_score, \
             max_score, percentage, created_at FROM ecos_reports WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;

        let Some(report) = report else {
            return Ok(None);
        };

        let criteria = sqlx::query_as::<_, EvaluationRecord>(
            "SELECT session_id, criterion_id, score, feedback FROM ecos_evaluations \
             WHERE session_id = $1 ORDER BY criterion_id ASC",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(Some(SessionEvaluation {
            criteria: criteria.into_iter().map(|r| r.to_domain()).collect(),
            report: report.to_domain(),
        }))
    }
}
