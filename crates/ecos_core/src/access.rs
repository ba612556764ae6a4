//! crates/ecos_core/src/access.rs
//!
//! Training-session rules: window validation, roster normalization and which
//! scenarios a student can see at a given moment.

use crate::domain::{ScenarioGrant, TrainingSession, TrainingSessionDraft};
use crate::ports::{PortError, PortResult};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

/// Emails are compared trimmed and lower-cased everywhere.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// A minimal shape check; the LMS is the real identity provider.
pub fn is_plausible_email(email: &str) -> bool {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
                && !domain.ends_with('.') && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

/// Checks a draft and returns it with normalized, de-duplicated rosters.
pub fn validate_training_draft(mut draft: TrainingSessionDraft) -> PortResult<TrainingSessionDraft> {
    if draft.title.trim().is_empty() {
        return Err(PortError::Invalid("title cannot be empty".to_string()));
    }
    if draft.end_date <= draft.start_date {
        return Err(PortError::Invalid(
            "end date must be after start date".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    let mut students = Vec::with_capacity(draft.student_emails.len());
    for email in &draft.student_emails {
        let email = normalize_email(email);
        if email.is_empty() {
            continue;
        }
        if !is_plausible_email(&email) {
            return Err(PortError::Invalid(format!("'{}' is not a valid email", email)));
        }
        if seen.insert(email.clone()) {
            students.push(email);
        }
    }
    draft.student_emails = students;

    let mut seen = HashSet::new();
    draft.scenario_ids.retain(|id| seen.insert(*id));
    draft.title = draft.title.trim().to_string();
    Ok(draft)
}

/// The window is inclusive at both ends.
pub fn is_window_open(training: &TrainingSession, now: DateTime<Utc>) -> bool {
    training.start_date <= now && now <= training.end_date
}

pub fn is_enrolled(training: &TrainingSession, email: &str) -> bool {
    let email = normalize_email(email);
    training
        .student_emails
        .iter()
        .any(|e| normalize_email(e) == email)
}

/// Every scenario `email` may start at `now`, each listed once. When several
/// open windows grant the same scenario, the one that stays open longest wins.
pub fn visible_scenarios(
    trainings: &[TrainingSession],
    email: &str,
    now: DateTime<Utc>,
) -> Vec<ScenarioGrant> {
    let mut grants: Vec<ScenarioGrant> = Vec::new();
    for training in trainings
        .iter()
        .filter(|t| is_window_open(t, now) && is_enrolled(t, email))
    {
        for scenario_id in &training.scenario_ids {
            match grants.iter_mut().find(|g| g.scenario_id == *scenario_id) {
                Some(existing) if existing.available_until < training.end_date => {
                    existing.training_session_id = training.id;
                    existing.available_until = training.end_date;
                }
                Some(_) => {}
                None => grants.push(ScenarioGrant {
                    scenario_id: *scenario_id,
                    training_session_id: training.id,
                    available_until: training.end_date,
                }),
            }
        }
    }
    grants
}

/// Resolves which training session lets `email` start `scenario_id` now.
///
/// With `requested` set, only that training session is considered.
pub fn find_grant(
    trainings: &[TrainingSession],
    email: &str,
    scenario_id: Uuid,
    requested: Option<Uuid>,
    now: DateTime<Utc>,
) -> Option<ScenarioGrant> {
    trainings
        .iter()
        .filter(|t| requested.map_or(true, |id| t.id == id))
        .filter(|t| is_window_open(t, now) && is_enrolled(t, email))
        .filter(|t| t.scenario_ids.contains(&scenario_id))
        .max_by_key(|t| t.end_date)
        .map(|t| ScenarioGrant {
            scenario_id,
            training_session_id: t.id,
            available_until: t.end_date,
        })
}
