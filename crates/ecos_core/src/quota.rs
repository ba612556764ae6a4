//! crates/ecos_core/src/quota.rs
//!
//! Daily question quota arithmetic. Counters are keyed by UTC calendar day, so a
//! new day simply starts a new counter.

use chrono::{DateTime, NaiveDate, Utc};

pub const DEFAULT_MAX_DAILY_QUESTIONS: u32 = 20;

/// The quota snapshot returned to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaStatus {
    pub email: String,
    pub questions_used: u32,
    pub questions_remaining: u32,
    pub max_daily_questions: u32,
    pub limit_reached: bool,
}

impl QuotaStatus {
    /// Builds the snapshot for `used` questions against `limit`.
    ///
    /// `used` is clamped to `limit`, so `questions_used + questions_remaining`
    /// always equals `max_daily_questions`.
    pub fn from_used(email: &str, used: u32, limit: u32) -> Self {
        let questions_used = used.min(limit);
        Self {
            email: email.to_string(),
            questions_used,
            questions_remaining: limit - questions_used,
            max_daily_questions: limit,
            limit_reached: questions_used >= limit,
        }
    }
}

/// The counter key for a point in time.
pub fn quota_day(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive()
}
