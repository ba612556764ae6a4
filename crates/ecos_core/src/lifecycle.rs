//! crates/ecos_core/src/lifecycle.rs
//!
//! The `in_progress -> completed` state machine of an ECOS session and the
//! server-side time limit that drives automatic completion.

use crate::domain::EcosSession;
use chrono::{DateTime, Duration, Utc};

pub const DEFAULT_SESSION_MINUTES: i64 = 8;

/// Applies the exam time limit to sessions.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    time_limit: Duration,
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new(Duration::minutes(DEFAULT_SESSION_MINUTES))
    }
}

impl SessionClock {
    pub fn new(time_limit: Duration) -> Self {
        Self { time_limit }
    }

    pub fn time_limit(&self) -> Duration {
        self.time_limit
    }

    /// The instant at which the session runs out of time.
    pub fn deadline(&self, session: &EcosSession) -> DateTime<Utc> {
        session.start_time + self.time_limit
    }

    /// True when the session is still open but its time is up.
    pub fn is_expired(&self, session: &EcosSession, now: DateTime<Utc>) -> bool {
        session.is_in_progress() && now >= self.deadline(session)
    }

    /// Time left on the clock; zero for completed or expired sessions.
    pub fn remaining(&self, session: &EcosSession, now: DateTime<Utc>) -> Duration {
        if !session.is_in_progress() {
            return Duration::zero();
        }
        let left = self.deadline(session) - now;
        if left < Duration::zero() {
            Duration::zero()
        } else {
            left
        }
    }

    /// The end time to record when completing at `now`. An overdue session is
    /// closed at its deadline rather than whenever it was noticed.
    pub fn completion_time(&self, session: &EcosSession, now: DateTime<Utc>) -> DateTime<Utc> {
        now.min(self.deadline(session))
    }

    /// Latest start time that is already expired at `now`.
    pub fn stale_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.time_limit
    }
}

/// The outcome of asking a session to end.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// This call moved the session to completed.
    Completed(EcosSession),
    /// The session was already completed; nothing changed.
    AlreadyCompleted(EcosSession),
}

impl Completion {
    pub fn session(&self) -> &EcosSession {
        match self {
            Completion::Completed(s) | Completion::AlreadyCompleted(s) => s,
        }
    }

    pub fn into_session(self) -> EcosSession {
        match self {
            Completion::Completed(s) | Completion::AlreadyCompleted(s) => s,
        }
    }

    pub fn transitioned(&self) -> bool {
        matches!(self, Completion::Completed(_))
    }
}

/// Only the student who owns a session, or an administrator, may act on it.
pub fn can_access(session: &EcosSession, email: &str, is_admin: bool) -> bool {
    is_admin || session.student_email.eq_ignore_ascii_case(email.trim())
}
