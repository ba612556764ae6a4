//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use ecos_core::access::normalize_email;
use ecos_core::lifecycle::DEFAULT_SESSION_MINUTES;
use ecos_core::quota::DEFAULT_MAX_DAILY_QUESTIONS;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::str::FromStr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub log_level: Level,
    pub cors_origin: String,
    pub openai_api_key: Option<String>,
    pub chat_model: String,
    pub patient_model: String,
    pub evaluation_model: String,
    pub embedding_model: String,
    pub pinecone_api_key: Option<String>,
    pub pinecone_index_host: Option<String>,
    pub retrieval_top_k: usize,
    pub max_daily_questions: u32,
    pub ecos_session_minutes: i64,
    pub ecos_sweep_interval_secs: u64,
    pub lms_session_hours: i64,
    pub history_limit: u32,
    /// Lower-cased emails of the teachers allowed to author content.
    pub admin_emails: HashSet<String>,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin =
            std::env::var("CORS_ORIGIN").unwrap_or_else(|_| "http://localhost:3000".to_string());

        // --- Load API Keys (as optional) ---
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let pinecone_api_key = std::env::var("PINECONE_API_KEY").ok();
        let pinecone_index_host = std::env::var("PINECONE_INDEX_HOST").ok();

        // --- Load Adapter-specific Settings ---
        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let patient_model =
            std::env::var("PATIENT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let evaluation_model =
            std::env::var("EVALUATION_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        let embedding_model = std::env::var("EMBEDDING_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());
        let retrieval_top_k = parse_var("RETRIEVAL_TOP_K", 5)?;

        // --- Load Business Rules ---
        let max_daily_questions = parse_var("MAX_DAILY_QUESTIONS", DEFAULT_MAX_DAILY_QUESTIONS)?;
        let ecos_session_minutes = parse_var("ECOS_SESSION_MINUTES", DEFAULT_SESSION_MINUTES)?;
        let ecos_sweep_interval_secs = parse_var("ECOS_SWEEP_INTERVAL_SECS", 30)?;
        let lms_session_hours = parse_var("LMS_SESSION_HOURS", 24)?;
        let history_limit = parse_var("HISTORY_LIMIT", 50)?;
        let admin_emails = parse_admin_emails(&std::env::var("ADMIN_EMAILS").unwrap_or_default());

        if max_daily_questions == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_DAILY_QUESTIONS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if ecos_session_minutes <= 0 {
            return Err(ConfigError::InvalidValue(
                "ECOS_SESSION_MINUTES".to_string(),
                "must be positive".to_string(),
            ));
        }

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            cors_origin,
            openai_api_key,
            chat_model,
            patient_model,
            evaluation_model,
            embedding_model,
            pinecone_api_key,
            pinecone_index_host,
            retrieval_top_k,
            max_daily_questions,
            ecos_session_minutes,
            ecos_sweep_interval_secs,
            lms_session_hours,
            history_limit,
            admin_emails,
        })
    }

    pub fn is_admin(&self, email: &str) -> bool {
        self.admin_emails.contains(&normalize_email(email))
    }
}

/// Reads an optional variable, falling back to `default` when it is unset.
fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn parse_admin_emails(raw: &str) -> HashSet<String> {
    raw.split(',')
        .map(normalize_email)
        .filter(|e| !e.is_empty())
        .collect()
}
