//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service, and the mapping
//! from core port errors to HTTP responses used by every handler.

use crate::config::ConfigError;
use axum::http::StatusCode;
use ecos_core::ports::PortError;
use tracing::error;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    /// Represents an error from the underlying database library.
    #[error("Database Error: {0}")]
    Database(#[from] sqlx::Error),

    /// Represents a failure while applying the embedded migrations.
    #[error("Migration Error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

/// The error half of every handler's return type.
pub type HandlerError = (StatusCode, String);

/// Logs a port failure and turns it into a response. `context` names the
/// operation, e.g. "create scenario".
pub fn port_failure(context: &str, e: PortError) -> HandlerError {
    match e {
        PortError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        PortError::Conflict(msg) => (StatusCode::CONFLICT, msg),
        PortError::Invalid(msg) => (StatusCode::BAD_REQUEST, msg),
        PortError::Unauthorized => (StatusCode::FORBIDDEN, "Forbidden".to_string()),
        PortError::Unexpected(msg) => {
            error!("Failed to {}: {}", context, msg);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to {}", context),
            )
        }
    }
}

/// Like `port_failure`, but unexpected errors are blamed on the upstream
/// language model or vector index rather than on this service.
pub fn upstream_failure(context: &str, e: PortError) -> HandlerError {
    match e {
        PortError::Unexpected(msg) => {
            error!("Upstream call failed while trying to {}: {}", context, msg);
            (StatusCode::BAD_GATEWAY, format!("Failed to {}", context))
        }
        other => port_failure(context, other),
    }
}
