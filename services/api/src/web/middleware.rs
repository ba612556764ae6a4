//! services/api/src/web/middleware.rs
//!
//! Identity checks. The LMS has already authenticated the user and passes the
//! email along, either as an `email` query parameter or an `x-user-email` header.

use axum::{
    extract::{Query, Request, State},
    http::{StatusCode, Uri},
    middleware::Next,
    response::Response,
};
use ecos_core::access::{is_plausible_email, normalize_email};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

use crate::error::HandlerError;
use crate::web::state::AppState;

/// The caller's email, inserted into request extensions by `require_admin`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminEmail(pub String);

/// Middleware that only lets configured administrators through.
///
/// If valid, inserts an `AdminEmail` into request extensions for handlers to use.
/// A missing identity is 401, a non-admin identity is 403.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // 1. Find the caller's email in the header or the query string
    let email = req
        .headers()
        .get("x-user-email")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| email_from_uri(req.uri()))
        .map(|e| normalize_email(&e))
        .filter(|e| !e.is_empty())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // 2. Check it against the configured administrators
    if !state.config.is_admin(&email) {
        warn!("Rejected administrator request from {}", email);
        return Err(StatusCode::FORBIDDEN);
    }

    // 3. Insert the identity into request extensions
    req.extensions_mut().insert(AdminEmail(email));

    // 4. Continue to the handler
    Ok(next.run(req).await)
}

#[derive(Deserialize)]
struct EmailParam {
    email: Option<String>,
}

fn email_from_uri(uri: &Uri) -> Option<String> {
    Query::<EmailParam>::try_from_uri(uri)
        .ok()
        .and_then(|Query(p)| p.email)
}

/// Validates and normalizes an email taken from a request body or query.
pub fn require_email(email: &str) -> Result<String, HandlerError> {
    let email = normalize_email(email);
    if email.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "email is required".to_string()));
    }
    if !is_plausible_email(&email) {
        return Err((StatusCode::BAD_REQUEST, "email is not valid".to_string()));
    }
    Ok(email)
}
