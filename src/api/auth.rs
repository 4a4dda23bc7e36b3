//! Shared-key bearer authentication for the ingest route.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use super::state::AppState;

#[derive(Debug, PartialEq, Eq)]
pub enum AuthError {
    /// No `Authorization: Bearer ...` header.
    Missing,
    /// A bearer token that is not the configured key.
    Mismatch,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::Missing => (StatusCode::UNAUTHORIZED, "missing bearer token"),
            AuthError::Mismatch => (StatusCode::FORBIDDEN, "invalid api key"),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let token = extract_bearer_token(&req)?;
    check_key(&state.api_key, token)?;
    Ok(next.run(req).await)
}

fn extract_bearer_token(req: &Request) -> Result<&str, AuthError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or(AuthError::Missing)?
        .to_str()
        .map_err(|_| AuthError::Missing)?;

    header.strip_prefix("Bearer ").ok_or(AuthError::Missing)
}

fn check_key(expected: &str, presented: &str) -> Result<(), AuthError> {
    // An unset key matches nothing
    if expected.is_empty() || expected.len() != presented.len() {
        return Err(AuthError::Mismatch);
    }
    let diff = expected
        .bytes()
        .zip(presented.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b));
    if diff == 0 {
        Ok(())
    } else {
        Err(AuthError::Mismatch)
    }
}
