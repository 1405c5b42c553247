use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::Response,
};

use super::AppState;
use crate::error::AppError;

/// Bearer JWT authentication for the message API.
///
/// On success the validated `Claims` are available to handlers as an
/// `Extension<Claims>`.
pub async fn jwt_auth(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(&req)
        .ok_or_else(|| AppError::Auth("Missing bearer token".to_string()))?;

    let claims = state.jwt_validator.validate(token)?;
    tracing::trace!(user_id = %claims.user_id(), "Request authenticated");

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(req: &Request<Body>) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
}
