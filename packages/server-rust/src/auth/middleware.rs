//! Request gate applied in front of every protected route.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::jwt::{AuthError, JwtAuthenticator};

/// Routes reachable without a token.
const PUBLIC_PATHS: &[&str] = &[
    "/authenticate",
    "/version",
    "/health",
    "/health/live",
    "/health/ready",
];

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        if !self.is_unauthorized() {
            tracing::error!(error = %message, "authentication failure");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal error" })),
            )
                .into_response();
        }

        let mut response =
            (StatusCode::UNAUTHORIZED, Json(json!({ "error": message }))).into_response();
        if let Ok(value) = HeaderValue::from_str(&message) {
            response.headers_mut().insert(WWW_AUTHENTICATE, value);
        }
        response
    }
}

/// Admits the request if the gate is disabled, the route is public, or the
/// caller's token grants `"<METHOD> <path>"`.
pub async fn require_token(
    State(auth): State<Arc<JwtAuthenticator>>,
    request: Request,
    next: Next,
) -> Response {
    if !auth.is_enabled() || PUBLIC_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let required = format!("{} {}", request.method(), request.uri().path());
    let authorization = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match auth.authorize(authorization, &required) {
        Ok(()) => next.run(request).await,
        Err(error) => error.into_response(),
    }
}
