use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use http::StatusCode;

use super::AppState;

/// `POST /authenticate` with `{"name", "secret"}`: 202 with a signed token.
pub async fn authenticate_handler(State(state): State<AppState>, body: Bytes) -> Response {
    match state.auth.authenticate(&body) {
        Ok(token) => (StatusCode::ACCEPTED, Json(token)).into_response(),
        Err(error) => {
            tracing::debug!(error = %error, "authentication rejected");
            error.into_response()
        }
    }
}
