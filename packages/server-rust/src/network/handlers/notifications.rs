//! `/notification` routes: pull delivery and callback registration.

use axum::extract::State;
use axum::Json;
use bytes::Bytes;
use http::StatusCode;
use restgate_core::{CallbackRegistration, NotificationBatch};
use tracing::info;

use super::{ApiError, ApiResult, AppState};

/// `GET /notification/pull`: everything queued since the last pull.
pub async fn pull_handler(State(state): State<AppState>) -> Json<NotificationBatch> {
    Json(state.gateway.pull())
}

/// `PUT /notification/callback` with `{"url", "headers"}`.
///
/// The body is parsed by hand so a malformed registration answers 400 with
/// the gateway's error body instead of axum's rejection text.
pub async fn set_callback_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<StatusCode> {
    let registration: CallbackRegistration =
        serde_json::from_slice(&body).map_err(|e| ApiError::InvalidBody(e.to_string()))?;
    reqwest::Url::parse(&registration.url)
        .map_err(|e| ApiError::InvalidBody(format!("callback url: {e}")))?;

    state.gateway.set_callback(registration);
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /notification/callback`: the current registration, or 404.
pub async fn get_callback_handler(
    State(state): State<AppState>,
) -> Result<Json<CallbackRegistration>, StatusCode> {
    state
        .gateway
        .callback()
        .map(|registration| Json(registration.as_ref().clone()))
        .ok_or(StatusCode::NOT_FOUND)
}

/// `DELETE /notification/callback`: 204 whether or not one was set.
pub async fn clear_callback_handler(State(state): State<AppState>) -> StatusCode {
    if state.gateway.clear_callback() {
        info!("notification callback cleared");
    }
    StatusCode::NO_CONTENT
}
