//! `/subscriptions` routes.
//!
//! An unknown endpoint answers 404 here, not the 410 of resource routes.

use axum::extract::{Path, State};
use axum::Json;
use http::StatusCode;
use restgate_core::AsyncResponseIdBody;

use super::{device_target, ApiError, ApiResult, AppState};

/// `PUT /subscriptions/{name}/{*path}`: 202 with the subscription's id.
///
/// Repeating the request for an active subscription returns the same id.
pub async fn subscribe_handler(
    State(state): State<AppState>,
    Path((name, path)): Path<(String, String)>,
) -> ApiResult<(StatusCode, Json<AsyncResponseIdBody>)> {
    let (endpoint, path) = device_target(&state, &name, &path).map_err(ApiError::for_subscription)?;
    let id = state
        .gateway
        .subscribe(&endpoint, &path)
        .await
        .map_err(ApiError::from_subscription)?;
    Ok((StatusCode::ACCEPTED, Json(id.into())))
}

/// `DELETE /subscriptions/{name}/{*path}`: 204 once the stop is requested.
pub async fn unsubscribe_handler(
    State(state): State<AppState>,
    Path((name, path)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let (endpoint, path) = device_target(&state, &name, &path).map_err(ApiError::for_subscription)?;
    state
        .gateway
        .unsubscribe(&endpoint, &path)
        .map_err(ApiError::from_subscription)?;
    Ok(StatusCode::NO_CONTENT)
}
