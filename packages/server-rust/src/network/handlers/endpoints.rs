//! `/endpoints` routes: listing, resource reads and writes.

use axum::extract::{Path, State};
use axum::Json;
use bytes::Bytes;
use http::StatusCode;
use restgate_core::AsyncResponseIdBody;
use serde::Serialize;

use super::{device_target, AppState, ApiResult};

/// One entry of `GET /endpoints`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointEntry {
    pub name: String,
    pub status: &'static str,
    pub queue: bool,
}

pub async fn list_endpoints_handler(State(state): State<AppState>) -> Json<Vec<EndpointEntry>> {
    let entries = state
        .directory
        .list()
        .into_iter()
        .map(|connection| EndpointEntry {
            name: connection.endpoint.to_string(),
            status: "ACTIVE",
            queue: connection.queue_mode,
        })
        .collect();
    Json(entries)
}

/// `GET /endpoints/{name}/{*path}`: starts a read, answers 202 with its id.
pub async fn read_handler(
    State(state): State<AppState>,
    Path((name, path)): Path<(String, String)>,
) -> ApiResult<(StatusCode, Json<AsyncResponseIdBody>)> {
    let (endpoint, path) = device_target(&state, &name, &path)?;
    let id = state.gateway.read(&endpoint, &path)?;
    Ok((StatusCode::ACCEPTED, Json(id.into())))
}

/// `POST /endpoints/{name}/{*path}`: starts a write or execute with the raw
/// request body as payload.
pub async fn write_handler(
    State(state): State<AppState>,
    Path((name, path)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<AsyncResponseIdBody>)> {
    let (endpoint, path) = device_target(&state, &name, &path)?;
    let id = state.gateway.write(&endpoint, &path, body.to_vec())?;
    Ok((StatusCode::ACCEPTED, Json(id.into())))
}
