//! HTTP handler definitions for the gateway.
//!
//! This module defines `AppState` (the shared state carried through axum
//! extractors) and re-exports all handler functions for convenient access
//! when building the router.

pub mod auth;
pub mod endpoints;
pub mod error;
pub mod health;
pub mod notifications;
pub mod subscriptions;
pub mod version;

pub use auth::authenticate_handler;
pub use endpoints::{list_endpoints_handler, read_handler, write_handler};
pub use error::{ApiError, ApiResult};
pub use health::{health_handler, liveness_handler, readiness_handler};
pub use notifications::{
    clear_callback_handler, get_callback_handler, pull_handler, set_callback_handler,
};
pub use subscriptions::{subscribe_handler, unsubscribe_handler};
pub use version::version_handler;

use std::sync::Arc;
use std::time::Instant;

use restgate_core::{EndpointName, EndpointRegistry, ResourcePath};

use super::{NetworkConfig, ShutdownController};
use crate::auth::JwtAuthenticator;
use crate::service::{Gateway, OperationError};
use crate::transport::EndpointDirectory;

/// Shared application state passed to all axum handlers via `State` extraction.
///
/// Holds `Arc` references to shared resources so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// Operation table, subscriptions and notification queue.
    pub gateway: Arc<Gateway>,
    /// Registered endpoints, for listing.
    pub directory: Arc<EndpointDirectory>,
    /// Token issuer and checker.
    pub auth: Arc<JwtAuthenticator>,
    /// Graceful shutdown controller with health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    /// Server process start time, used for uptime calculation.
    pub start_time: Instant,
}

/// Splits the `{name}/{*path}` captures of a device route.
///
/// The endpoint is checked before the path is parsed, so an unknown endpoint
/// wins over a malformed path.
fn device_target(
    state: &AppState,
    name: &str,
    path: &str,
) -> ApiResult<(EndpointName, ResourcePath)> {
    let endpoint = EndpointName::new(name);
    if !state.directory.exists(&endpoint) {
        return Err(OperationError::UnknownEndpoint(endpoint).into());
    }
    Ok((endpoint, path.parse()?))
}
