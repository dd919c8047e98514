//! Health, liveness, and readiness endpoint handlers.
//!
//! These handlers expose server health information for orchestrators
//! (Kubernetes, load balancers) and operational monitoring.

use axum::extract::State;
use axum::Json;
use http::StatusCode;
use serde_json::json;

use super::AppState;
use crate::network::HealthState;

/// Returns detailed health information as JSON.
///
/// Always returns 200; the `state` field tells "up but draining" apart from
/// "ready".
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.gateway.stats();

    Json(json!({
        "state": state.shutdown.health_state().as_str(),
        "endpoints": state.directory.count(),
        "pending_operations": stats.pending_operations,
        "tracked_operations": stats.tracked_operations,
        "subscriptions": stats.subscriptions,
        "queued_notifications": stats.queued_notifications,
        "in_flight": state.shutdown.in_flight_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Kubernetes liveness probe: 200 while the process responds.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Kubernetes readiness probe: 200 when ready, 503 while starting or
/// draining.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::handlers::testing::app_state;

    #[tokio::test]
    async fn health_reports_counts() {
        let state = app_state();
        let Json(body) = health_handler(State(state)).await;
        assert_eq!(body["state"], "starting");
        assert_eq!(body["endpoints"], 1);
        assert_eq!(body["pending_operations"], 0);
        assert_eq!(body["subscriptions"], 0);
    }

    #[tokio::test]
    async fn readiness_follows_lifecycle() {
        let state = app_state();
        assert_eq!(
            readiness_handler(State(state.clone())).await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.shutdown.set_ready();
        assert_eq!(readiness_handler(State(state.clone())).await, StatusCode::OK);

        state.shutdown.trigger_shutdown();
        assert_eq!(
            readiness_handler(State(state)).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        assert_eq!(liveness_handler().await, StatusCode::OK);
    }
}
