//! Handler error type and its HTTP rendering.

use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use restgate_core::{EndpointName, ResourcePathError};
use serde_json::json;
use thiserror::Error;

use crate::service::OperationError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Operation(#[from] OperationError),

    /// Unknown endpoint on a subscription route, which answers 404 rather
    /// than the 410 resource routes use.
    #[error("endpoint {0} is not registered")]
    EndpointNotFound(EndpointName),

    #[error("invalid resource path: {0}")]
    Path(#[from] ResourcePathError),

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("server is shutting down")]
    Unavailable,
}

impl ApiError {
    /// Maps a subscription failure, folding `UnknownEndpoint` into 404.
    #[must_use]
    pub fn from_subscription(error: OperationError) -> Self {
        match error {
            OperationError::UnknownEndpoint(name) => Self::EndpointNotFound(name),
            other => Self::Operation(other),
        }
    }

    /// Re-maps an error raised before a subscription call the same way.
    #[must_use]
    pub fn for_subscription(self) -> Self {
        match self {
            Self::Operation(error) => Self::from_subscription(error),
            other => other,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Operation(error) => StatusCode::from_u16(error.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Self::EndpointNotFound(_) | Self::Path(_) => StatusCode::NOT_FOUND,
            Self::InvalidBody(_) => StatusCode::BAD_REQUEST,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Operation(OperationError::UnknownEndpoint(_)) => "ENDPOINT_GONE",
            Self::Operation(OperationError::InvalidResourcePath { .. }) | Self::Path(_) => {
                "INVALID_RESOURCE_PATH"
            }
            Self::Operation(OperationError::NotSubscribed { .. }) => "NOT_SUBSCRIBED",
            Self::Operation(OperationError::Internal(_)) => "INTERNAL_ERROR",
            Self::EndpointNotFound(_) => "ENDPOINT_NOT_FOUND",
            Self::InvalidBody(_) => "INVALID_REQUEST",
            Self::Unavailable => "UNAVAILABLE",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status.is_server_error() && !matches!(self, Self::Unavailable) {
            tracing::error!(error = %self, "request failed");
            "internal error".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn unknown() -> OperationError {
        OperationError::UnknownEndpoint(EndpointName::new("ghost"))
    }

    #[test]
    fn resource_and_subscription_routes_differ_on_unknown_endpoint() {
        assert_eq!(ApiError::from(unknown()).status(), StatusCode::GONE);
        assert_eq!(
            ApiError::from_subscription(unknown()).status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn subscription_mapping_keeps_other_errors() {
        let error = ApiError::from_subscription(OperationError::NotSubscribed {
            endpoint: EndpointName::new("dev1"),
            path: "3/0/0".parse().unwrap(),
        });
        assert_eq!(error.status(), StatusCode::NOT_FOUND);
        assert_eq!(error.code(), "NOT_SUBSCRIBED");
    }

    #[test]
    fn internal_errors_hide_details() {
        let response =
            ApiError::from(OperationError::Internal(anyhow::anyhow!("secret detail")))
                .into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn path_errors_are_not_found() {
        assert_eq!(
            ApiError::from(ResourcePathError::Empty).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::InvalidBody("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
