//! Error and outcome types shared by the operation table and the
//! subscription registry.

use restgate_core::{EndpointName, OperationId, ResourcePath, TransportError};

/// Errors surfaced synchronously to callers of `create`, `subscribe` and
/// `unsubscribe`.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("endpoint {0} is not registered")]
    UnknownEndpoint(EndpointName),
    #[error("resource path {path} is not addressable on endpoint {endpoint}")]
    InvalidResourcePath {
        endpoint: EndpointName,
        path: ResourcePath,
    },
    #[error("no active subscription for {path} on endpoint {endpoint}")]
    NotSubscribed {
        endpoint: EndpointName,
        path: ResourcePath,
    },
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OperationError {
    /// HTTP status this error maps to.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnknownEndpoint(_) => 410,
            Self::InvalidResourcePath { .. } | Self::NotSubscribed { .. } => 404,
            Self::Internal(_) => 500,
        }
    }

    /// Maps a synchronous transport dispatch failure for `endpoint`/`path`.
    pub(crate) fn from_transport(
        error: TransportError,
        endpoint: &EndpointName,
        path: &ResourcePath,
    ) -> Self {
        match error {
            TransportError::EndpointGone => Self::UnknownEndpoint(endpoint.clone()),
            TransportError::InvalidPath => Self::InvalidResourcePath {
                endpoint: endpoint.clone(),
                path: path.clone(),
            },
            TransportError::Rejected(reason) => {
                Self::Internal(anyhow::anyhow!("transport rejected request: {reason}"))
            }
        }
    }
}

/// Outcome of a `resolve` call. Only `Resolved` changes state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// First resolution: the entry moved `Pending -> Resolved`.
    Resolved,
    /// The entry was already resolved or delivered; the call was ignored.
    Duplicate,
    /// No entry with this id exists (never created, or delivered and removed).
    Unknown,
}

/// Outcome of routing one observe notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    /// Recorded under the subscription's owner id.
    Recorded(OperationId),
    /// No matching subscription generation; dropped.
    Stale,
}
