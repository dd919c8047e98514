//! Collaborator seams: the device transport, the endpoint registry, and the
//! handles a transport calls back on when device-side work completes.

use std::fmt;
use std::sync::Arc;

use crate::id::OperationId;
use crate::types::{EndpointName, OperationResult, ResourcePath};

/// Synchronous dispatch failures reported by a [`TransportAdapter`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The endpoint disconnected between the registry check and dispatch.
    #[error("endpoint is no longer connected")]
    EndpointGone,
    /// The transport could not address the resource path.
    #[error("resource path is not addressable")]
    InvalidPath,
    #[error("transport rejected the request: {0}")]
    Rejected(String),
}

// ---------------------------------------------------------------------------
// Callback sinks
// ---------------------------------------------------------------------------

/// Receives one-shot read/write completions.
pub trait CompletionSink: Send + Sync {
    fn complete(&self, id: OperationId, result: OperationResult);
}

/// Receives observe notifications.
pub trait NotificationSink: Send + Sync {
    fn notify(
        &self,
        endpoint: &EndpointName,
        path: &ResourcePath,
        owner_id: OperationId,
        result: OperationResult,
    );
}

/// Receives observe-stop acknowledgements.
pub trait AckSink: Send + Sync {
    fn acknowledge(&self, endpoint: &EndpointName, path: &ResourcePath, owner_id: OperationId);
}

/// Completion callback for a dispatched read or write.
///
/// Cloneable and callable any number of times; only the first call resolves
/// the operation, later ones are tolerated as duplicates.
#[derive(Clone)]
pub struct Completion {
    id: OperationId,
    sink: Arc<dyn CompletionSink>,
}

impl Completion {
    pub fn new(id: OperationId, sink: Arc<dyn CompletionSink>) -> Self {
        Self { id, sink }
    }

    #[must_use]
    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn complete(&self, result: OperationResult) {
        self.sink.complete(self.id, result);
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Notification callback for one observation.
///
/// Carries the subscription key and the owner id of the subscription
/// generation it was issued for, so late notifications from an earlier
/// generation can be told apart from current ones.
#[derive(Clone)]
pub struct NotificationHandle {
    endpoint: EndpointName,
    path: ResourcePath,
    owner_id: OperationId,
    sink: Arc<dyn NotificationSink>,
}

impl NotificationHandle {
    pub fn new(
        endpoint: EndpointName,
        path: ResourcePath,
        owner_id: OperationId,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            endpoint,
            path,
            owner_id,
            sink,
        }
    }

    #[must_use]
    pub fn owner_id(&self) -> OperationId {
        self.owner_id
    }

    #[must_use]
    pub fn endpoint(&self) -> &EndpointName {
        &self.endpoint
    }

    #[must_use]
    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    pub fn notify(&self, result: OperationResult) {
        self.sink
            .notify(&self.endpoint, &self.path, self.owner_id, result);
    }
}

impl fmt::Debug for NotificationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationHandle")
            .field("endpoint", &self.endpoint)
            .field("path", &self.path)
            .field("owner_id", &self.owner_id)
            .finish_non_exhaustive()
    }
}

/// Acknowledgement callback for an observe-stop request.
#[derive(Clone)]
pub struct AckHandle {
    endpoint: EndpointName,
    path: ResourcePath,
    owner_id: OperationId,
    sink: Arc<dyn AckSink>,
}

impl AckHandle {
    pub fn new(
        endpoint: EndpointName,
        path: ResourcePath,
        owner_id: OperationId,
        sink: Arc<dyn AckSink>,
    ) -> Self {
        Self {
            endpoint,
            path,
            owner_id,
            sink,
        }
    }

    #[must_use]
    pub fn owner_id(&self) -> OperationId {
        self.owner_id
    }

    pub fn acknowledge(&self) {
        self.sink
            .acknowledge(&self.endpoint, &self.path, self.owner_id);
    }
}

impl fmt::Debug for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AckHandle")
            .field("endpoint", &self.endpoint)
            .field("path", &self.path)
            .field("owner_id", &self.owner_id)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Executes device operations.
///
/// Every method returns as soon as the request is handed off; results arrive
/// later through the supplied handle, from any thread or task. Read/write
/// completions fire once (duplicates are tolerated by the caller); observe
/// notifications fire any number of times until observation stops.
pub trait TransportAdapter: Send + Sync {
    /// Whether `path` is addressable on `endpoint`.
    fn validate_path(&self, endpoint: &EndpointName, path: &ResourcePath) -> bool;

    /// Dispatches a read.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the request could not be handed off.
    fn dispatch_read(
        &self,
        endpoint: &EndpointName,
        path: &ResourcePath,
        on_complete: Completion,
    ) -> Result<(), TransportError>;

    /// Dispatches a write carrying `payload`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the request could not be handed off.
    fn dispatch_write(
        &self,
        endpoint: &EndpointName,
        path: &ResourcePath,
        payload: Vec<u8>,
        on_complete: Completion,
    ) -> Result<(), TransportError>;

    /// Starts observing `path`; notifications go to `on_notify`.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the request could not be handed off.
    fn start_observe(
        &self,
        endpoint: &EndpointName,
        path: &ResourcePath,
        on_notify: NotificationHandle,
    ) -> Result<(), TransportError>;

    /// Stops observing `path`; `on_ack` fires once the device confirms.
    ///
    /// # Errors
    ///
    /// Returns `TransportError` if the request could not be handed off.
    fn stop_observe(
        &self,
        endpoint: &EndpointName,
        path: &ResourcePath,
        on_ack: AckHandle,
    ) -> Result<(), TransportError>;
}

/// Snapshot of an endpoint's current connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionHandle {
    pub endpoint: EndpointName,
    /// Changes every time the endpoint (re-)registers.
    pub connection_id: u64,
    /// Whether the device only accepts requests when it wakes up.
    pub queue_mode: bool,
}

/// Binary known/unknown lookup of registered endpoints.
pub trait EndpointRegistry: Send + Sync {
    fn exists(&self, name: &EndpointName) -> bool;

    fn connection(&self, name: &EndpointName) -> Option<ConnectionHandle>;
}
