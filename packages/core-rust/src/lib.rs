//! restgate core: operation identifiers, resource addressing, notification
//! schemas and the transport/registry seams the gateway engine builds on.

pub mod id;
pub mod messages;
pub mod traits;
pub mod types;

pub use id::{OperationId, OperationIdError, OperationIdGenerator};
pub use messages::{
    AsyncResponse, AsyncResponseIdBody, CallbackRegistration, NotificationBatch,
    NotificationCategory, NotificationEvent, RegistrationEvent,
};
pub use traits::{
    AckHandle, AckSink, Completion, CompletionSink, ConnectionHandle, EndpointRegistry,
    NotificationHandle, NotificationSink, TransportAdapter, TransportError,
};
pub use types::{
    EndpointName, OperationKind, OperationResult, OperationState, ResourcePath,
    ResourcePathError, SubscriptionState,
};
