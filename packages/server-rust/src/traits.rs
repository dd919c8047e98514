use async_trait::async_trait;
use restgate_core::{CallbackRegistration, NotificationBatch};

/// Outbound HTTP client used for push notification delivery.
/// Implementations: `reqwest` (production), in-memory recorder (tests).
#[async_trait]
pub trait CallbackClient: Send + Sync {
    /// Sends `batch` to the registered callback with a `PUT` and returns the
    /// HTTP status the callback answered with.
    async fn deliver(
        &self,
        callback: &CallbackRegistration,
        batch: &NotificationBatch,
    ) -> anyhow::Result<u16>;
}
