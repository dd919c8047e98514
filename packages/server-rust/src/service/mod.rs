//! Asynchronous operation tracking and notification delivery.
//!
//! 1. **Operation table** (`table`): one entry per async id, pending until resolved
//! 2. **Subscriptions** (`subscriptions`): one observe per endpoint and path
//! 3. **Dispatcher** (`dispatcher`): pull queue and push delivery to a callback
//! 4. **Background workers** (`worker`): push flushes and the pending sweep
//! 5. **Gateway** (`gateway`): the facade HTTP handlers call

pub mod callback;
pub mod config;
pub mod dispatcher;
pub mod gateway;
pub mod operation;
pub mod subscriptions;
pub mod table;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types for convenient access.
pub use callback::ReqwestCallbackClient;
pub use config::ServerConfig;
pub use dispatcher::{CallbackPushRunnable, NotificationDispatcher, PushTask};
pub use gateway::{Gateway, GatewayStats, GatewayWorkers};
pub use operation::{NotificationOutcome, OperationError, Resolution};
pub use subscriptions::{SubscriptionRegistry, SubscriptionSnapshot};
pub use table::{AsyncOperationTable, OperationSnapshot, GATEWAY_TIMEOUT};
pub use worker::{BackgroundRunnable, BackgroundWorker, SweepRunnable, SweepTask};
