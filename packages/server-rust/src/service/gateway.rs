//! Gateway facade over the operation table, subscriptions and notification
//! queue.
//!
//! HTTP handlers talk to [`Gateway`] only. It owns the shared id generator so
//! one-shot operations and subscriptions draw from the same id space, and it
//! wires endpoint lifecycle changes into the notification queue.

use std::sync::{Arc, Weak};

use restgate_core::{
    CallbackRegistration, ConnectionHandle, EndpointName, EndpointRegistry, NotificationBatch,
    NotificationEvent, OperationId, OperationIdGenerator, OperationKind, RegistrationEvent,
    ResourcePath, TransportAdapter,
};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::debug;

use super::config::ServerConfig;
use super::dispatcher::{CallbackPushRunnable, NotificationDispatcher, PushTask};
use super::operation::OperationError;
use super::subscriptions::SubscriptionRegistry;
use super::table::AsyncOperationTable;
use super::worker::{BackgroundWorker, SweepRunnable, SweepTask};
use crate::traits::CallbackClient;
use crate::transport::RegistrationObserver;

/// Point-in-time counters exposed by the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GatewayStats {
    pub tracked_operations: usize,
    pub pending_operations: usize,
    pub subscriptions: usize,
    pub queued_notifications: usize,
}

pub struct Gateway {
    config: ServerConfig,
    ids: Arc<OperationIdGenerator>,
    dispatcher: Arc<NotificationDispatcher>,
    table: Arc<AsyncOperationTable>,
    subscriptions: Arc<SubscriptionRegistry>,
}

impl Gateway {
    #[must_use]
    pub fn new(
        config: ServerConfig,
        registry: Arc<dyn EndpointRegistry>,
        transport: Arc<dyn TransportAdapter>,
    ) -> Self {
        let ids = Arc::new(OperationIdGenerator::new());
        let dispatcher = Arc::new(NotificationDispatcher::new());
        let table = Arc::new(AsyncOperationTable::new(
            Arc::clone(&ids),
            Arc::clone(&registry),
            Arc::clone(&transport),
            Arc::clone(&dispatcher),
        ));
        let subscriptions = Arc::new(SubscriptionRegistry::new(
            Arc::clone(&ids),
            registry,
            transport,
            Arc::clone(&table),
            config.cancel_timeout(),
        ));

        Self {
            config,
            ids,
            dispatcher,
            table,
            subscriptions,
        }
    }

    /// Starts an asynchronous read of `path` on `endpoint`.
    ///
    /// # Errors
    ///
    /// `UnknownEndpoint`, `InvalidResourcePath` or a mapped transport error.
    pub fn read(
        &self,
        endpoint: &EndpointName,
        path: &ResourcePath,
    ) -> Result<OperationId, OperationError> {
        self.table
            .create(endpoint, path, OperationKind::Read, Vec::new())
    }

    /// Starts an asynchronous write (or execute) of `payload` to `path`.
    ///
    /// # Errors
    ///
    /// `UnknownEndpoint`, `InvalidResourcePath` or a mapped transport error.
    pub fn write(
        &self,
        endpoint: &EndpointName,
        path: &ResourcePath,
        payload: Vec<u8>,
    ) -> Result<OperationId, OperationError> {
        self.table
            .create(endpoint, path, OperationKind::Write, payload)
    }

    /// # Errors
    ///
    /// See [`SubscriptionRegistry::subscribe`].
    pub async fn subscribe(
        &self,
        endpoint: &EndpointName,
        path: &ResourcePath,
    ) -> Result<OperationId, OperationError> {
        self.subscriptions.subscribe(endpoint, path).await
    }

    /// # Errors
    ///
    /// See [`SubscriptionRegistry::unsubscribe`].
    pub fn unsubscribe(
        &self,
        endpoint: &EndpointName,
        path: &ResourcePath,
    ) -> Result<(), OperationError> {
        self.subscriptions.unsubscribe(endpoint, path)
    }

    /// Everything queued since the last pull. Empty while a callback is set.
    #[must_use]
    pub fn pull(&self) -> NotificationBatch {
        self.dispatcher.pull(&self.table)
    }

    pub fn set_callback(&self, registration: CallbackRegistration) {
        self.dispatcher.set_callback(registration);
    }

    /// Returns `false` when no callback was registered.
    pub fn clear_callback(&self) -> bool {
        self.dispatcher.clear_callback()
    }

    #[must_use]
    pub fn callback(&self) -> Option<Arc<CallbackRegistration>> {
        self.dispatcher.callback()
    }

    /// Observer to register with the endpoint directory.
    ///
    /// Publishes lifecycle events and restores subscriptions whenever an
    /// endpoint (re-)registers.
    #[must_use]
    pub fn lifecycle_observer(&self) -> Arc<dyn RegistrationObserver> {
        Arc::new(LifecycleObserver {
            dispatcher: Arc::clone(&self.dispatcher),
            subscriptions: Arc::downgrade(&self.subscriptions),
        })
    }

    /// Spawns the push and sweep workers.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn start_workers(&self, client: Arc<dyn CallbackClient>) -> GatewayWorkers {
        let push = BackgroundWorker::start(
            CallbackPushRunnable::new(
                Arc::clone(&self.dispatcher),
                Arc::clone(&self.table),
                client,
            ),
            self.config.coalesce_window_ms,
        );
        let sweep = BackgroundWorker::start(
            SweepRunnable::new(Arc::clone(&self.table), self.config.pending_timeout()),
            self.config.gc_interval_ms,
        );
        GatewayWorkers { push, sweep }
    }

    #[must_use]
    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            tracked_operations: self.table.len(),
            pending_operations: self.table.pending_count(),
            subscriptions: self.subscriptions.len(),
            queued_notifications: self.dispatcher.queued(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub fn ids(&self) -> &Arc<OperationIdGenerator> {
        &self.ids
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<NotificationDispatcher> {
        &self.dispatcher
    }

    #[must_use]
    pub fn table(&self) -> &Arc<AsyncOperationTable> {
        &self.table
    }

    #[must_use]
    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }
}

/// Handles to the gateway's background workers.
pub struct GatewayWorkers {
    push: BackgroundWorker<CallbackPushRunnable>,
    sweep: BackgroundWorker<SweepRunnable>,
}

impl GatewayWorkers {
    /// Delivers everything queued now instead of waiting for the next tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the push worker has stopped.
    pub async fn flush(&self) -> anyhow::Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.push.submit(PushTask::Flush(tx)).await?;
        Ok(rx.await?)
    }

    /// Expires stale pending operations now.
    ///
    /// # Errors
    ///
    /// Returns an error if the sweep worker has stopped.
    pub async fn sweep(&self) -> anyhow::Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sweep.submit(SweepTask::RunNow(tx)).await?;
        Ok(rx.await?)
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.push.is_running() && self.sweep.is_running()
    }

    /// Stops both workers. The push worker makes a final delivery first.
    pub async fn stop(&mut self) {
        self.sweep.stop().await;
        self.push.stop().await;
    }
}

struct LifecycleObserver {
    dispatcher: Arc<NotificationDispatcher>,
    subscriptions: Weak<SubscriptionRegistry>,
}

impl RegistrationObserver for LifecycleObserver {
    fn on_register(&self, connection: &ConnectionHandle, reconnect: bool) {
        self.dispatcher
            .publish(NotificationEvent::Registration(RegistrationEvent {
                name: connection.endpoint.clone(),
            }));
        // Subscriptions survive deregistration, so restore on every register.
        if let Some(subscriptions) = self.subscriptions.upgrade() {
            let restored = subscriptions.restore(&connection.endpoint);
            if restored > 0 {
                debug!(endpoint = %connection.endpoint, restored, reconnect, "subscriptions restored");
            }
        }
    }

    fn on_update(&self, connection: &ConnectionHandle) {
        self.dispatcher
            .publish(NotificationEvent::RegUpdate(RegistrationEvent {
                name: connection.endpoint.clone(),
            }));
    }

    fn on_deregister(&self, endpoint: &EndpointName) {
        self.dispatcher
            .publish(NotificationEvent::Deregistration(RegistrationEvent {
                name: endpoint.clone(),
            }));
    }
}
