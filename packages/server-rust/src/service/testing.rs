//! Shared fixtures for service-level unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use restgate_core::{
    AckHandle, CallbackRegistration, Completion, EndpointName, NotificationBatch,
    NotificationHandle, OperationId, OperationResult, ResourcePath,
    TransportAdapter, TransportError,
};

use super::config::ServerConfig;
use super::dispatcher::NotificationDispatcher;
use super::gateway::Gateway;
use super::subscriptions::SubscriptionRegistry;
use super::table::AsyncOperationTable;
use crate::traits::CallbackClient;
use crate::transport::EndpointDirectory;

type Key = (EndpointName, ResourcePath);
type StartHook = Box<dyn FnOnce() + Send>;

/// Transport that records every call and completes synchronously unless told
/// to hold completions or acks.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    hold_completions: AtomicBool,
    hold_acks: AtomicBool,
    fail_next: Mutex<Option<TransportError>>,
    on_next_start: Mutex<Option<StartHook>>,
    reads: Mutex<Vec<OperationId>>,
    writes: Mutex<Vec<(OperationId, Vec<u8>)>>,
    held: Mutex<Vec<Completion>>,
    acks: Mutex<Vec<AckHandle>>,
    observers: Mutex<HashMap<Key, NotificationHandle>>,
    observe_starts: Mutex<HashMap<Key, usize>>,
}

impl RecordingTransport {
    pub(crate) fn hold_completions(&self) {
        self.hold_completions.store(true, Ordering::SeqCst);
    }

    pub(crate) fn hold_acks(&self) {
        self.hold_acks.store(true, Ordering::SeqCst);
    }

    /// Makes the next dispatch of any kind fail with `error`.
    pub(crate) fn fail_next(&self, error: TransportError) {
        *self.fail_next.lock() = Some(error);
    }

    /// Runs `hook` inside the next observe-start, before its handle is installed.
    pub(crate) fn on_next_start(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_next_start.lock() = Some(Box::new(hook));
    }

    pub(crate) fn reads(&self) -> Vec<OperationId> {
        self.reads.lock().clone()
    }

    pub(crate) fn writes(&self) -> Vec<(OperationId, Vec<u8>)> {
        self.writes.lock().clone()
    }

    /// Completes every held read or write with `result`.
    pub(crate) fn complete_all(&self, result: OperationResult) {
        let held: Vec<Completion> = self.held.lock().drain(..).collect();
        for completion in held {
            completion.complete(result.clone());
        }
    }

    pub(crate) fn ack_all(&self) {
        let acks: Vec<AckHandle> = self.acks.lock().drain(..).collect();
        for ack in acks {
            ack.acknowledge();
        }
    }

    pub(crate) fn observe_starts(&self, endpoint: &EndpointName, path: &ResourcePath) -> usize {
        self.observe_starts
            .lock()
            .get(&(endpoint.clone(), path.clone()))
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn observer(
        &self,
        endpoint: &EndpointName,
        path: &ResourcePath,
    ) -> Option<NotificationHandle> {
        self.observers
            .lock()
            .get(&(endpoint.clone(), path.clone()))
            .cloned()
    }

    /// Fires a notification through the latest observe handle for the key.
    pub(crate) fn notify(&self, endpoint: &EndpointName, path: &ResourcePath, result: OperationResult) {
        if let Some(handle) = self.observer(endpoint, path) {
            handle.notify(result);
        }
    }

    fn take_failure(&self) -> Result<(), TransportError> {
        match self.fail_next.lock().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn finish(&self, completion: Completion) {
        if self.hold_completions.load(Ordering::SeqCst) {
            self.held.lock().push(completion);
        } else {
            completion.complete(OperationResult::new(200, b"ok".to_vec()));
        }
    }
}

impl TransportAdapter for RecordingTransport {
    fn validate_path(&self, _endpoint: &EndpointName, path: &ResourcePath) -> bool {
        path.numeric_ids().is_some_and(|ids| ids.len() <= 3)
    }

    fn dispatch_read(
        &self,
        _endpoint: &EndpointName,
        _path: &ResourcePath,
        completion: Completion,
    ) -> Result<(), TransportError> {
        self.take_failure()?;
        self.reads.lock().push(completion.id());
        self.finish(completion);
        Ok(())
    }

    fn dispatch_write(
        &self,
        _endpoint: &EndpointName,
        _path: &ResourcePath,
        payload: Vec<u8>,
        completion: Completion,
    ) -> Result<(), TransportError> {
        self.take_failure()?;
        self.writes.lock().push((completion.id(), payload));
        self.finish(completion);
        Ok(())
    }

    fn start_observe(
        &self,
        endpoint: &EndpointName,
        path: &ResourcePath,
        handle: NotificationHandle,
    ) -> Result<(), TransportError> {
        self.take_failure()?;
        let hook = self.on_next_start.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        let key = (endpoint.clone(), path.clone());
        *self.observe_starts.lock().entry(key.clone()).or_insert(0) += 1;
        self.observers.lock().insert(key, handle);
        Ok(())
    }

    fn stop_observe(
        &self,
        endpoint: &EndpointName,
        path: &ResourcePath,
        ack: AckHandle,
    ) -> Result<(), TransportError> {
        self.take_failure()?;
        self.observers
            .lock()
            .remove(&(endpoint.clone(), path.clone()));
        if self.hold_acks.load(Ordering::SeqCst) {
            self.acks.lock().push(ack);
        } else {
            ack.acknowledge();
        }
        Ok(())
    }
}

/// Callback client that records deliveries and answers with a fixed status.
pub(crate) struct RecordingCallbackClient {
    status: u16,
    deliveries: Mutex<Vec<(String, NotificationBatch)>>,
}

impl RecordingCallbackClient {
    pub(crate) fn new(status: u16) -> Self {
        Self {
            status,
            deliveries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn deliveries(&self) -> Vec<(String, NotificationBatch)> {
        self.deliveries.lock().clone()
    }
}

#[async_trait]
impl CallbackClient for RecordingCallbackClient {
    async fn deliver(
        &self,
        callback: &CallbackRegistration,
        batch: &NotificationBatch,
    ) -> anyhow::Result<u16> {
        self.deliveries
            .lock()
            .push((callback.url.clone(), batch.clone()));
        Ok(self.status)
    }
}

/// A gateway wired to a [`RecordingTransport`] with `dev1` registered.
pub(crate) struct Harness {
    pub(crate) directory: Arc<EndpointDirectory>,
    pub(crate) transport: Arc<RecordingTransport>,
    pub(crate) gateway: Gateway,
    pub(crate) dispatcher: Arc<NotificationDispatcher>,
    pub(crate) table: Arc<AsyncOperationTable>,
    pub(crate) subscriptions: Arc<SubscriptionRegistry>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        let directory = Arc::new(EndpointDirectory::new());
        directory.register(EndpointName::new("dev1"), false);
        let transport = Arc::new(RecordingTransport::default());
        let gateway = Gateway::new(
            ServerConfig::default(),
            directory.clone(),
            transport.clone(),
        );
        directory.add_observer(gateway.lifecycle_observer());

        Self {
            dispatcher: Arc::clone(gateway.dispatcher()),
            table: Arc::clone(gateway.table()),
            subscriptions: Arc::clone(gateway.subscriptions()),
            directory,
            transport,
            gateway,
        }
    }
}
