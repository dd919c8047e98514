//! Subscription registry: one observe per `(endpoint, resource path)` key.
//!
//! State machine per key:
//!
//! ```text
//! (none) --subscribe: new id--> Active --unsubscribe--> Cancelling --ack--> (none)
//!           Active --subscribe--> Active (same id, no dispatch)
//! ```
//!
//! A `subscribe` that finds the key `Cancelling` waits until the cancellation
//! completes (bounded by the cancel timeout) and then starts a fresh
//! subscription with a new id. Notifications are matched on the exact key and
//! on the owner id of the generation they were issued for, so a late
//! notification from a cancelled generation is dropped rather than attributed
//! to its successor.

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use metrics::counter;
use restgate_core::{
    AckHandle, AckSink, EndpointName, EndpointRegistry, NotificationHandle, NotificationSink,
    OperationId, OperationIdGenerator, OperationResult, ResourcePath, SubscriptionState,
    TransportAdapter,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::operation::{NotificationOutcome, OperationError};
use super::table::{unix_millis, AsyncOperationTable};

type SubscriptionKey = (EndpointName, ResourcePath);

#[derive(Debug)]
struct SubscriptionRecord {
    owner_id: OperationId,
    state: SubscriptionState,
    last_notified_at: Option<u64>,
    /// Flipped to `true` when the key is released after cancellation.
    released: watch::Sender<bool>,
}

impl SubscriptionRecord {
    fn active(owner_id: OperationId) -> Self {
        let (released, _) = watch::channel(false);
        Self {
            owner_id,
            state: SubscriptionState::Active,
            last_notified_at: None,
            released,
        }
    }
}

/// Read-only view of a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSnapshot {
    pub owner_id: OperationId,
    pub state: SubscriptionState,
    /// Unix milliseconds of the last accepted notification.
    pub last_notified_at: Option<u64>,
}

/// Tracks active subscriptions and routes observe notifications to them.
pub struct SubscriptionRegistry {
    records: DashMap<SubscriptionKey, SubscriptionRecord>,
    ids: Arc<OperationIdGenerator>,
    registry: Arc<dyn EndpointRegistry>,
    transport: Arc<dyn TransportAdapter>,
    table: Arc<AsyncOperationTable>,
    cancel_timeout: Duration,
}

impl SubscriptionRegistry {
    #[must_use]
    pub fn new(
        ids: Arc<OperationIdGenerator>,
        registry: Arc<dyn EndpointRegistry>,
        transport: Arc<dyn TransportAdapter>,
        table: Arc<AsyncOperationTable>,
        cancel_timeout: Duration,
    ) -> Self {
        Self {
            records: DashMap::new(),
            ids,
            registry,
            transport,
            table,
            cancel_timeout,
        }
    }

    /// Subscribes to `path` on `endpoint` and returns the subscription's id.
    ///
    /// Re-subscribing an active key returns its existing id without contacting
    /// the transport again.
    ///
    /// # Errors
    ///
    /// - `UnknownEndpoint` if the endpoint is not registered.
    /// - `InvalidResourcePath` if the transport cannot address `path`.
    /// - Any mapped transport error if observe-start could not be dispatched;
    ///   the key is left unsubscribed in that case.
    pub async fn subscribe(
        self: &Arc<Self>,
        endpoint: &EndpointName,
        path: &ResourcePath,
    ) -> Result<OperationId, OperationError> {
        self.validate(endpoint, path)?;
        let key: SubscriptionKey = (endpoint.clone(), path.clone());

        let owner_id = loop {
            let (cancelling_owner, mut released) = match self.records.entry(key.clone()) {
                Entry::Occupied(occupied) => {
                    let state = occupied.get().state;
                    match state {
                        SubscriptionState::Active => {
                            let id = occupied.get().owner_id;
                            debug!(id = %id, endpoint = %endpoint, path = %path, "subscription already active");
                            return Ok(id);
                        }
                        SubscriptionState::Cancelling => {
                            let record = occupied.get();
                            (record.owner_id, record.released.subscribe())
                        }
                        SubscriptionState::Cancelled => {
                            occupied.remove();
                            continue;
                        }
                    }
                }
                Entry::Vacant(vacant) => {
                    let id = self.ids.next();
                    // The table entry exists before the key is visible to unsubscribe.
                    self.table.open_subscription(id, endpoint, path);
                    vacant.insert(SubscriptionRecord::active(id));
                    break id;
                }
            };

            debug!(id = %cancelling_owner, endpoint = %endpoint, path = %path, "waiting for cancellation to finish");
            let timed_out = tokio::time::timeout(self.cancel_timeout, released.wait_for(|done| *done))
                .await
                .is_err();
            if timed_out {
                warn!(id = %cancelling_owner, endpoint = %endpoint, path = %path,
                    "observe-stop not acknowledged in time, releasing subscription");
                self.finish_cancel(&key, cancelling_owner);
            }
        };

        let sink: Arc<dyn NotificationSink> = Arc::clone(self) as Arc<dyn NotificationSink>;
        let handle = NotificationHandle::new(endpoint.clone(), path.clone(), owner_id, sink);

        if let Err(error) = self.transport.start_observe(endpoint, path, handle) {
            self.records.remove_if(&key, |_, record| record.owner_id == owner_id);
            self.table.retire(owner_id);
            debug!(id = %owner_id, endpoint = %endpoint, path = %path, error = %error, "observe-start failed");
            return Err(OperationError::from_transport(error, endpoint, path));
        }

        counter!("restgate_operations_created_total", "kind" => "notify").increment(1);
        if self.cancelled_during_start(&key, owner_id) {
            debug!(id = %owner_id, endpoint = %endpoint, path = %path,
                "subscription cancelled while observe-start was in flight");
            self.dispatch_stop(&key, owner_id);
            return Ok(owner_id);
        }

        info!(id = %owner_id, endpoint = %endpoint, path = %path, "subscription started");
        Ok(owner_id)
    }

    /// Cancels the active subscription on `path`.
    ///
    /// Returns once the transport accepted the observe-stop request; the key
    /// is released when the transport acknowledges it.
    ///
    /// # Errors
    ///
    /// - `UnknownEndpoint` / `InvalidResourcePath` as for [`Self::subscribe`].
    /// - `NotSubscribed` if the key has no `Active` subscription.
    pub fn unsubscribe(
        self: &Arc<Self>,
        endpoint: &EndpointName,
        path: &ResourcePath,
    ) -> Result<(), OperationError> {
        self.validate(endpoint, path)?;
        let key: SubscriptionKey = (endpoint.clone(), path.clone());

        let owner_id = {
            let Some(mut record) = self.records.get_mut(&key) else {
                return Err(not_subscribed(endpoint, path));
            };
            if record.state != SubscriptionState::Active {
                return Err(not_subscribed(endpoint, path));
            }
            record.state = SubscriptionState::Cancelling;
            record.owner_id
        };

        self.dispatch_stop(&key, owner_id);
        info!(id = %owner_id, endpoint = %endpoint, path = %path, "subscription cancelled");
        Ok(())
    }

    /// Routes one observe notification.
    ///
    /// Accepted only if the key holds the same subscription generation the
    /// notification was issued for, whether `Active` or still `Cancelling`.
    pub fn on_notification(
        &self,
        endpoint: &EndpointName,
        path: &ResourcePath,
        owner_id: OperationId,
        result: OperationResult,
    ) -> NotificationOutcome {
        let key: SubscriptionKey = (endpoint.clone(), path.clone());
        let Some(mut record) = self.records.get_mut(&key) else {
            return stale(endpoint, path, owner_id);
        };
        if record.owner_id != owner_id || record.state == SubscriptionState::Cancelled {
            drop(record);
            return stale(endpoint, path, owner_id);
        }

        record.last_notified_at = Some(unix_millis());
        // Recording under the record guard keeps per-key notification order.
        self.table
            .record_notification(owner_id, endpoint, path, result);
        drop(record);

        counter!("restgate_notifications_total", "category" => "async-responses").increment(1);
        NotificationOutcome::Recorded(owner_id)
    }

    /// Re-issues observe-start for every active subscription of `endpoint`,
    /// keeping their owner ids. Called when the endpoint re-registers.
    pub fn restore(self: &Arc<Self>, endpoint: &EndpointName) -> usize {
        let active: Vec<(ResourcePath, OperationId)> = self
            .records
            .iter()
            .filter(|record| {
                record.key().0 == *endpoint && record.state == SubscriptionState::Active
            })
            .map(|record| (record.key().1.clone(), record.owner_id))
            .collect();

        let mut restored = 0;
        for (path, owner_id) in active {
            let sink: Arc<dyn NotificationSink> = Arc::clone(self) as Arc<dyn NotificationSink>;
            let handle = NotificationHandle::new(endpoint.clone(), path.clone(), owner_id, sink);
            match self.transport.start_observe(endpoint, &path, handle) {
                Ok(()) => restored += 1,
                Err(error) => {
                    warn!(id = %owner_id, endpoint = %endpoint, path = %path, error = %error,
                        "failed to restore observation after re-registration");
                }
            }
        }
        if restored > 0 {
            info!(endpoint = %endpoint, restored, "observations restored");
        }
        restored
    }

    #[must_use]
    pub fn snapshot(&self, endpoint: &EndpointName, path: &ResourcePath) -> Option<SubscriptionSnapshot> {
        self.records
            .get(&(endpoint.clone(), path.clone()))
            .map(|record| SubscriptionSnapshot {
                owner_id: record.owner_id,
                state: record.state,
                last_notified_at: record.last_notified_at,
            })
    }

    /// Number of keys currently subscribed or cancelling.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // -- internal ------------------------------------------------------------

    fn validate(&self, endpoint: &EndpointName, path: &ResourcePath) -> Result<(), OperationError> {
        if !self.registry.exists(endpoint) {
            return Err(OperationError::UnknownEndpoint(endpoint.clone()));
        }
        if !self.transport.validate_path(endpoint, path) {
            return Err(OperationError::InvalidResourcePath {
                endpoint: endpoint.clone(),
                path: path.clone(),
            });
        }
        Ok(())
    }

    /// Checks, after observe-start returned, whether `owner_id` still holds
    /// `key` as `Active`. Returns `true` when an unsubscribe overlapped the
    /// start and the device must be told to stop again.
    ///
    /// A released key is re-taken as `Cancelling` so that a successor waits
    /// for the stop to be acknowledged instead of racing it on the device.
    fn cancelled_during_start(&self, key: &SubscriptionKey, owner_id: OperationId) -> bool {
        match self.records.entry(key.clone()) {
            Entry::Occupied(occupied) if occupied.get().owner_id == owner_id => {
                occupied.get().state != SubscriptionState::Active
            }
            Entry::Occupied(_) => {
                // A later generation owns the device observation now.
                self.table.retire(owner_id);
                false
            }
            Entry::Vacant(vacant) => {
                let mut record = SubscriptionRecord::active(owner_id);
                record.state = SubscriptionState::Cancelling;
                vacant.insert(record);
                true
            }
        }
    }

    /// Sends observe-stop for `key`; the key is released on acknowledgement,
    /// or right away if the request cannot be dispatched.
    fn dispatch_stop(self: &Arc<Self>, key: &SubscriptionKey, owner_id: OperationId) {
        let (endpoint, path) = key;
        let sink: Arc<dyn AckSink> = Arc::clone(self) as Arc<dyn AckSink>;
        let ack = AckHandle::new(endpoint.clone(), path.clone(), owner_id, sink);
        if let Err(error) = self.transport.stop_observe(endpoint, path, ack) {
            warn!(id = %owner_id, endpoint = %endpoint, path = %path, error = %error,
                "observe-stop could not be dispatched, releasing subscription");
            self.finish_cancel(key, owner_id);
        }
    }

    /// Releases `key` if it still belongs to `owner_id`. Returns whether it did.
    fn finish_cancel(&self, key: &SubscriptionKey, owner_id: OperationId) -> bool {
        let Some((_, mut record)) = self
            .records
            .remove_if(key, |_, record| record.owner_id == owner_id)
        else {
            return false;
        };
        record.state = SubscriptionState::Cancelled;
        self.table.retire(owner_id);
        record.released.send_replace(true);
        debug!(id = %owner_id, endpoint = %key.0, path = %key.1, "subscription released");
        true
    }
}

impl NotificationSink for SubscriptionRegistry {
    fn notify(
        &self,
        endpoint: &EndpointName,
        path: &ResourcePath,
        owner_id: OperationId,
        result: OperationResult,
    ) {
        self.on_notification(endpoint, path, owner_id, result);
    }
}

impl AckSink for SubscriptionRegistry {
    fn acknowledge(&self, endpoint: &EndpointName, path: &ResourcePath, owner_id: OperationId) {
        self.finish_cancel(&(endpoint.clone(), path.clone()), owner_id);
    }
}

fn not_subscribed(endpoint: &EndpointName, path: &ResourcePath) -> OperationError {
    OperationError::NotSubscribed {
        endpoint: endpoint.clone(),
        path: path.clone(),
    }
}

fn stale(endpoint: &EndpointName, path: &ResourcePath, owner_id: OperationId) -> NotificationOutcome {
    debug!(id = %owner_id, endpoint = %endpoint, path = %path, "stale notification dropped");
    counter!("restgate_stale_notifications_total").increment(1);
    NotificationOutcome::Stale
}
