//! Async operation table: the correlation store between dispatched device
//! operations and their eventual results.
//!
//! Every read/write gets a `Pending` entry keyed by its [`OperationId`]; the
//! transport's completion callback resolves it exactly once, and pull or push
//! delivery consumes it through [`AsyncOperationTable::take`]. Subscriptions own
//! one long-lived `Notify` entry under their owner id that queues one result per
//! notification cycle.
//!
//! All access is per key through `DashMap`, so unrelated operations never
//! contend on a shared lock.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use metrics::counter;
use restgate_core::{
    AsyncResponse, Completion, CompletionSink, EndpointName, EndpointRegistry, OperationId,
    OperationIdGenerator, OperationKind, OperationResult, OperationState, ResourcePath,
    TransportAdapter,
};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::dispatcher::NotificationDispatcher;
use super::operation::{OperationError, Resolution};

/// Status recorded for one-shot operations that never heard back from the device.
pub const GATEWAY_TIMEOUT: u16 = 504;

#[derive(Debug)]
struct OperationEntry {
    endpoint: EndpointName,
    path: ResourcePath,
    kind: OperationKind,
    state: OperationState,
    created_at: Instant,
    results: VecDeque<AsyncResponse>,
    /// Set when the owning subscription is cancelled; the entry is removed
    /// once its queued results are delivered.
    retired: bool,
}

impl OperationEntry {
    fn new(endpoint: EndpointName, path: ResourcePath, kind: OperationKind) -> Self {
        Self {
            endpoint,
            path,
            kind,
            state: OperationState::Pending,
            created_at: Instant::now(),
            results: VecDeque::new(),
            retired: false,
        }
    }

    fn is_one_shot(&self) -> bool {
        self.kind != OperationKind::Notify
    }
}

/// Read-only view of a table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSnapshot {
    pub endpoint: EndpointName,
    pub path: ResourcePath,
    pub kind: OperationKind,
    pub state: OperationState,
    /// Results resolved but not yet delivered.
    pub queued_results: usize,
}

/// Correlation store for in-flight and resolved-but-undelivered operations.
pub struct AsyncOperationTable {
    entries: DashMap<OperationId, OperationEntry>,
    ids: Arc<OperationIdGenerator>,
    registry: Arc<dyn EndpointRegistry>,
    transport: Arc<dyn TransportAdapter>,
    dispatcher: Arc<NotificationDispatcher>,
}

impl AsyncOperationTable {
    #[must_use]
    pub fn new(
        ids: Arc<OperationIdGenerator>,
        registry: Arc<dyn EndpointRegistry>,
        transport: Arc<dyn TransportAdapter>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            ids,
            registry,
            transport,
            dispatcher,
        }
    }

    /// Allocates an id, records a `Pending` entry and dispatches the device
    /// operation. Returns as soon as the transport accepted the request.
    ///
    /// `payload` is sent with writes and ignored for reads.
    ///
    /// # Errors
    ///
    /// - `UnknownEndpoint` if the endpoint is not registered.
    /// - `InvalidResourcePath` if the transport cannot address `path`.
    /// - `Internal` for `Notify`, which only subscriptions create, or if the
    ///   transport rejects the request.
    ///
    /// Endpoint and path are checked before an id is allocated; on any error
    /// no entry remains in the table.
    pub fn create(
        self: &Arc<Self>,
        endpoint: &EndpointName,
        path: &ResourcePath,
        kind: OperationKind,
        payload: Vec<u8>,
    ) -> Result<OperationId, OperationError> {
        if !self.registry.exists(endpoint) {
            return Err(OperationError::UnknownEndpoint(endpoint.clone()));
        }
        if !self.transport.validate_path(endpoint, path) {
            return Err(OperationError::InvalidResourcePath {
                endpoint: endpoint.clone(),
                path: path.clone(),
            });
        }
        let write_payload = match kind {
            OperationKind::Read => None,
            OperationKind::Write => Some(payload),
            OperationKind::Notify => {
                return Err(OperationError::Internal(anyhow::anyhow!(
                    "notify operations are opened by subscriptions"
                )))
            }
        };

        let id = self.ids.next();
        self.entries
            .insert(id, OperationEntry::new(endpoint.clone(), path.clone(), kind));

        let sink: Arc<dyn CompletionSink> = Arc::clone(self) as Arc<dyn CompletionSink>;
        let completion = Completion::new(id, sink);
        let dispatched = match write_payload {
            None => self.transport.dispatch_read(endpoint, path, completion),
            Some(payload) => self
                .transport
                .dispatch_write(endpoint, path, payload, completion),
        };

        if let Err(error) = dispatched {
            self.entries.remove(&id);
            debug!(endpoint = %endpoint, path = %path, error = %error, "dispatch failed");
            return Err(OperationError::from_transport(error, endpoint, path));
        }

        counter!("restgate_operations_created_total", "kind" => kind.as_str()).increment(1);
        debug!(id = %id, endpoint = %endpoint, path = %path, kind = kind.as_str(), "operation dispatched");
        Ok(id)
    }

    /// Records the device result for `id`. Only the first call on a `Pending`
    /// entry has any effect; later calls are logged and ignored.
    pub fn resolve(&self, id: OperationId, result: OperationResult) -> Resolution {
        let Some(mut entry) = self.entries.get_mut(&id) else {
            warn!(id = %id, status = result.status, "resolution for unknown or delivered operation ignored");
            counter!("restgate_duplicate_resolutions_total").increment(1);
            return Resolution::Unknown;
        };
        if entry.state != OperationState::Pending {
            warn!(id = %id, status = result.status, "duplicate resolution ignored");
            counter!("restgate_duplicate_resolutions_total").increment(1);
            return Resolution::Duplicate;
        }

        entry.state = OperationState::Resolved;
        entry
            .results
            .push_back(AsyncResponse::new(id, result, unix_millis()));
        drop(entry);

        self.dispatcher.enqueue_response(id);
        counter!("restgate_operations_resolved_total").increment(1);
        Resolution::Resolved
    }

    /// Consumes the oldest undelivered result for `id`.
    ///
    /// One-shot entries are removed. Subscription entries stay in place to
    /// accept the next notification cycle, unless the subscription has been
    /// cancelled and nothing is left to deliver.
    pub fn take(&self, id: OperationId) -> Option<AsyncResponse> {
        let mut entry = self.entries.get_mut(&id)?;
        let response = entry.results.pop_front()?;
        if entry.results.is_empty() {
            entry.state = OperationState::Delivered;
        }
        let finished = entry.results.is_empty() && (entry.is_one_shot() || entry.retired);
        drop(entry);

        if finished {
            self.entries
                .remove_if(&id, |_, e| e.results.is_empty() && (e.is_one_shot() || e.retired));
        }
        Some(response)
    }

    /// Whether `id` is still waiting for its device result.
    #[must_use]
    pub fn peek_pending(&self, id: OperationId) -> bool {
        self.entries
            .get(&id)
            .is_some_and(|entry| entry.state == OperationState::Pending)
    }

    #[must_use]
    pub fn snapshot(&self, id: OperationId) -> Option<OperationSnapshot> {
        self.entries.get(&id).map(|entry| OperationSnapshot {
            endpoint: entry.endpoint.clone(),
            path: entry.path.clone(),
            kind: entry.kind,
            state: entry.state,
            queued_results: entry.results.len(),
        })
    }

    /// Number of tracked entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of one-shot operations still waiting for a device result.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.is_one_shot() && entry.state == OperationState::Pending)
            .count()
    }

    /// Resolves every one-shot operation that has been `Pending` for at least
    /// `max_age` with 504. Returns how many were expired.
    pub fn expire_pending(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let expired: Vec<OperationId> = self
            .entries
            .iter()
            .filter(|entry| {
                entry.is_one_shot()
                    && entry.state == OperationState::Pending
                    && now.duration_since(entry.created_at) >= max_age
            })
            .map(|entry| *entry.key())
            .collect();

        let mut count = 0;
        for id in expired {
            if self.resolve(id, OperationResult::status_only(GATEWAY_TIMEOUT)) == Resolution::Resolved {
                warn!(id = %id, "operation timed out waiting for device");
                count += 1;
            }
        }
        count
    }

    // -- subscription-owned entries ------------------------------------------

    /// Opens the `Notify` entry for a new subscription. It stays `Pending`
    /// until the first notification arrives.
    pub(crate) fn open_subscription(
        &self,
        owner_id: OperationId,
        endpoint: &EndpointName,
        path: &ResourcePath,
    ) {
        self.entries.insert(
            owner_id,
            OperationEntry::new(endpoint.clone(), path.clone(), OperationKind::Notify),
        );
    }

    /// Queues one resolved notification cycle under the subscription's owner id.
    pub(crate) fn record_notification(
        &self,
        owner_id: OperationId,
        endpoint: &EndpointName,
        path: &ResourcePath,
        result: OperationResult,
    ) {
        {
            let mut entry = self.entries.entry(owner_id).or_insert_with(|| {
                OperationEntry::new(endpoint.clone(), path.clone(), OperationKind::Notify)
            });
            entry.state = OperationState::Resolved;
            entry
                .results
                .push_back(AsyncResponse::new(owner_id, result, unix_millis()));
        }
        self.dispatcher.enqueue_response(owner_id);
    }

    /// Marks a subscription's entry as finished. Undelivered results remain
    /// retrievable; the entry disappears once they are taken.
    pub(crate) fn retire(&self, owner_id: OperationId) {
        if let Some(mut entry) = self.entries.get_mut(&owner_id) {
            entry.retired = true;
        }
        self.entries
            .remove_if(&owner_id, |_, e| e.retired && e.results.is_empty());
    }
}

impl CompletionSink for AsyncOperationTable {
    fn complete(&self, id: OperationId, result: OperationResult) {
        self.resolve(id, result);
    }
}

/// Current wall-clock time as Unix milliseconds.
pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use restgate_core::TransportError;

    use super::*;
    use crate::service::testing::Harness;

    fn dev1() -> EndpointName {
        EndpointName::new("dev1")
    }

    fn path(raw: &str) -> ResourcePath {
        raw.parse().unwrap()
    }

    #[tokio::test]
    async fn create_inserts_pending_and_dispatches() {
        let harness = Harness::new();
        harness.transport.hold_completions();

        let id = harness
            .table
            .create(&dev1(), &path("3/0/0"), OperationKind::Read, Vec::new())
            .unwrap();

        assert!(harness.table.peek_pending(id));
        assert_eq!(harness.transport.reads(), vec![id]);
        assert_eq!(harness.table.pending_count(), 1);
    }

    #[tokio::test]
    async fn unknown_endpoint_fails_before_allocating() {
        let harness = Harness::new();
        let err = harness
            .table
            .create(
                &EndpointName::new("ghost"),
                &path("3/0/0"),
                OperationKind::Read,
                Vec::new(),
            )
            .unwrap_err();

        assert_eq!(err.status_code(), 410);
        assert!(harness.table.is_empty());
        assert!(harness.transport.reads().is_empty());
    }

    #[tokio::test]
    async fn invalid_path_fails_without_entry() {
        let harness = Harness::new();
        let err = harness
            .table
            .create(&dev1(), &path("non/existing/path"), OperationKind::Read, Vec::new())
            .unwrap_err();

        assert_eq!(err.status_code(), 404);
        assert!(harness.table.is_empty());
    }

    #[tokio::test]
    async fn dispatch_failure_removes_entry() {
        let harness = Harness::new();
        harness.transport.fail_next(TransportError::EndpointGone);

        let err = harness
            .table
            .create(&dev1(), &path("3/0/0"), OperationKind::Read, Vec::new())
            .unwrap_err();

        assert!(matches!(err, OperationError::UnknownEndpoint(_)));
        assert!(harness.table.is_empty());
    }

    #[tokio::test]
    async fn notify_kind_is_rejected_by_create() {
        let harness = Harness::new();
        let err = harness
            .table
            .create(&dev1(), &path("3/0/0"), OperationKind::Notify, Vec::new())
            .unwrap_err();
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn synchronous_completion_inside_dispatch_resolves() {
        let harness = Harness::new();
        let id = harness
            .table
            .create(&dev1(), &path("3/0/0"), OperationKind::Read, Vec::new())
            .unwrap();

        assert!(!harness.table.peek_pending(id));
        let response = harness.table.take(id).unwrap();
        assert_eq!(response.status, 200);
        assert!(harness.table.is_empty());
    }

    #[tokio::test]
    async fn second_resolution_never_overwrites() {
        let harness = Harness::new();
        harness.transport.hold_completions();
        let id = harness
            .table
            .create(&dev1(), &path("3/0/0"), OperationKind::Read, Vec::new())
            .unwrap();

        let first = harness.table.resolve(id, OperationResult::new(200, b"a".to_vec()));
        let second = harness.table.resolve(id, OperationResult::new(500, b"b".to_vec()));

        assert_eq!(first, Resolution::Resolved);
        assert_eq!(second, Resolution::Duplicate);

        let response = harness.table.take(id).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.payload, b"a");

        assert_eq!(
            harness.table.resolve(id, OperationResult::status_only(200)),
            Resolution::Unknown
        );
        assert!(harness.table.take(id).is_none());
    }

    #[tokio::test]
    async fn take_on_pending_returns_none_and_keeps_entry() {
        let harness = Harness::new();
        harness.transport.hold_completions();
        let id = harness
            .table
            .create(&dev1(), &path("1/0/8"), OperationKind::Write, b"go".to_vec())
            .unwrap();

        assert!(harness.table.take(id).is_none());
        assert!(harness.table.peek_pending(id));
        assert_eq!(harness.transport.writes(), vec![(id, b"go".to_vec())]);
    }

    #[tokio::test]
    async fn notify_entry_queues_cycles_in_order() {
        let harness = Harness::new();
        let owner = OperationIdGenerator::new().next();
        let p = path("3303/0/5700");
        harness.table.open_subscription(owner, &dev1(), &p);
        assert!(harness.table.peek_pending(owner));

        harness
            .table
            .record_notification(owner, &dev1(), &p, OperationResult::new(200, b"21".to_vec()));
        harness
            .table
            .record_notification(owner, &dev1(), &p, OperationResult::new(200, b"22".to_vec()));

        assert_eq!(harness.table.take(owner).unwrap().payload, b"21");
        assert_eq!(harness.table.take(owner).unwrap().payload, b"22");
        assert!(harness.table.take(owner).is_none());

        let snapshot = harness.table.snapshot(owner).unwrap();
        assert_eq!(snapshot.state, OperationState::Delivered);
        assert_eq!(snapshot.kind, OperationKind::Notify);
    }

    #[tokio::test]
    async fn retired_entry_survives_until_drained() {
        let harness = Harness::new();
        let owner = OperationIdGenerator::new().next();
        let p = path("3303/0/5700");
        harness.table.open_subscription(owner, &dev1(), &p);
        harness
            .table
            .record_notification(owner, &dev1(), &p, OperationResult::status_only(200));

        harness.table.retire(owner);
        assert!(harness.table.snapshot(owner).is_some());

        assert!(harness.table.take(owner).is_some());
        assert!(harness.table.snapshot(owner).is_none());
    }

    #[tokio::test]
    async fn concurrent_creates_yield_unique_ids() {
        let harness = Harness::new();
        harness.transport.hold_completions();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let table = Arc::clone(&harness.table);
                tokio::spawn(async move {
                    (0..50)
                        .map(|_| {
                            table
                                .create(&dev1(), &path("3/0/0"), OperationKind::Read, Vec::new())
                                .unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for task in tasks {
            for id in task.await.unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(harness.table.pending_count(), 800);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_resolutions_of_one_id_resolve_once() {
        let harness = Harness::new();
        harness.transport.hold_completions();
        let id = harness
            .table
            .create(&dev1(), &path("3/0/0"), OperationKind::Read, Vec::new())
            .unwrap();
        let barrier = Arc::new(tokio::sync::Barrier::new(16));

        let tasks: Vec<_> = (0..16u16)
            .map(|n| {
                let table = Arc::clone(&harness.table);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    table.resolve(id, OperationResult::status_only(200 + n))
                })
            })
            .collect();

        let mut outcomes = Vec::new();
        for task in tasks {
            outcomes.push(task.await.unwrap());
        }
        assert_eq!(outcomes.iter().filter(|o| **o == Resolution::Resolved).count(), 1);
        assert_eq!(outcomes.iter().filter(|o| **o == Resolution::Duplicate).count(), 15);

        // late device callbacks through the transport handle change nothing
        let late: Vec<_> = (0..16)
            .map(|_| {
                let completion = Completion::new(
                    id,
                    Arc::clone(&harness.table) as Arc<dyn CompletionSink>,
                );
                tokio::spawn(async move { completion.complete(OperationResult::status_only(500)) })
            })
            .collect();
        for task in late {
            task.await.unwrap();
        }

        let batch = harness.dispatcher.pull(&harness.table);
        assert_eq!(batch.async_responses.len(), 1);
        assert_eq!(batch.async_responses[0].id, id);
        assert_ne!(batch.async_responses[0].status, 500);
        assert!(harness.table.is_empty());
    }

    proptest::proptest! {
        #[test]
        fn any_completion_sequence_yields_one_delivery(
            statuses in proptest::collection::vec(100u16..600, 1..8)
        ) {
            let harness = Harness::new();
            harness.transport.hold_completions();
            let id = harness
                .table
                .create(&dev1(), &path("3/0/0"), OperationKind::Read, Vec::new())
                .unwrap();

            let resolved = statuses
                .iter()
                .filter(|status| {
                    harness.table.resolve(id, OperationResult::status_only(**status))
                        == Resolution::Resolved
                })
                .count();
            proptest::prop_assert_eq!(resolved, 1);

            let response = harness.table.take(id).unwrap();
            proptest::prop_assert_eq!(response.status, statuses[0]);
            proptest::prop_assert!(harness.table.take(id).is_none());
        }
    }
}
