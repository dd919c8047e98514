//! In-memory endpoint directory.
//!
//! Tracks which device names are currently registered, lock-free through
//! `DashMap`, and reports lifecycle changes to registered observers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::RwLock;
use restgate_core::{ConnectionHandle, EndpointName, EndpointRegistry};
use tracing::info;

use super::observer::{CompositeRegistrationObserver, RegistrationObserver};

#[derive(Debug, Clone)]
struct EndpointRecord {
    connection: ConnectionHandle,
    registered_at: Instant,
}

/// Thread-safe registry of registered endpoints.
pub struct EndpointDirectory {
    endpoints: DashMap<EndpointName, EndpointRecord>,
    next_connection_id: AtomicU64,
    observers: RwLock<CompositeRegistrationObserver>,
}

impl EndpointDirectory {
    /// Creates an empty directory.
    ///
    /// Connection ids start at 1 (0 is reserved as "no connection").
    #[must_use]
    pub fn new() -> Self {
        Self {
            endpoints: DashMap::new(),
            next_connection_id: AtomicU64::new(1),
            observers: RwLock::new(CompositeRegistrationObserver::default()),
        }
    }

    /// Adds a lifecycle observer.
    pub fn add_observer(&self, observer: Arc<dyn RegistrationObserver>) {
        self.observers.write().add(observer);
    }

    /// Registers `name`, replacing any live registration under the same name.
    pub fn register(&self, name: EndpointName, queue_mode: bool) -> ConnectionHandle {
        let connection = ConnectionHandle {
            endpoint: name.clone(),
            connection_id: self.next_connection_id.fetch_add(1, Ordering::Relaxed),
            queue_mode,
        };
        let previous = self.endpoints.insert(
            name.clone(),
            EndpointRecord {
                connection: connection.clone(),
                registered_at: Instant::now(),
            },
        );
        let reconnect = previous.is_some();

        info!(endpoint = %name, connection_id = connection.connection_id, reconnect, "endpoint registered");
        self.observers.read().on_register(&connection, reconnect);
        connection
    }

    /// Refreshes the registration of `name`. Returns `None` if it is unknown.
    pub fn update(&self, name: &EndpointName) -> Option<ConnectionHandle> {
        let connection = self.endpoints.get(name)?.connection.clone();
        info!(endpoint = %name, "endpoint registration updated");
        self.observers.read().on_update(&connection);
        Some(connection)
    }

    /// Removes `name`. Returns the connection it had, if any.
    pub fn deregister(&self, name: &EndpointName) -> Option<ConnectionHandle> {
        let (_, record) = self.endpoints.remove(name)?;
        info!(endpoint = %name, "endpoint deregistered");
        self.observers.read().on_deregister(name);
        Some(record.connection)
    }

    /// Returns the total number of registered endpoints.
    #[must_use]
    pub fn count(&self) -> usize {
        self.endpoints.len()
    }

    /// All registered endpoints, ordered by name.
    #[must_use]
    pub fn list(&self) -> Vec<ConnectionHandle> {
        let mut connections: Vec<ConnectionHandle> = self
            .endpoints
            .iter()
            .map(|record| record.connection.clone())
            .collect();
        connections.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        connections
    }

    /// Seconds since `name` last (re-)registered.
    #[must_use]
    pub fn registered_for_secs(&self, name: &EndpointName) -> Option<u64> {
        self.endpoints
            .get(name)
            .map(|record| record.registered_at.elapsed().as_secs())
    }
}

impl Default for EndpointDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointRegistry for EndpointDirectory {
    fn exists(&self, name: &EndpointName) -> bool {
        self.endpoints.contains_key(name)
    }

    fn connection(&self, name: &EndpointName) -> Option<ConnectionHandle> {
        self.endpoints
            .get(name)
            .map(|record| record.connection.clone())
    }
}
