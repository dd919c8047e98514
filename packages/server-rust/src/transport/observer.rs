//! Registration observer trait and composite implementation.
//!
//! Defines [`RegistrationObserver`] for reacting to endpoint lifecycle changes
//! in the [`EndpointDirectory`](super::EndpointDirectory), and
//! [`CompositeRegistrationObserver`] which fans out notifications to multiple
//! observers.

use std::sync::Arc;

use restgate_core::{ConnectionHandle, EndpointName};

/// Observer for endpoint registrations.
///
/// Used as `Arc<dyn RegistrationObserver>`. Callbacks run after the directory
/// has been updated, so `exists()` already reflects the change.
pub trait RegistrationObserver: Send + Sync {
    /// Called after an endpoint registers. `reconnect` is true when the name
    /// replaced a live registration.
    fn on_register(&self, connection: &ConnectionHandle, reconnect: bool);

    /// Called after a registered endpoint refreshes its registration.
    fn on_update(&self, connection: &ConnectionHandle);

    /// Called after an endpoint is removed.
    fn on_deregister(&self, endpoint: &EndpointName);
}

/// Composite observer that fans out to multiple observers.
#[derive(Default)]
pub struct CompositeRegistrationObserver {
    observers: Vec<Arc<dyn RegistrationObserver>>,
}

impl CompositeRegistrationObserver {
    /// Creates a composite observer with the given list of observers.
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn RegistrationObserver>>) -> Self {
        Self { observers }
    }

    /// Adds an observer after construction.
    pub fn add(&mut self, observer: Arc<dyn RegistrationObserver>) {
        self.observers.push(observer);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl RegistrationObserver for CompositeRegistrationObserver {
    fn on_register(&self, connection: &ConnectionHandle, reconnect: bool) {
        for observer in &self.observers {
            observer.on_register(connection, reconnect);
        }
    }

    fn on_update(&self, connection: &ConnectionHandle) {
        for observer in &self.observers {
            observer.on_update(connection);
        }
    }

    fn on_deregister(&self, endpoint: &EndpointName) {
        for observer in &self.observers {
            observer.on_deregister(endpoint);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct CountingObserver {
        registers: AtomicUsize,
        reconnects: AtomicUsize,
        updates: AtomicUsize,
        deregisters: AtomicUsize,
    }

    impl RegistrationObserver for CountingObserver {
        fn on_register(&self, _connection: &ConnectionHandle, reconnect: bool) {
            self.registers.fetch_add(1, Ordering::Relaxed);
            if reconnect {
                self.reconnects.fetch_add(1, Ordering::Relaxed);
            }
        }

        fn on_update(&self, _connection: &ConnectionHandle) {
            self.updates.fetch_add(1, Ordering::Relaxed);
        }

        fn on_deregister(&self, _endpoint: &EndpointName) {
            self.deregisters.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn connection() -> ConnectionHandle {
        ConnectionHandle {
            endpoint: EndpointName::new("dev1"),
            connection_id: 1,
            queue_mode: false,
        }
    }

    #[test]
    fn composite_fans_out_to_all_observers() {
        let first = Arc::new(CountingObserver::default());
        let second = Arc::new(CountingObserver::default());
        let mut composite = CompositeRegistrationObserver::new(vec![first.clone()]);
        composite.add(second.clone());
        assert_eq!(composite.len(), 2);

        composite.on_register(&connection(), false);
        composite.on_register(&connection(), true);
        composite.on_update(&connection());
        composite.on_deregister(&EndpointName::new("dev1"));

        for observer in [&first, &second] {
            assert_eq!(observer.registers.load(Ordering::Relaxed), 2);
            assert_eq!(observer.reconnects.load(Ordering::Relaxed), 1);
            assert_eq!(observer.updates.load(Ordering::Relaxed), 1);
            assert_eq!(observer.deregisters.load(Ordering::Relaxed), 1);
        }
    }

    #[test]
    fn empty_composite_is_a_no_op() {
        let composite = CompositeRegistrationObserver::default();
        assert!(composite.is_empty());
        composite.on_register(&connection(), false);
    }
}
