//! In-process device simulator implementing [`TransportAdapter`].
//!
//! Each simulated device holds a flat map of resource values keyed by numeric
//! path. Reads and writes complete on a spawned task after the configured
//! latency, the way a real device answers asynchronously. Observations are
//! kept per device and notified whenever a value changes.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use restgate_core::{
    AckHandle, Completion, ConnectionHandle, EndpointName, EndpointRegistry, NotificationHandle,
    OperationResult, ResourcePath, TransportAdapter, TransportError,
};
use tracing::debug;

use super::directory::EndpointDirectory;

/// Status returned for a successful read, write or execute.
pub const STATUS_OK: u16 = 200;
/// Status returned for a resource the device does not have (4.04 Not Found).
pub const STATUS_NOT_FOUND: u16 = 404;

/// Manufacturer resource (3/0/0) encoded as a single TLV resource value.
pub const MANUFACTURER_TLV: &[u8] = &[
    0xd0, 0x00, 0x08, b'8', b'd', b'e', b'v', b'i', b'c', b'e', b's',
];

/// Deepest addressable level: object / instance / resource.
const MAX_DEPTH: usize = 3;

type ResourceKey = Vec<u16>;

/// State of one simulated device.
#[derive(Default)]
struct SimulatedDevice {
    resources: Mutex<BTreeMap<ResourceKey, Vec<u8>>>,
    observations: Mutex<HashMap<ResourceKey, NotificationHandle>>,
}

impl SimulatedDevice {
    /// A device exposing the default object model: manufacturer,
    /// registration-update trigger and a temperature sensor.
    fn with_default_model() -> Self {
        let device = Self::default();
        {
            let mut resources = device.resources.lock();
            resources.insert(vec![3, 0, 0], MANUFACTURER_TLV.to_vec());
            resources.insert(vec![1, 0, 8], Vec::new());
            resources.insert(vec![3303, 0, 5700], b"21.5".to_vec());
            resources.insert(vec![3303, 0, 5701], b"Cel".to_vec());
        }
        device
    }

    /// Reads a resource, or concatenates every resource below an object or
    /// instance path.
    fn read(&self, key: &[u16]) -> Option<Vec<u8>> {
        let resources = self.resources.lock();
        if let Some(value) = resources.get(key) {
            return Some(value.clone());
        }
        let mut found = false;
        let mut combined = Vec::new();
        for (_, value) in resources.iter().filter(|(path, _)| path.starts_with(key)) {
            found = true;
            combined.extend_from_slice(value);
        }
        found.then_some(combined)
    }
}

/// Transport backed by simulated devices registered in an [`EndpointDirectory`].
pub struct SimulatedTransport {
    devices: DashMap<EndpointName, Arc<SimulatedDevice>>,
    directory: Arc<EndpointDirectory>,
    latency: Duration,
}

impl SimulatedTransport {
    #[must_use]
    pub fn new(directory: Arc<EndpointDirectory>, latency: Duration) -> Self {
        Self {
            devices: DashMap::new(),
            directory,
            latency,
        }
    }

    /// Creates a device with the default object model and registers it.
    pub fn add_device(&self, name: EndpointName, queue_mode: bool) -> ConnectionHandle {
        self.devices
            .insert(name.clone(), Arc::new(SimulatedDevice::with_default_model()));
        self.directory.register(name, queue_mode)
    }

    /// Sets a resource value and notifies its observer, if any.
    ///
    /// Returns `false` if the device is unknown or the path is not numeric.
    pub fn set_value(&self, name: &EndpointName, path: &ResourcePath, value: Vec<u8>) -> bool {
        let Some(device) = self.device(name) else {
            return false;
        };
        let Some(key) = path.numeric_ids() else {
            return false;
        };
        device.resources.lock().insert(key.clone(), value.clone());
        let observer = device.observations.lock().get(&key).cloned();
        if let Some(handle) = observer {
            self.spawn_or_run(move || handle.notify(OperationResult::new(STATUS_OK, value)));
        }
        true
    }

    /// Simulates a device reboot: every observation is lost and the device
    /// registers again.
    pub fn restart(&self, name: &EndpointName) -> Option<ConnectionHandle> {
        let device = self.device(name)?;
        device.observations.lock().clear();
        let queue_mode = self
            .directory
            .connection(name)
            .is_some_and(|connection| connection.queue_mode);
        Some(self.directory.register(name.clone(), queue_mode))
    }

    /// Simulates a device leaving the network.
    pub fn disconnect(&self, name: &EndpointName) -> bool {
        if let Some(device) = self.device(name) {
            device.observations.lock().clear();
        }
        self.directory.deregister(name).is_some()
    }

    /// Number of paths currently observed on `name`.
    #[must_use]
    pub fn observation_count(&self, name: &EndpointName) -> usize {
        self.device(name)
            .map_or(0, |device| device.observations.lock().len())
    }

    fn device(&self, name: &EndpointName) -> Option<Arc<SimulatedDevice>> {
        self.devices.get(name).map(|device| Arc::clone(&device))
    }

    fn connected_device(&self, name: &EndpointName) -> Result<Arc<SimulatedDevice>, TransportError> {
        if !self.directory.exists(name) {
            return Err(TransportError::EndpointGone);
        }
        self.device(name).ok_or(TransportError::EndpointGone)
    }

    fn key(path: &ResourcePath) -> Result<ResourceKey, TransportError> {
        path.numeric_ids()
            .filter(|ids| (1..=MAX_DEPTH).contains(&ids.len()))
            .ok_or(TransportError::InvalidPath)
    }

    /// Runs `job` after the configured latency on a spawned task, or inline
    /// when no runtime is available.
    fn spawn_or_run<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let latency = self.latency;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if !latency.is_zero() {
                        tokio::time::sleep(latency).await;
                    }
                    job();
                });
            }
            Err(_) => job(),
        }
    }
}

impl TransportAdapter for SimulatedTransport {
    fn validate_path(&self, _endpoint: &EndpointName, path: &ResourcePath) -> bool {
        Self::key(path).is_ok()
    }

    fn dispatch_read(
        &self,
        endpoint: &EndpointName,
        path: &ResourcePath,
        completion: Completion,
    ) -> Result<(), TransportError> {
        let device = self.connected_device(endpoint)?;
        let key = Self::key(path)?;
        debug!(endpoint = %endpoint, path = %path, id = %completion.id(), "simulated read");
        self.spawn_or_run(move || {
            let result = device.read(&key).map_or_else(
                || OperationResult::status_only(STATUS_NOT_FOUND),
                |value| OperationResult::new(STATUS_OK, value),
            );
            completion.complete(result);
        });
        Ok(())
    }

    fn dispatch_write(
        &self,
        endpoint: &EndpointName,
        path: &ResourcePath,
        payload: Vec<u8>,
        completion: Completion,
    ) -> Result<(), TransportError> {
        let device = self.connected_device(endpoint)?;
        let key = Self::key(path)?;
        debug!(endpoint = %endpoint, path = %path, id = %completion.id(), "simulated write");
        self.spawn_or_run(move || {
            let written = {
                let mut resources = device.resources.lock();
                match resources.get_mut(&key) {
                    // Executable resources accept an empty body and keep their value.
                    Some(value) if !payload.is_empty() => {
                        value.clone_from(&payload);
                        true
                    }
                    Some(_) => false,
                    None => {
                        drop(resources);
                        completion.complete(OperationResult::status_only(STATUS_NOT_FOUND));
                        return;
                    }
                }
            };
            completion.complete(OperationResult::status_only(STATUS_OK));
            if written {
                let observer = device.observations.lock().get(&key).cloned();
                if let Some(handle) = observer {
                    handle.notify(OperationResult::new(STATUS_OK, payload));
                }
            }
        });
        Ok(())
    }

    fn start_observe(
        &self,
        endpoint: &EndpointName,
        path: &ResourcePath,
        handle: NotificationHandle,
    ) -> Result<(), TransportError> {
        let device = self.connected_device(endpoint)?;
        let key = Self::key(path)?;
        device.observations.lock().insert(key.clone(), handle.clone());
        debug!(endpoint = %endpoint, path = %path, owner = %handle.owner_id(), "simulated observe");

        // A device answers an observe with the current value.
        self.spawn_or_run(move || {
            let result = device.read(&key).map_or_else(
                || OperationResult::status_only(STATUS_NOT_FOUND),
                |value| OperationResult::new(STATUS_OK, value),
            );
            handle.notify(result);
        });
        Ok(())
    }

    fn stop_observe(
        &self,
        endpoint: &EndpointName,
        path: &ResourcePath,
        ack: AckHandle,
    ) -> Result<(), TransportError> {
        let device = self.connected_device(endpoint)?;
        let key = Self::key(path)?;
        device.observations.lock().remove(&key);
        self.spawn_or_run(move || ack.acknowledge());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use restgate_core::{AckSink, CompletionSink, NotificationSink, OperationId, OperationIdGenerator};
    use tokio::sync::mpsc;

    use super::*;

    #[derive(Clone)]
    struct ChannelSink {
        tx: mpsc::UnboundedSender<(OperationId, OperationResult)>,
        acks: Arc<AtomicUsize>,
    }

    impl CompletionSink for ChannelSink {
        fn complete(&self, id: OperationId, result: OperationResult) {
            let _ = self.tx.send((id, result));
        }
    }

    impl NotificationSink for ChannelSink {
        fn notify(
            &self,
            _endpoint: &EndpointName,
            _path: &ResourcePath,
            owner_id: OperationId,
            result: OperationResult,
        ) {
            let _ = self.tx.send((owner_id, result));
        }
    }

    impl AckSink for ChannelSink {
        fn acknowledge(&self, _endpoint: &EndpointName, _path: &ResourcePath, _owner_id: OperationId) {
            self.acks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn setup() -> (
        SimulatedTransport,
        Arc<ChannelSink>,
        mpsc::UnboundedReceiver<(OperationId, OperationResult)>,
    ) {
        let directory = Arc::new(EndpointDirectory::new());
        let transport = SimulatedTransport::new(directory, Duration::from_millis(5));
        transport.add_device(dev1(), false);
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Arc::new(ChannelSink {
            tx,
            acks: Arc::new(AtomicUsize::new(0)),
        });
        (transport, sink, rx)
    }

    fn dev1() -> EndpointName {
        EndpointName::new("dev1")
    }

    fn path(raw: &str) -> ResourcePath {
        raw.parse().unwrap()
    }

    fn id(sequence: u64) -> OperationId {
        OperationIdGenerator::starting_at(sequence).next()
    }

    #[tokio::test]
    async fn read_returns_manufacturer_tlv() {
        let (transport, sink, mut rx) = setup();
        transport
            .dispatch_read(&dev1(), &path("3/0/0"), Completion::new(id(1), sink))
            .unwrap();

        let (got, result) = rx.recv().await.unwrap();
        assert_eq!(got, id(1));
        assert_eq!(result.status, STATUS_OK);
        assert_eq!(result.payload, MANUFACTURER_TLV);
    }

    #[tokio::test]
    async fn read_of_missing_resource_is_not_found() {
        let (transport, sink, mut rx) = setup();
        transport
            .dispatch_read(&dev1(), &path("5/0/1"), Completion::new(id(1), sink))
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().1.status, STATUS_NOT_FOUND);
    }

    #[tokio::test]
    async fn instance_read_combines_resources() {
        let (transport, sink, mut rx) = setup();
        transport
            .dispatch_read(&dev1(), &path("3303/0"), Completion::new(id(1), sink))
            .unwrap();
        let (_, result) = rx.recv().await.unwrap();
        assert_eq!(result.payload, b"21.5Cel");
    }

    #[tokio::test]
    async fn execute_keeps_value_and_answers_ok() {
        let (transport, sink, mut rx) = setup();
        transport
            .dispatch_write(&dev1(), &path("1/0/8"), Vec::new(), Completion::new(id(1), sink))
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().1, OperationResult::status_only(STATUS_OK));
    }

    #[tokio::test]
    async fn paths_are_validated() {
        let (transport, sink, _rx) = setup();
        assert!(transport.validate_path(&dev1(), &path("3303/0/5700")));
        assert!(!transport.validate_path(&dev1(), &path("non/existing/path")));
        assert!(!transport.validate_path(&dev1(), &path("1/2/3/4")));
        assert_eq!(
            transport.dispatch_read(&dev1(), &path("a/b"), Completion::new(id(1), sink)),
            Err(TransportError::InvalidPath)
        );
    }

    #[tokio::test]
    async fn unknown_or_disconnected_device_is_gone() {
        let (transport, sink, _rx) = setup();
        let ghost = EndpointName::new("ghost");
        assert_eq!(
            transport.dispatch_read(&ghost, &path("3/0/0"), Completion::new(id(1), sink.clone())),
            Err(TransportError::EndpointGone)
        );

        assert!(transport.disconnect(&dev1()));
        assert_eq!(
            transport.dispatch_read(&dev1(), &path("3/0/0"), Completion::new(id(2), sink)),
            Err(TransportError::EndpointGone)
        );
    }

    #[tokio::test]
    async fn observe_sends_current_value_then_changes() {
        let (transport, sink, mut rx) = setup();
        let p = path("3303/0/5700");
        let observer = id(7);
        let handle = NotificationHandle::new(dev1(), p.clone(), observer, sink);
        transport.start_observe(&dev1(), &p, handle).unwrap();

        let (owner, first) = rx.recv().await.unwrap();
        assert_eq!(owner, observer);
        assert_eq!(first.payload, b"21.5");

        assert!(transport.set_value(&dev1(), &p, b"22.0".to_vec()));
        let (owner, second) = rx.recv().await.unwrap();
        assert_eq!(owner, observer);
        assert_eq!(second.payload, b"22.0");
    }

    #[tokio::test]
    async fn stop_observe_acknowledges_and_silences_path() {
        let (transport, sink, mut rx) = setup();
        let p = path("3303/0/5700");
        transport
            .start_observe(&dev1(), &p, NotificationHandle::new(dev1(), p.clone(), id(7), sink.clone()))
            .unwrap();
        rx.recv().await.unwrap();

        transport
            .stop_observe(&dev1(), &p, AckHandle::new(dev1(), p.clone(), id(7), sink.clone()))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.acks.load(Ordering::SeqCst), 1);
        assert_eq!(transport.observation_count(&dev1()), 0);

        transport.set_value(&dev1(), &p, b"30".to_vec());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn restart_drops_observations_and_re_registers() {
        let (transport, sink, mut rx) = setup();
        let p = path("3303/0/5700");
        transport
            .start_observe(&dev1(), &p, NotificationHandle::new(dev1(), p.clone(), id(7), sink))
            .unwrap();
        rx.recv().await.unwrap();

        let before = transport.directory.connection(&dev1()).unwrap();
        let after = transport.restart(&dev1()).unwrap();
        assert_ne!(before.connection_id, after.connection_id);
        assert_eq!(transport.observation_count(&dev1()), 0);
    }
}
