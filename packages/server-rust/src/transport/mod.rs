//! Device-side plumbing: the endpoint directory, its lifecycle observers and
//! an in-process simulated transport.

pub mod directory;
pub mod observer;
pub mod simulated;

pub use directory::EndpointDirectory;
pub use observer::{CompositeRegistrationObserver, RegistrationObserver};
pub use simulated::{SimulatedTransport, MANUFACTURER_TLV};
