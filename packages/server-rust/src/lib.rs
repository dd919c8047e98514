//! restgate server: an axum REST gateway that correlates asynchronous device
//! operations with the ids handed to HTTP clients, and delivers results by
//! pull or by push to a registered callback.

pub mod auth;
pub mod network;
pub mod service;
pub mod settings;
pub mod traits;
pub mod transport;

pub use network::NetworkModule;
pub use service::{Gateway, GatewayStats, GatewayWorkers, OperationError, ServerConfig};
pub use settings::{Cli, Settings, SettingsError};
pub use traits::CallbackClient;
pub use transport::{EndpointDirectory, SimulatedTransport};
