use std::time::Duration;

/// Engine-level configuration for operation tracking and notification delivery.
///
/// Controls background task intervals, pending-operation expiry, and callback
/// delivery timing.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interval between push-delivery flushes in milliseconds. Everything
    /// resolved within one window goes out in a single callback request.
    pub coalesce_window_ms: u64,
    /// Maximum time a callback request may take in milliseconds.
    pub callback_timeout_ms: u64,
    /// Age after which a one-shot operation still `Pending` is resolved with
    /// 504 Gateway Timeout.
    pub pending_timeout_ms: u64,
    /// Interval between pending-operation sweeps in milliseconds.
    pub gc_interval_ms: u64,
    /// How long `subscribe` waits for a cancelling subscription to be
    /// acknowledged before completing the cancellation locally.
    pub cancel_timeout_ms: u64,
}

impl ServerConfig {
    #[must_use]
    pub fn pending_timeout(&self) -> Duration {
        Duration::from_millis(self.pending_timeout_ms)
    }

    #[must_use]
    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_timeout_ms)
    }

    #[must_use]
    pub fn callback_timeout(&self) -> Duration {
        Duration::from_millis(self.callback_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            coalesce_window_ms: 50,
            callback_timeout_ms: 5_000,
            pending_timeout_ms: 60_000,
            gc_interval_ms: 1_000,
            cancel_timeout_ms: 5_000,
        }
    }
}
