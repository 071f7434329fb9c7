//! Engine configuration.

use std::time::Duration;

/// Configuration for the asynchronous transaction engine.
///
/// Owned by the caller; the engine never loads configuration itself.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum simultaneous outstanding requests (slot table capacity).
    pub max_pending_requests: usize,
    /// How long request admission may block waiting for a free slot.
    pub request_timeout: Duration,
    /// Bound on the cooperative cancellation wait during shutdown.
    pub shutdown_timeout: Duration,
    /// Buffer capacity of the general item-update broadcast channel.
    pub update_buffer_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_pending_requests: 32,
            request_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(10),
            update_buffer_size: 1024,
        }
    }
}
