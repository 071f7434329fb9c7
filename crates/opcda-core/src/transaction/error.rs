//! Transaction engine error types.

use std::time::Duration;

/// Errors from coordinator operations.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// The callback subscription is not registered with the remote source.
    #[error("callback subscription is not connected")]
    NotConnected,

    /// No request slot freed up within the admission timeout.
    #[error("exceeded limit of pending requests (no slot freed within {0:?})")]
    CapacityExceeded(Duration),

    /// A transport callback failed the defensive correlation checks,
    /// indicating a protocol violation. Logged and dropped by the
    /// callback handlers, never returned to a caller.
    #[error("correlation mismatch on {what}: expected {expected}, got {actual}")]
    CorrelationMismatch {
        /// Which correlation check failed (`"group handle"` or
        /// `"transaction id"`).
        what: &'static str,
        /// The value the coordinator expected.
        expected: u32,
        /// The value the callback carried.
        actual: u32,
    },

    /// Pending requests did not drain within the bulk-cancellation timeout.
    #[error("pending requests were not cancelled within {0:?}")]
    CancelTimeout(Duration),
}
