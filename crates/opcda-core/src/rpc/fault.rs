//! Process-wide fault broadcast.
//!
//! When a remote call is classified as RPC-fatal the call gate publishes a
//! [`FaultEvent`] on a [`FaultHub`]. Subscribers register explicitly and
//! receive every event published while their receiver is alive; there is no
//! ambient global registry beyond the hub instance the caller owns.
//!
//! Delivery is synchronous on whichever thread originated the failing call;
//! subscribers must not assume a fixed thread identity.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use tokio::sync::broadcast;

/// Opaque user data attached to fault events, supplied by whoever
/// constructed the call gate.
pub type FaultContext = Arc<dyn Any + Send + Sync>;

/// A fatal connectivity fault observed on a remote call.
#[derive(Clone)]
pub struct FaultEvent {
    /// Opaque user data identifying the failed target, if any.
    pub context: Option<FaultContext>,
    /// The fatal status code (see [`crate::rpc::error`] constants).
    pub code: i32,
}

impl fmt::Debug for FaultEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaultEvent")
            .field("code", &format_args!("{:#010x}", self.code))
            .field("has_context", &self.context.is_some())
            .finish()
    }
}

/// Explicit publish/subscribe registry for fault events.
///
/// Cloning the hub yields another handle to the same broadcast channel, so
/// one hub can be shared between many call gates.
#[derive(Clone)]
pub struct FaultHub {
    sender: broadcast::Sender<FaultEvent>,
}

impl FaultHub {
    /// Creates a hub whose channel buffers up to `capacity` undelivered
    /// events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Registers a new subscriber.
    ///
    /// The subscription ends when the returned receiver is dropped.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FaultEvent> {
        self.sender.subscribe()
    }

    /// Publishes a fault to all current subscribers.
    ///
    /// A hub with no subscribers silently drops the event.
    pub fn publish(&self, event: FaultEvent) {
        tracing::trace!(code = format_args!("{:#010x}", event.code), "fault published");
        let _ = self.sender.send(event);
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for FaultHub {
    fn default() -> Self {
        Self::new(64)
    }
}
