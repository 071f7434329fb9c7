//! Callback-sink registration against a connectable remote source.
//!
//! A connectable source exposes connection points, each identified by an
//! interface identity. [`CallbackSubscription`] manages exactly one
//! registration of one sink against one such connection point:
//! connect / try-connect / disconnect, idempotent teardown, connect-state
//! query.
//!
//! The transport side is abstracted behind two small capability traits,
//! [`ConnectableSource`] and [`ConnectionPoint`], typed over the sink so no
//! open-ended dynamic sink dispatch is needed.

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::rpc::TransportError;

/// Interface identity of a callback sink (GUID analogue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceId(pub u128);

impl InterfaceId {
    /// Creates an interface identity from its raw 128-bit value.
    #[must_use]
    pub const fn new(raw: u128) -> Self {
        Self(raw)
    }
}

impl fmt::Display for InterfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Token returned by a connection point on registration, required to
/// unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationToken(pub u32);

/// A callback sink that can be registered with a connection point.
pub trait CallbackSink: Send + Sync + 'static {
    /// The interface identity the remote connection point must match.
    fn interface_id() -> InterfaceId
    where
        Self: Sized;
}

/// One connection point on a remote source, typed over the sink it accepts.
pub trait ConnectionPoint<S>: Send + Sync {
    /// Registers `sink` with the remote source, returning the token needed
    /// to unregister.
    ///
    /// # Errors
    ///
    /// Returns the transport failure if registration is rejected.
    fn advise(&self, sink: Arc<S>) -> Result<RegistrationToken, TransportError>;

    /// Unregisters a previously advised sink.
    ///
    /// Implementations should bound this call; an uncooperative peer must
    /// not be able to block it indefinitely.
    ///
    /// # Errors
    ///
    /// Returns the transport failure if unregistration fails.
    fn unadvise(&self, token: RegistrationToken) -> Result<(), TransportError>;
}

/// A remote object that exposes connection points for callback sinks.
pub trait ConnectableSource<S: CallbackSink> {
    /// Locates the connection point matching the sink's interface identity.
    ///
    /// # Errors
    ///
    /// [`TransportError::MissingConnectionPoint`] when the source does not
    /// expose the interface, or any other transport failure.
    fn find_connection_point(&self) -> Result<Arc<dyn ConnectionPoint<S>>, TransportError>;
}

/// Errors from subscription lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    /// `connect` was called while a registration is already live.
    #[error("already attached to the connection point")]
    AlreadyConnected,

    /// The transport rejected the operation.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

struct Registration<S> {
    point: Arc<dyn ConnectionPoint<S>>,
    token: RegistrationToken,
}

/// Manages exactly one registration of a callback sink against a
/// connectable source.
///
/// At most one live registration exists per instance; `is_connected` holds
/// exactly while the connection-point reference and registration token are
/// stored. Dropping the subscription disconnects it.
///
/// # Panics
///
/// Methods panic if the internal mutex has been poisoned.
pub struct CallbackSubscription<S: CallbackSink> {
    sink: Arc<S>,
    registration: Mutex<Option<Registration<S>>>,
}

// Poisoned-lock panics are covered by the struct-level note.
#[allow(clippy::missing_panics_doc)]
impl<S: CallbackSink> CallbackSubscription<S> {
    /// Creates an unconnected subscription owning `sink`.
    #[must_use]
    pub fn new(sink: Arc<S>) -> Self {
        Self {
            sink,
            registration: Mutex::new(None),
        }
    }

    /// Returns `true` while the sink is registered with a source.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.registration.lock().unwrap().is_some()
    }

    /// Returns the sink this subscription registers.
    #[must_use]
    pub fn sink(&self) -> &Arc<S> {
        &self.sink
    }

    /// Registers the sink with `source`.
    ///
    /// Intended for construction-time use only; the registration mutex is
    /// held across the remote calls, so transports must not reenter the
    /// subscription from `advise`.
    ///
    /// # Errors
    ///
    /// [`SubscriptionError::AlreadyConnected`] if a registration is live,
    /// or the transport failure from locating or advising the connection
    /// point.
    pub fn connect(&self, source: &dyn ConnectableSource<S>) -> Result<(), SubscriptionError> {
        let mut registration = self.registration.lock().unwrap();
        if registration.is_some() {
            return Err(SubscriptionError::AlreadyConnected);
        }

        let point = source.find_connection_point()?;
        let token = point.advise(Arc::clone(&self.sink))?;
        *registration = Some(Registration { point, token });
        tracing::trace!(
            interface = %S::interface_id(),
            cookie = token.0,
            "callback sink registered"
        );
        Ok(())
    }

    /// Like [`connect`](Self::connect), but never fails: a source that
    /// legitimately lacks the expected connection point is an expected
    /// condition. Returns the connect state afterwards.
    pub fn try_connect(&self, source: &dyn ConnectableSource<S>) -> bool {
        match self.connect(source) {
            Ok(()) | Err(SubscriptionError::AlreadyConnected) => true,
            Err(SubscriptionError::Transport(TransportError::MissingConnectionPoint {
                interface,
            })) => {
                tracing::debug!(%interface, "source has no matching connection point");
                false
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to connect callback sink");
                false
            }
        }
    }

    /// Unregisters the sink if registered. Idempotent and infallible: this
    /// runs on every teardown path, so unregistration failures are logged
    /// and swallowed, and local state is cleared regardless.
    pub fn disconnect(&self) {
        let registration = self.registration.lock().unwrap().take();
        if let Some(Registration { point, token }) = registration {
            match point.unadvise(token) {
                Ok(()) => tracing::trace!(cookie = token.0, "callback sink unregistered"),
                Err(err) => {
                    tracing::error!(error = %err, cookie = token.0, "failed to unregister callback sink");
                }
            }
        }
    }
}

impl<S: CallbackSink> Drop for CallbackSubscription<S> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
