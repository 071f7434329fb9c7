//! Call gate — the single choke point for remote calls.
//!
//! Every call to a remote object goes through [`CallGate::invoke`], which
//! logs entry and exit with call context, classifies failures, and publishes
//! a [`FaultEvent`] on fatal connectivity errors. The gate never swallows an
//! error: fatal or not, the original [`TransportError`] is returned to the
//! caller unchanged.

use crate::rpc::error::TransportError;
use crate::rpc::fault::{FaultContext, FaultEvent, FaultHub};

/// Wraps remote calls with logging and fault classification.
#[derive(Clone)]
pub struct CallGate {
    faults: FaultHub,
    context: Option<FaultContext>,
}

impl CallGate {
    /// Creates a gate publishing faults to `faults`, with no user context.
    #[must_use]
    pub fn new(faults: FaultHub) -> Self {
        Self {
            faults,
            context: None,
        }
    }

    /// Creates a gate that attaches `context` to every fault it publishes.
    #[must_use]
    pub fn with_context(faults: FaultHub, context: FaultContext) -> Self {
        Self {
            faults,
            context: Some(context),
        }
    }

    /// Invokes a remote call with no argument summary.
    ///
    /// See [`invoke_with_args`](Self::invoke_with_args).
    ///
    /// # Errors
    ///
    /// Returns the original error of the wrapped call, unchanged.
    pub fn invoke<T>(
        &self,
        object: &str,
        method: &str,
        call: impl FnOnce() -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        self.invoke_with_args(object, method, "", call)
    }

    /// Invokes a remote call, logging `object`/`method`/`args` on entry and
    /// on any failure.
    ///
    /// On an RPC-fatal failure (peer dead or unreachable, see
    /// [`TransportError::rpc_fatal_code`]) a [`FaultEvent`] is published
    /// before the error is returned.
    ///
    /// # Errors
    ///
    /// Returns the original error of the wrapped call, unchanged. Failures
    /// are never suppressed here.
    pub fn invoke_with_args<T>(
        &self,
        object: &str,
        method: &str,
        args: &str,
        call: impl FnOnce() -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        tracing::trace!(object, method, args, "calling remote object");
        match call() {
            Ok(value) => {
                tracing::trace!(object, method, "remote call succeeded");
                Ok(value)
            }
            Err(err) => {
                tracing::error!(object, method, args, error = %err, "remote call failed");
                if let Some(code) = err.rpc_fatal_code() {
                    self.faults.publish(FaultEvent {
                        context: self.context.clone(),
                        code,
                    });
                }
                Err(err)
            }
        }
    }

    /// Returns the fault hub this gate publishes to.
    #[must_use]
    pub fn faults(&self) -> &FaultHub {
        &self.faults
    }
}
