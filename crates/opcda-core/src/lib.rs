//! # OPC-DA Core
//!
//! Client-side engine for callback-driven remote data sources: asynchronous
//! transaction correlation, callback-subscription lifecycle, and remote-call
//! fault signaling.
//!
//! This crate provides:
//! - **Call gate**: Uniform remote-call wrapper that traces every call and
//!   broadcasts fatal connection faults
//! - **Callback subscription**: Register/unregister lifecycle of a callback
//!   sink against a remote connection point
//! - **Slot table**: Bounded correlation table mapping transaction ids to
//!   pending requests
//! - **Transaction coordinator**: Admission, completion dispatch, update
//!   fan-out, and bounded bulk cancellation for one remote group
//!
//! ## Design Principles
//!
//! 1. **Bounded pending work** - Admission blocks, then fails, never grows
//! 2. **Defensive dispatch** - Mis-correlated or duplicate callbacks are
//!    logged and dropped, never delivered
//! 3. **Teardown always completes** - Cancellation and disconnect are time
//!    bounded and swallow transport failures
//!
//! ## Example
//!
//! ```rust,ignore
//! use opcda_core::{EngineConfig, FaultHub, TransactionCoordinator};
//!
//! let coordinator =
//!     TransactionCoordinator::connect(group_handle, &server, FaultHub::default(), EngineConfig::default());
//! let txn_id = coordinator.add_request(request)?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod connection;
pub mod rpc;
pub mod transaction;

// Re-export key types
pub use config::EngineConfig;
pub use connection::{CallbackSubscription, SubscriptionError};
pub use rpc::{CallGate, FaultEvent, FaultHub, TransportError};
pub use transaction::{
    AsyncRequest, CoordinatorError, ItemUpdate, ItemUpdateBatch, TransactionCoordinator,
    TransactionId,
};

/// Result type for opcda-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for opcda-core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Remote-call transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Callback-subscription lifecycle errors
    #[error("Subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    /// Transaction coordinator errors
    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),
}
