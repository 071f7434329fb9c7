//! Client-side asynchronous transaction engine.
//!
//! Correlates caller-initiated asynchronous operations with the completion
//! callbacks the remote source delivers later, enforces a bound on pending
//! work, and fans decoded item updates out to local subscribers.

pub mod coordinator;
pub mod error;
pub mod request;
pub mod slots;
pub mod types;

pub use coordinator::{CancelOutcome, TransactionCoordinator, TransactionSink};
pub use error::CoordinatorError;
pub use request::{AsyncRequest, DataChangeSink, OperationKind};
pub use slots::SlotTable;
pub use types::{ItemUpdate, ItemUpdateBatch, ItemValue, Quality, TransactionId};
