//! Remote-call plumbing: failure taxonomy, fault broadcast, call gate.

pub mod error;
mod fault;
mod gate;

pub use error::TransportError;
pub use fault::{FaultContext, FaultEvent, FaultHub};
pub use gate::CallGate;
