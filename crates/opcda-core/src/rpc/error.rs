//! Transport failure taxonomy and RPC-fatal classification.
//!
//! Remote calls surface failures as [`TransportError`]. A small subset of
//! status codes means the peer process is gone or unreachable; those are
//! classified as RPC-fatal and broadcast through the
//! [`FaultHub`](crate::rpc::FaultHub) by the call gate, in addition to being
//! returned to the caller unchanged.

use crate::connection::InterfaceId;

/// The remote peer's client process died.
pub const RPC_E_CLIENT_DIED: i32 = 0x8001_0008_u32 as i32;
/// The remote server process died.
pub const RPC_E_SERVER_DIED: i32 = 0x8001_0007_u32 as i32;
/// The remote server process died and does not exist anymore.
pub const RPC_E_SERVER_DIED_DNE: i32 = 0x8001_0012_u32 as i32;
/// The RPC server is unavailable.
pub const RPC_S_SERVER_UNAVAILABLE: i32 = 0x8007_06BA_u32 as i32;

/// Textual form of [`RPC_S_SERVER_UNAVAILABLE`] as it appears embedded in
/// error messages produced by one interception path during interface
/// negotiation.
const SERVER_UNAVAILABLE_PROBE: &str = "0x800706BA";

/// A failure raised by a remote call through the transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The remote call returned a failure status code.
    #[error("remote call failed ({code:#010x}): {message}")]
    Call {
        /// Status code returned by the transport.
        code: i32,
        /// Human-readable failure description.
        message: String,
    },

    /// A type-mismatch-class failure raised during interface negotiation.
    ///
    /// One interception path reports an unreachable server through this
    /// error class, with the status code present only in the message text.
    #[error("interface negotiation type mismatch: {message}")]
    InterfaceMismatch {
        /// Human-readable failure description.
        message: String,
    },

    /// The connectable source does not expose the requested connection point.
    #[error("connection point {interface} not found on source")]
    MissingConnectionPoint {
        /// Interface identity of the missing connection point.
        interface: InterfaceId,
    },

    /// Any other transport failure.
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Classifies this error, returning the fatal connectivity code if the
    /// peer must be considered gone.
    ///
    /// Fatal codes are [`RPC_E_CLIENT_DIED`], [`RPC_E_SERVER_DIED`],
    /// [`RPC_E_SERVER_DIED_DNE`] and [`RPC_S_SERVER_UNAVAILABLE`]. A message
    /// embedding the server-unavailable code takes precedence over the
    /// carried status code; a type-mismatch error is fatal only through that
    /// embedded form.
    #[must_use]
    pub fn rpc_fatal_code(&self) -> Option<i32> {
        match self {
            Self::Call { code, message } => {
                if !is_rpc_code(*code) {
                    return None;
                }
                if message.contains(SERVER_UNAVAILABLE_PROBE) {
                    Some(RPC_S_SERVER_UNAVAILABLE)
                } else {
                    Some(*code)
                }
            }
            Self::InterfaceMismatch { message } if message.contains(SERVER_UNAVAILABLE_PROBE) => {
                Some(RPC_S_SERVER_UNAVAILABLE)
            }
            _ => None,
        }
    }
}

fn is_rpc_code(code: i32) -> bool {
    matches!(
        code,
        RPC_E_CLIENT_DIED | RPC_E_SERVER_DIED | RPC_E_SERVER_DIED_DNE | RPC_S_SERVER_UNAVAILABLE
    )
}
