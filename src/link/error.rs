//! Device-link error types

use thiserror::Error;

use super::types::ActuatorKind;

/// Errors surfaced by the device-link client
#[derive(Debug, Error)]
pub enum LinkError {
    /// `connect` was called without an address and none is known yet
    #[error("no controller address known — connect with an explicit address first")]
    NoAddress,

    /// A command requires an open link
    #[error("not connected to the controller")]
    NotConnected,

    /// A suspended operation was cancelled by a disconnect
    #[error("operation cancelled by disconnect")]
    Cancelled,

    /// A suspended operation outlived its deadline
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// The underlying transport failed
    #[error("transport error: {0}")]
    Transport(String),

    /// An actuator index outside the controller-reported range
    #[error("{kind} index {index} out of range (controller reports {count})")]
    InvalidIndex {
        kind: ActuatorKind,
        index: usize,
        count: usize,
    },

    /// A client-scoped state write named an id missing from the roster
    #[error("unknown client id: {0}")]
    UnknownClient(String),

    /// A frame could not be encoded or decoded
    #[error("protocol error: {0}")]
    Protocol(#[from] serde_json::Error),
}
