//! `RuntimeError` — the taxonomy that crosses the Actor System's public API
//! boundary. Internal subsystem errors (framing, host transport) are
//! handled and counted locally and never convert into this type; only the
//! Event Bridge and the Actor System public operations produce it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned to callers of `remote_call`, `start_advertising`, and
/// `discover`. Callers have no obligation to distinguish transport vs.
/// remote-application failures beyond inspecting the variant.
///
/// Serializable because a `Response::Failure` carries one across the wire
/// verbatim.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuntimeError {
    #[error("transport failed: {0}")]
    TransportFailed(String),

    #[error("call timed out")]
    Timeout,

    #[error("peer unreachable")]
    PeerUnreachable,

    #[error("method not found")]
    MethodNotFound,

    #[error("failed to decode envelope: {0}")]
    DecodeFailed(String),

    #[error("failed to encode envelope: {0}")]
    EncodeFailed(String),

    #[error("call cancelled")]
    Cancelled,

    #[error("operation not permitted")]
    NotPermitted,

    #[error("bluetooth adapter powered off")]
    PoweredOff,

    #[error("bluetooth access unauthorized")]
    Unauthorized,

    #[error("error {code}: {message}")]
    Other { code: u32, message: String },
}

impl RuntimeError {
    pub fn other(code: u32, message: impl Into<String>) -> Self {
        Self::Other {
            code,
            message: message.into(),
        }
    }
}
