//! Error types for the protocol client.

use crate::domain::{ErrorCode, TransportFailure, TransportFailureKind};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("undecodable line {line:?}: {reason}")]
    Decode { line: String, reason: String },

    #[error("{method} timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    /// An error object returned by the server for a request whose failure
    /// the caller cannot record as an outcome (e.g. capability listing).
    #[error("server error [{}]: {message}", code.code())]
    Rpc { code: ErrorCode, message: String },

    #[error("client is not connected")]
    NotConnected,

    #[error("transport closed by peer")]
    TransportClosed,

    #[error("failed to open transport: {0}")]
    Open(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub fn decode(line: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        ProtocolError::Decode {
            line: line.into(),
            reason: reason.to_string(),
        }
    }

    /// This error as the failure recorded on an invocation outcome.
    pub fn to_transport_failure(&self) -> TransportFailure {
        let kind = match self {
            ProtocolError::Timeout { .. } => TransportFailureKind::Timeout,
            ProtocolError::Decode { .. } | ProtocolError::Rpc { .. } => TransportFailureKind::Decode,
            ProtocolError::TransportClosed | ProtocolError::Io(_) => TransportFailureKind::Closed,
            ProtocolError::NotConnected | ProtocolError::Handshake(_) | ProtocolError::Open(_) => {
                TransportFailureKind::NotConnected
            }
        };
        TransportFailure::new(kind, self.to_string())
    }

    /// The offending line of a decode failure.
    pub fn offending_line(&self) -> Option<&str> {
        match self {
            ProtocolError::Decode { line, .. } => Some(line),
            _ => None,
        }
    }
}

/// Result type for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
