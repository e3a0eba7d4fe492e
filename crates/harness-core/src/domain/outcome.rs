//! Typed outcome of one capability invocation.
//!
//! Raw JSON-RPC replies are parsed into [`CallResult`] at the protocol
//! boundary; nothing deeper in the harness inspects untyped reply maps.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON-RPC error codes used by the target protocol.
///
/// Codes outside the standard set are preserved in [`ErrorCode::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
    Other(i64),
}

impl ErrorCode {
    pub fn code(&self) -> i64 {
        match self {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::Other(code) => *code,
        }
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> Self {
        match code {
            -32700 => ErrorCode::ParseError,
            -32600 => ErrorCode::InvalidRequest,
            -32601 => ErrorCode::MethodNotFound,
            -32602 => ErrorCode::InvalidParams,
            -32603 => ErrorCode::InternalError,
            other => ErrorCode::Other(other),
        }
    }
}

impl From<ErrorCode> for i64 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::ParseError => write!(f, "parse error"),
            ErrorCode::InvalidRequest => write!(f, "invalid request"),
            ErrorCode::MethodNotFound => write!(f, "method not found"),
            ErrorCode::InvalidParams => write!(f, "invalid params"),
            ErrorCode::InternalError => write!(f, "internal error"),
            ErrorCode::Other(code) => write!(f, "server error {code}"),
        }
    }
}

/// The `error` member of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: ErrorCode,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// An internal error synthesised by the harness (timeouts, broken pipes).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)
    }
}

/// Why the harness got no usable reply at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportFailureKind {
    /// No matching response within the request timeout.
    Timeout,
    /// The reply line was not a well-formed response to this request.
    Decode,
    /// The stream ended or broke mid-request.
    Closed,
    NotConnected,
}

/// A harness-side failure, as opposed to an error object sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportFailure {
    pub kind: TransportFailureKind,
    pub message: String,
}

impl TransportFailure {
    pub fn new(kind: TransportFailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Terminal state of a request: a result, a server error object, or no
/// usable reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallResult {
    Success(Value),
    Error(RpcError),
    Transport(TransportFailure),
}

impl CallResult {
    pub fn is_success(&self) -> bool {
        matches!(self, CallResult::Success(_))
    }

    /// The payload handed to an assessor: the result on success, the error
    /// object or transport failure otherwise.
    pub fn payload(&self) -> Value {
        match self {
            CallResult::Success(value) => value.clone(),
            CallResult::Error(err) => serde_json::to_value(err).unwrap_or(Value::Null),
            CallResult::Transport(failure) => serde_json::to_value(failure).unwrap_or(Value::Null),
        }
    }

    /// MCP tools may report failure in-band with `isError: true`.
    pub fn is_tool_error(&self) -> bool {
        match self {
            CallResult::Success(value) => value
                .get("isError")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            CallResult::Error(_) | CallResult::Transport(_) => false,
        }
    }
}

/// The raw lines exchanged for one request, kept for debugging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub request: Option<String>,
    pub response: Option<String>,
}

/// Result of one capability call as seen by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationOutcome {
    pub result: CallResult,
    pub latency_ms: u64,
    #[serde(default)]
    pub transcript: Transcript,
}

impl InvocationOutcome {
    pub fn success(&self) -> bool {
        self.result.is_success()
    }

    /// The server's error object, if it sent one.
    pub fn error(&self) -> Option<&RpcError> {
        match &self.result {
            CallResult::Error(err) => Some(err),
            _ => None,
        }
    }

    pub fn transport_failure(&self) -> Option<&TransportFailure> {
        match &self.result {
            CallResult::Transport(failure) => Some(failure),
            _ => None,
        }
    }
}
