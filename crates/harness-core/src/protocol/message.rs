//! JSON-RPC 2.0 wire messages, one per line.

use serde::Serialize;
use serde_json::Value;

use super::error::{ProtocolError, ProtocolResult};
use crate::domain::{CallResult, RpcError};

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, Serialize)]
pub struct Request<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a Value>,
}

impl<'a> Request<'a> {
    pub fn new(id: u64, method: &'a str, params: Option<&'a Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }
}

/// A fire-and-forget message: no id, no reply.
#[derive(Debug, Clone, Serialize)]
pub struct Notification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<&'a Value>,
}

impl<'a> Notification<'a> {
    pub fn new(method: &'a str, params: Option<&'a Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
        }
    }
}

/// Encode a message as a single newline-terminated line.
pub fn encode_line<T: Serialize>(message: &T) -> ProtocolResult<String> {
    let mut line = serde_json::to_string(message)
        .map_err(|e| ProtocolError::decode("<outgoing>", e))?;
    line.push('\n');
    Ok(line)
}

/// A decoded line received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Response { id: Value, result: CallResult },
    /// Server-initiated message carrying a method and no id.
    Notification { method: String },
}

impl Incoming {
    /// Parse one line. Anything that is not a JSON object shaped like a
    /// response or a notification is a decode error.
    pub fn parse(line: &str) -> ProtocolResult<Self> {
        let value: Value =
            serde_json::from_str(line).map_err(|e| ProtocolError::decode(line, e))?;
        let Value::Object(mut obj) = value else {
            return Err(ProtocolError::decode(line, "not a JSON object"));
        };

        let id = obj.remove("id").filter(|id| !id.is_null());
        let Some(id) = id else {
            return match obj.get("method").and_then(Value::as_str) {
                Some(method) => Ok(Incoming::Notification {
                    method: method.to_string(),
                }),
                None => Err(ProtocolError::decode(line, "message has neither id nor method")),
            };
        };

        if let Some(error) = obj.remove("error") {
            let error: RpcError =
                serde_json::from_value(error).map_err(|e| ProtocolError::decode(line, e))?;
            return Ok(Incoming::Response {
                id,
                result: CallResult::Error(error),
            });
        }
        match obj.remove("result") {
            Some(result) => Ok(Incoming::Response {
                id,
                result: CallResult::Success(result),
            }),
            None => Err(ProtocolError::decode(line, "response has neither result nor error")),
        }
    }
}

/// The request number a response id refers to.
///
/// Servers occasionally echo numeric ids back as strings.
pub fn numeric_id(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse::<u64>().ok(),
        _ => None,
    }
}
