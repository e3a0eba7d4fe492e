//! Line-delimited JSON-RPC client speaking MCP over a [`StdioChannel`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Lines};
use tokio::process::Child;
use tracing::{debug, info, warn};

use super::error::{ProtocolError, ProtocolResult};
use super::message::{encode_line, numeric_id, Incoming, Notification, Request};
use super::transport::{terminate, Connector};
use crate::domain::{CallResult, Capability, Transcript};

/// MCP revision announced during the handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const CLIENT_NAME: &str = "mcp-harness";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_LIST_TOOLS: &str = "tools/list";
pub const METHOD_CALL_TOOL: &str = "tools/call";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    pub request_timeout: Duration,
    pub disconnect_grace: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            disconnect_grace: Duration::from_secs(5),
        }
    }
}

struct Connection {
    lines: Lines<BufReader<Box<dyn AsyncRead + Send + Unpin>>>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    process: Option<Child>,
}

/// One client per sandbox instance. Requests are strictly sequential.
pub struct ProtocolClient {
    connector: Arc<dyn Connector>,
    options: ClientOptions,
    state: ClientState,
    conn: Option<Connection>,
    next_id: u64,
    last_request: Option<String>,
    server_info: Option<Value>,
}

impl ProtocolClient {
    pub fn new(connector: Arc<dyn Connector>, options: ClientOptions) -> Self {
        Self {
            connector,
            options,
            state: ClientState::Disconnected,
            conn: None,
            next_id: 1,
            last_request: None,
            server_info: None,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ClientState::Connected
    }

    /// The `initialize` result of the current connection.
    pub fn server_info(&self) -> Option<&Value> {
        self.server_info.as_ref()
    }

    /// The line written for the most recent request, even if it never got
    /// a reply.
    pub fn last_request(&self) -> Option<&str> {
        self.last_request.as_deref()
    }

    /// Open the transport and run the `initialize` handshake.
    ///
    /// Any failure leaves the client `Disconnected` with its process stopped.
    pub async fn connect(&mut self) -> ProtocolResult<()> {
        if self.state == ClientState::Connected {
            return Ok(());
        }
        self.state = ClientState::Connecting;

        let channel = match self.connector.open().await {
            Ok(channel) => channel,
            Err(e) => {
                self.state = ClientState::Disconnected;
                return Err(ProtocolError::Handshake(e.to_string()));
            }
        };
        self.conn = Some(Connection {
            lines: BufReader::new(channel.reader).lines(),
            writer: channel.writer,
            process: channel.process,
        });

        match self.handshake().await {
            Ok(info) => {
                let server = info
                    .pointer("/serverInfo/name")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string();
                info!(server = %server, "protocol handshake complete");
                self.server_info = Some(info);
                self.state = ClientState::Connected;
                Ok(())
            }
            Err(e) => {
                self.disconnect().await;
                Err(match e {
                    ProtocolError::Handshake(_) => e,
                    other => ProtocolError::Handshake(other.to_string()),
                })
            }
        }
    }

    async fn handshake(&mut self) -> ProtocolResult<Value> {
        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {"tools": {}},
            "clientInfo": {
                "name": CLIENT_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
        });
        let (result, _) = self.exchange(METHOD_INITIALIZE, Some(params)).await?;
        let info = match result {
            CallResult::Success(info @ Value::Object(_)) => info,
            CallResult::Success(other) => {
                return Err(ProtocolError::Handshake(format!(
                    "initialize returned a non-object result: {other}"
                )))
            }
            CallResult::Error(e) => {
                return Err(ProtocolError::Handshake(format!("initialize rejected: {e}")))
            }
            CallResult::Transport(failure) => return Err(ProtocolError::Handshake(failure.message)),
        };
        self.write_notification(METHOD_INITIALIZED, None).await?;
        Ok(info)
    }

    /// Send a request and wait for the reply with the matching id.
    ///
    /// A server error object is an `Ok(CallResult::Error)`; only transport
    /// and framing problems are `Err`.
    pub async fn request(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> ProtocolResult<(CallResult, Transcript)> {
        if self.state != ClientState::Connected {
            return Err(ProtocolError::NotConnected);
        }
        self.exchange(method, params).await
    }

    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> ProtocolResult<()> {
        if self.state != ClientState::Connected {
            return Err(ProtocolError::NotConnected);
        }
        self.write_notification(method, params.as_ref()).await
    }

    /// Discover the server's tools.
    pub async fn list_tools(&mut self) -> ProtocolResult<Vec<Capability>> {
        let (result, _) = self.request(METHOD_LIST_TOOLS, Some(json!({}))).await?;
        let value = match result {
            CallResult::Success(value) => value,
            CallResult::Error(e) => {
                return Err(ProtocolError::Rpc {
                    code: e.code,
                    message: e.message,
                })
            }
            CallResult::Transport(failure) => {
                return Err(ProtocolError::decode(String::new(), failure.message))
            }
        };
        let entries = value
            .get("tools")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut tools = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_value::<Capability>(entry) {
                Ok(tool) => tools.push(tool),
                Err(e) => warn!(error = %e, "skipping malformed tool entry"),
            }
        }
        Ok(tools)
    }

    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: Value,
    ) -> ProtocolResult<(CallResult, Transcript)> {
        self.request(
            METHOD_CALL_TOOL,
            Some(json!({"name": name, "arguments": arguments})),
        )
        .await
    }

    /// Close stdin, give the process `disconnect_grace` to exit, then kill
    /// it. Safe to call in any state, any number of times.
    pub async fn disconnect(&mut self) {
        if let Some(mut conn) = self.conn.take() {
            if let Err(e) = conn.writer.shutdown().await {
                debug!(error = %e, "closing protocol stdin failed");
            }
            drop(conn.writer);
            drop(conn.lines);
            if let Some(child) = conn.process {
                terminate(child, self.options.disconnect_grace).await;
            }
            debug!("protocol client disconnected");
        }
        self.state = ClientState::Disconnected;
        self.server_info = None;
    }

    async fn exchange(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> ProtocolResult<(CallResult, Transcript)> {
        let id = self.next_id;
        self.next_id += 1;
        self.last_request = None;

        let line = encode_line(&Request::new(id, method, params.as_ref()))?;
        let conn = self.conn.as_mut().ok_or(ProtocolError::NotConnected)?;
        conn.writer.write_all(line.as_bytes()).await?;
        conn.writer.flush().await?;
        self.last_request = Some(line.trim_end().to_string());
        debug!(id, method, "request sent");

        let timeout = self.options.request_timeout;
        let (result, response_line) = tokio::time::timeout(timeout, read_response(conn, id))
            .await
            .map_err(|_| ProtocolError::Timeout {
                method: method.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })??;

        Ok((
            result,
            Transcript {
                request: Some(line.trim_end().to_string()),
                response: Some(response_line),
            },
        ))
    }

    async fn write_notification(
        &mut self,
        method: &str,
        params: Option<&Value>,
    ) -> ProtocolResult<()> {
        let line = encode_line(&Notification::new(method, params))?;
        let conn = self.conn.as_mut().ok_or(ProtocolError::NotConnected)?;
        conn.writer.write_all(line.as_bytes()).await?;
        conn.writer.flush().await?;
        debug!(method, "notification sent");
        Ok(())
    }
}

impl std::fmt::Debug for ProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("state", &self.state)
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

async fn read_response(conn: &mut Connection, id: u64) -> ProtocolResult<(CallResult, String)> {
    loop {
        let line = conn
            .lines
            .next_line()
            .await?
            .ok_or(ProtocolError::TransportClosed)?;
        if line.trim().is_empty() {
            continue;
        }
        match Incoming::parse(&line)? {
            Incoming::Notification { method } => {
                debug!(method = %method, "skipping server notification");
            }
            Incoming::Response { id: got, result } => match numeric_id(&got) {
                Some(n) if n == id => return Ok((result, line)),
                // reply to an earlier request that already timed out
                Some(n) if n < id => {
                    debug!(id = n, pending = id, "discarding late response");
                }
                _ => {
                    return Err(ProtocolError::decode(
                        line,
                        format!("response id {got} does not match pending request {id}"),
                    ))
                }
            },
        }
    }
}
