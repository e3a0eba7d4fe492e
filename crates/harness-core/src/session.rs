//! A protocol client bound to one sandbox instance.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::{CallResult, Capability, InvocationOutcome, Transcript};
use crate::protocol::{ClientOptions, Connector, ProtocolClient, ProtocolError, ProtocolResult, StdioChannel};
use crate::sandbox::{ContainerEngine, SandboxInstance, StdioCommand};

/// Opens the protocol process inside an instance through the engine.
pub struct EngineConnector {
    engine: Arc<dyn ContainerEngine>,
    instance_id: String,
    command: StdioCommand,
}

impl EngineConnector {
    pub fn new(engine: Arc<dyn ContainerEngine>, instance_id: impl Into<String>, command: StdioCommand) -> Self {
        Self {
            engine,
            instance_id: instance_id.into(),
            command,
        }
    }
}

#[async_trait]
impl Connector for EngineConnector {
    async fn open(&self) -> ProtocolResult<StdioChannel> {
        debug!(instance = %self.instance_id, command = ?self.command, "opening protocol process");
        self.engine
            .open_stdio(&self.instance_id, &self.command)
            .await
            .map_err(|e| ProtocolError::Open(e.to_string()))
    }
}

/// One client, one instance. Capabilities are discovered once in `start`.
pub struct TestSession {
    instance_id: String,
    client: ProtocolClient,
    capabilities: Vec<Capability>,
    last_error: Option<String>,
}

impl TestSession {
    pub fn new(connector: Arc<dyn Connector>, instance_id: impl Into<String>, options: ClientOptions) -> Self {
        Self {
            instance_id: instance_id.into(),
            client: ProtocolClient::new(connector, options),
            capabilities: Vec::new(),
            last_error: None,
        }
    }

    /// Session over `command` run inside `instance`.
    pub fn for_instance(
        engine: Arc<dyn ContainerEngine>,
        instance: &SandboxInstance,
        command: StdioCommand,
        options: ClientOptions,
    ) -> Self {
        let connector = EngineConnector::new(engine, instance.instance_id.clone(), command);
        Self::new(Arc::new(connector), instance.instance_id.clone(), options)
    }

    /// Connect and list capabilities. `false` on any failure; the reason is
    /// kept in [`TestSession::last_error`].
    pub async fn start(&mut self) -> bool {
        if let Err(e) = self.client.connect().await {
            warn!(instance = %self.instance_id, error = %e, "session handshake failed");
            self.last_error = Some(e.to_string());
            return false;
        }
        match self.client.list_tools().await {
            Ok(tools) => {
                info!(instance = %self.instance_id, count = tools.len(), "capabilities discovered");
                self.capabilities = tools;
                true
            }
            Err(e) => {
                warn!(instance = %self.instance_id, error = %e, "capability listing failed");
                self.last_error = Some(format!("capability listing failed: {e}"));
                self.client.disconnect().await;
                false
            }
        }
    }

    pub fn capabilities(&self) -> &[Capability] {
        &self.capabilities
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// Call one capability. Transport failures become `Transport` outcomes
    /// carrying whatever was written and read, so a single bad case never
    /// aborts the run.
    pub async fn invoke(&mut self, capability: &str, arguments: Value) -> InvocationOutcome {
        let started = Instant::now();
        let (result, transcript) = match self.client.call_tool(capability, arguments).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(capability = %capability, error = %e, "invocation failed");
                let transcript = Transcript {
                    request: self.client.last_request().map(str::to_string),
                    response: e.offending_line().map(str::to_string),
                };
                (CallResult::Transport(e.to_transport_failure()), transcript)
            }
        };
        InvocationOutcome {
            result,
            latency_ms: started.elapsed().as_millis() as u64,
            transcript,
        }
    }

    /// Disconnect the client. Idempotent.
    pub async fn stop(&mut self) {
        self.client.disconnect().await;
    }
}

impl std::fmt::Debug for TestSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestSession")
            .field("instance_id", &self.instance_id)
            .field("client", &self.client)
            .field("capabilities", &self.capabilities.len())
            .finish()
    }
}
