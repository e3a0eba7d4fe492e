//! Byte-stream transport underneath the protocol client.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::Child;
use tracing::{debug, warn};

use super::error::ProtocolResult;

/// A bidirectional stdio pipe to a target process.
///
/// `process` is `None` for in-process transports (tests); when present it is
/// the local process whose stdin/stdout carry the protocol, e.g. an engine
/// `exec -i` session.
pub struct StdioChannel {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub writer: Box<dyn AsyncWrite + Send + Unpin>,
    pub process: Option<Child>,
}

impl StdioChannel {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
            process: None,
        }
    }

    pub fn with_process(mut self, child: Child) -> Self {
        self.process = Some(child);
        self
    }
}

impl std::fmt::Debug for StdioChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioChannel")
            .field("process", &self.process.as_ref().and_then(Child::id))
            .finish_non_exhaustive()
    }
}

/// Opens a fresh [`StdioChannel`] each time the client connects.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self) -> ProtocolResult<StdioChannel>;
}

/// Wait up to `grace` for `child` to exit on its own, then kill it.
///
/// Callers close the child's stdin first; a well-behaved stdio server exits
/// on EOF.
pub async fn terminate(mut child: Child, grace: Duration) {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!(?status, "protocol process exited"),
        Ok(Err(e)) => warn!(error = %e, "failed waiting for protocol process"),
        Err(_) => {
            debug!(grace_ms = grace.as_millis() as u64, "grace period elapsed, killing protocol process");
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill protocol process");
            }
        }
    }
}
