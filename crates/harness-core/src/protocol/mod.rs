//! MCP client over a process-bound stdio transport.
//!
//! - `error`: protocol error taxonomy
//! - `message`: JSON-RPC 2.0 line framing
//! - `transport`: byte channel and process termination
//! - `client`: the request/response state machine

pub mod client;
pub mod error;
pub mod message;
pub mod transport;

pub use client::{ClientOptions, ClientState, ProtocolClient, PROTOCOL_VERSION};
pub use error::{ProtocolError, ProtocolResult};
pub use transport::{Connector, StdioChannel};
