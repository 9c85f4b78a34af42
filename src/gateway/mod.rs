//! Tool gateway client.
//!
//! The gateway exposes the run's tool ecosystem through a uniform JSON-RPC
//! protocol: one catalog listing and one invoke-by-name operation. The agent
//! loop opens a single connection per run and keeps it for the run's
//! lifetime.
//!
//! Errors are split into two classes the loop treats very differently:
//! fatal errors mean the gateway itself is unusable and abort the run;
//! tool-level errors become tool-result messages and the loop continues.

mod client;
mod types;

pub use client::McpGateway;
pub use types::{
    CallToolResult, ClientCapabilities, ClientInfo, ContentBlock, GatewayConnection,
    InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ServerInfo,
    ToolDescriptor, ToolsListResult,
};

use async_trait::async_trait;
use thiserror::Error;

/// Error from gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The gateway could not be reached or the HTTP exchange failed.
    #[error("gateway transport error: {0}")]
    Transport(String),

    /// The gateway answered, but not with a valid protocol payload.
    #[error("gateway protocol error: {0}")]
    Protocol(String),

    /// The gateway rejected this particular request at the JSON-RPC level
    /// (e.g. unknown tool name).
    #[error("gateway rejected request ({code}): {message}")]
    Rpc { code: i32, message: String },

    /// The tool executed and reported a failure.
    #[error("tool error: {0}")]
    Tool(String),
}

impl GatewayError {
    /// Whether this error means the gateway connection itself is unusable.
    ///
    /// Fatal errors abort the whole run; non-fatal ones become tool-result
    /// messages and the loop continues.
    pub fn is_fatal(&self) -> bool {
        matches!(self, GatewayError::Transport(_) | GatewayError::Protocol(_))
    }
}

/// Capability consumed by the agent loop: list the tool catalog and invoke
/// tools by name.
#[async_trait]
pub trait GatewayClient: Send + Sync {
    /// Fetch the full tool catalog.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, GatewayError>;

    /// Invoke a tool by name, returning its content blocks.
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<Vec<ContentBlock>, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(GatewayError::Transport("connection refused".to_string()).is_fatal());
        assert!(GatewayError::Protocol("bad envelope".to_string()).is_fatal());
        assert!(!GatewayError::Rpc {
            code: -32602,
            message: "unknown tool".to_string()
        }
        .is_fatal());
        assert!(!GatewayError::Tool("file not found".to_string()).is_fatal());
    }
}
