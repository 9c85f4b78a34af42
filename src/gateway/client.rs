//! HTTP JSON-RPC gateway client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::types::*;
use super::{GatewayClient, GatewayError};

/// MCP protocol version we support
const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// HTTP connect timeout for the underlying client. Call deadlines are owned
/// by the agent loop, so no overall request timeout is set here.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Gateway client speaking HTTP JSON-RPC 2.0.
///
/// One instance corresponds to one live connection: the constructor performs
/// the MCP initialize handshake, and the same HTTP client is reused for every
/// request for the run's lifetime.
pub struct McpGateway {
    connection: GatewayConnection,
    client: reqwest::Client,
    request_id: AtomicU64,
}

impl McpGateway {
    /// Connect to a gateway: build the HTTP client and run the initialize
    /// handshake. Fails with a fatal error if the gateway is unreachable.
    pub async fn connect(connection: GatewayConnection) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Transport(format!("failed to build HTTP client: {}", e)))?;

        let gateway = Self {
            connection,
            client,
            request_id: AtomicU64::new(1),
        };

        let init = gateway.initialize().await?;
        debug!(
            "Gateway initialized: protocol={} server={:?}",
            init.protocol_version,
            init.server_info.as_ref().map(|s| s.name.as_str())
        );

        Ok(gateway)
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    fn endpoint(&self) -> &str {
        self.connection.endpoint.trim_end_matches('/')
    }

    /// Send a JSON-RPC request and unwrap the result payload.
    async fn send_jsonrpc(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, GatewayError> {
        let request = JsonRpcRequest::new(self.next_request_id(), method, params);

        let mut builder = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .json(&request);

        if let Some(token) = &self.connection.auth_token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| GatewayError::Transport(format!("{} request failed: {}", method, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Transport(format!(
                "{} returned HTTP {}",
                method, status
            )));
        }

        let json_response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Protocol(format!("invalid JSON-RPC envelope: {}", e)))?;

        if let Some(error) = json_response.error {
            return Err(GatewayError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        json_response
            .result
            .ok_or_else(|| GatewayError::Protocol(format!("{}: no result in response", method)))
    }

    /// Run the MCP initialize handshake.
    async fn initialize(&self) -> Result<InitializeResult, GatewayError> {
        let params = InitializeParams {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "toolbelt-agent".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        let result = self
            .send_jsonrpc("initialize", Some(serde_json::to_value(params).map_err(
                |e| GatewayError::Protocol(format!("failed to encode initialize params: {}", e)),
            )?))
            .await?;

        let init: InitializeResult = serde_json::from_value(result)
            .map_err(|e| GatewayError::Protocol(format!("invalid initialize result: {}", e)))?;

        // Some servers require the initialized notification before serving
        // tool calls; best effort, no response expected.
        let mut builder = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .json(&serde_json::json!({
                "jsonrpc": "2.0",
                "method": "notifications/initialized"
            }));
        if let Some(token) = &self.connection.auth_token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        let _ = builder.send().await;

        Ok(init)
    }
}

#[async_trait]
impl GatewayClient for McpGateway {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, GatewayError> {
        let result = self.send_jsonrpc("tools/list", None).await?;
        let parsed: ToolsListResult = serde_json::from_value(result)
            .map_err(|e| GatewayError::Protocol(format!("invalid tools/list result: {}", e)))?;
        Ok(parsed.tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<Vec<ContentBlock>, GatewayError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments,
        });

        let result = self.send_jsonrpc("tools/call", Some(params)).await?;
        let parsed: CallToolResult = serde_json::from_value(result)
            .map_err(|e| GatewayError::Protocol(format!("invalid tools/call result: {}", e)))?;

        if parsed.is_error {
            let error_text = parsed
                .content
                .iter()
                .filter_map(|c| c.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n");
            return Err(GatewayError::Tool(if error_text.is_empty() {
                format!("tool {} reported an error with no message", name)
            } else {
                error_text
            }));
        }

        Ok(parsed.content)
    }
}
