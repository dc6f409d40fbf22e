//! Transport seam between MCP clients and the servers they talk to.
//!
//! A [`Transport`] moves JSON-RPC messages; a [`Connector`] builds one from a
//! server's configuration. Clients only ever see the trait objects, which is
//! what lets tests drive them with in-memory fakes.

use async_trait::async_trait;
use rust_mcp_schema::schema_utils::{
    NotificationFromClient, RequestFromClient, ResultFromClient, ServerMessage,
};
use rust_mcp_schema::{InitializeResult, RequestId, RpcError};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::core::config::data::ServerConfig;
use crate::mcp::events::McpServerRequest;

pub mod http;
pub mod sse;
pub mod stdio;

/// JSON-RPC code used by servers to indicate unsupported methods.
pub const MCP_METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McpTransportKind {
    StreamableHttp,
    Stdio,
}

impl McpTransportKind {
    /// Resolves the transport from `type`, defaulting to stdio unless a url is
    /// configured.
    pub fn from_config(config: &ServerConfig) -> Result<Self, String> {
        let transport = match config.transport.as_deref() {
            Some(transport) if !transport.trim().is_empty() => transport.trim().to_ascii_lowercase(),
            _ if config.url.is_some() => return Ok(McpTransportKind::StreamableHttp),
            _ => return Ok(McpTransportKind::Stdio),
        };
        match transport.as_str() {
            "streamable-http" | "streamable_http" | "http" => Ok(McpTransportKind::StreamableHttp),
            "stdio" => Ok(McpTransportKind::Stdio),
            other => Err(format!("Unsupported MCP transport: {}", other)),
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_request(&self, request: RequestFromClient) -> Result<ServerMessage, String>;

    async fn send_notification(&self, notification: NotificationFromClient) -> Result<(), String>;

    /// Answers a server-initiated request.
    async fn send_result(&self, request_id: RequestId, result: ResultFromClient)
        -> Result<(), String>;

    async fn send_error(&self, request_id: RequestId, error: RpcError) -> Result<(), String>;

    /// Called once the handshake has completed.
    async fn initialized(&self, _result: &InitializeResult) {}

    /// Tears down the process or session. Safe to call more than once.
    async fn close(&self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        server_name: &str,
        config: &ServerConfig,
        requests: mpsc::UnboundedSender<McpServerRequest>,
    ) -> Result<Arc<dyn Transport>, String>;
}

/// Builds stdio or streamable HTTP transports from configuration.
#[derive(Debug, Default, Clone)]
pub struct DefaultConnector;

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(
        &self,
        server_name: &str,
        config: &ServerConfig,
        requests: mpsc::UnboundedSender<McpServerRequest>,
    ) -> Result<Arc<dyn Transport>, String> {
        match config.validate()? {
            McpTransportKind::Stdio => {
                let transport: Arc<dyn Transport> =
                    stdio::StdioTransport::spawn(server_name.to_string(), config, requests)?;
                Ok(transport)
            }
            McpTransportKind::StreamableHttp => {
                let transport: Arc<dyn Transport> = Arc::new(http::HttpTransport::new(
                    server_name.to_string(),
                    config,
                    requests,
                )?);
                Ok(transport)
            }
        }
    }
}

/// Returns true when a server reports the JSON-RPC method-not-found code.
pub fn is_method_not_found(message: &ServerMessage) -> bool {
    matches!(
        message,
        ServerMessage::Error(error) if error.error.code == MCP_METHOD_NOT_FOUND
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_defaults_to_stdio() {
        let config = ServerConfig::stdio("npx", Vec::new());
        assert_eq!(
            McpTransportKind::from_config(&config),
            Ok(McpTransportKind::Stdio)
        );
    }

    #[test]
    fn url_implies_http() {
        let config = ServerConfig {
            url: Some("https://mcp.example.com".to_string()),
            ..ServerConfig::default()
        };
        assert_eq!(
            McpTransportKind::from_config(&config),
            Ok(McpTransportKind::StreamableHttp)
        );
    }

    #[test]
    fn http_aliases_are_accepted() {
        for alias in ["http", "HTTP", "streamable-http", "streamable_http"] {
            let config = ServerConfig {
                transport: Some(alias.to_string()),
                ..ServerConfig::default()
            };
            assert_eq!(
                McpTransportKind::from_config(&config),
                Ok(McpTransportKind::StreamableHttp)
            );
        }
    }

    #[test]
    fn unknown_transport_is_rejected() {
        let config = ServerConfig {
            transport: Some("carrier-pigeon".to_string()),
            ..ServerConfig::default()
        };
        assert!(McpTransportKind::from_config(&config)
            .unwrap_err()
            .contains("carrier-pigeon"));
    }
}
