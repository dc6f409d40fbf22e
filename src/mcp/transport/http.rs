//! Streamable HTTP transport: JSON-RPC over POST with JSON or SSE replies,
//! plus a GET event stream for server-initiated requests.

use async_trait::async_trait;
use rust_mcp_schema::schema_utils::{
    ClientMessage, FromMessage, MessageFromClient, NotificationFromClient, RequestFromClient,
    ResultFromClient, ServerMessage,
};
use rust_mcp_schema::{InitializeResult, RequestId, RpcError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::sse::{forward_sse_requests, is_event_stream_content_type, read_sse_response};
use super::Transport;
use crate::core::config::data::ServerConfig;
use crate::mcp::events::McpServerRequest;
use crate::utils::url::is_http_url;

pub const MCP_JSON_CONTENT_TYPE: &str = "application/json";
pub const MCP_JSON_AND_SSE_ACCEPT: &str = "application/json, text/event-stream";
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";
pub const MCP_PROTOCOL_VERSION_HEADER: &str = "MCP-Protocol-Version";
const HTTP_CONNECT_TIMEOUT_SECONDS: u64 = 10;
const HTTP_REQUEST_TIMEOUT_SECONDS: u64 = 60;
const HTTP_POOL_IDLE_TIMEOUT_SECONDS: u64 = 90;
const HTTP_POOL_MAX_IDLE_PER_HOST: usize = 8;

pub struct HttpTransport {
    server_id: String,
    client: reqwest::Client,
    url: String,
    headers: HashMap<String, String>,
    session_id: RwLock<Option<String>>,
    protocol_version: RwLock<Option<String>>,
    next_request_id: AtomicI64,
    /// Bounds each POST, including its SSE reply. The GET listener is
    /// unbounded.
    request_timeout: Duration,
    request_tx: mpsc::UnboundedSender<McpServerRequest>,
    listener: CancellationToken,
}

impl HttpTransport {
    pub fn new(
        server_id: String,
        config: &ServerConfig,
        request_tx: mpsc::UnboundedSender<McpServerRequest>,
    ) -> Result<Self, String> {
        let url = config
            .url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| "MCP url is required for HTTP transport.".to_string())?
            .to_string();
        if !is_http_url(&url) {
            return Err(format!("MCP url must start with http:// or https://: {url}"));
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECONDS))
            .pool_idle_timeout(Duration::from_secs(HTTP_POOL_IDLE_TIMEOUT_SECONDS))
            .pool_max_idle_per_host(HTTP_POOL_MAX_IDLE_PER_HOST)
            .build()
            .map_err(|err| err.to_string())?;

        Ok(Self {
            server_id,
            client,
            url,
            headers: config.headers.clone(),
            session_id: RwLock::new(None),
            protocol_version: RwLock::new(None),
            next_request_id: AtomicI64::new(0),
            request_timeout: Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECONDS),
            request_tx,
            listener: CancellationToken::new(),
        })
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Applies configured headers plus the session and protocol headers once
    /// they are known.
    async fn with_session_headers(
        &self,
        mut request: reqwest::RequestBuilder,
    ) -> reqwest::RequestBuilder {
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(session_id) = self.session_id.read().await.as_deref() {
            request = request.header(MCP_SESSION_ID_HEADER, session_id);
        }
        apply_protocol_version_header(request, self.protocol_version.read().await.as_deref())
    }

    async fn post(&self, message: &ClientMessage) -> Result<reqwest::Response, String> {
        if self.listener.is_cancelled() {
            return Err("MCP HTTP session is closed.".to_string());
        }
        let payload = serde_json::to_string(message).map_err(|err| err.to_string())?;
        let request = self
            .client
            .post(&self.url)
            .header("Content-Type", MCP_JSON_CONTENT_TYPE)
            .header("Accept", MCP_JSON_AND_SSE_ACCEPT)
            .timeout(self.request_timeout)
            .body(payload);
        let request = self.with_session_headers(request).await;

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                format!("MCP HTTP request timed out after {:?}", self.request_timeout)
            } else {
                err.to_string()
            }
        })?;
        debug!(
            server_id = %self.server_id,
            status = %response.status(),
            "Received MCP HTTP response"
        );
        if !response.status().is_success() {
            return Err(format!("HTTP error: {}", response.status()));
        }

        if let Some(session_id) = response
            .headers()
            .get(MCP_SESSION_ID_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            *self.session_id.write().await = Some(session_id.to_string());
        }
        Ok(response)
    }

    async fn post_without_reply(&self, message: ClientMessage) -> Result<(), String> {
        self.post(&message).await.map(|_| ())
    }

    fn spawn_listener(&self, session_id: Option<String>, protocol_version: Option<String>) {
        let mut request = self
            .client
            .get(&self.url)
            .header("Accept", "text/event-stream");
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(session_id) = session_id {
            request = request.header(MCP_SESSION_ID_HEADER, session_id);
        }
        let request = apply_protocol_version_header(request, protocol_version.as_deref());

        let server_id = self.server_id.clone();
        let request_tx = self.request_tx.clone();
        let cancel = self.listener.clone();
        tokio::spawn(async move {
            let response = tokio::select! {
                _ = cancel.cancelled() => return,
                response = request.send() => response,
            };
            let response = match response {
                Ok(response) if response.status().is_success() => response,
                Ok(response) => {
                    debug!(
                        server_id = %server_id,
                        status = %response.status(),
                        "MCP HTTP server offers no event stream"
                    );
                    return;
                }
                Err(err) => {
                    debug!(server_id = %server_id, error = %err, "MCP HTTP listener failed");
                    return;
                }
            };
            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .unwrap_or("");
            if !is_event_stream_content_type(content_type) {
                return;
            }
            debug!(server_id = %server_id, "MCP HTTP listener connected");
            forward_sse_requests(response, &server_id, &request_tx, &cancel).await;
            debug!(server_id = %server_id, "MCP HTTP listener closed");
        });
    }
}

pub fn apply_protocol_version_header(
    request: reqwest::RequestBuilder,
    protocol_version: Option<&str>,
) -> reqwest::RequestBuilder {
    match protocol_version {
        Some(protocol_version) if !protocol_version.trim().is_empty() => {
            request.header(MCP_PROTOCOL_VERSION_HEADER, protocol_version)
        }
        _ => request,
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_request(&self, request: RequestFromClient) -> Result<ServerMessage, String> {
        let request_id = RequestId::Integer(self.next_request_id.fetch_add(1, Ordering::SeqCst));
        debug!(
            server_id = %self.server_id,
            request_id = ?request_id,
            url = %self.url,
            "Sending MCP HTTP request"
        );
        let message = ClientMessage::from_message(
            MessageFromClient::RequestFromClient(request),
            Some(request_id),
        )
        .map_err(|err| err.to_string())?;
        let response = self.post(&message).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();
        if is_event_stream_content_type(&content_type) {
            read_sse_response(response, &self.server_id, Some(&self.request_tx)).await
        } else {
            let body = response.bytes().await.map_err(|err| err.to_string())?;
            serde_json::from_slice::<ServerMessage>(&body).map_err(|err| err.to_string())
        }
    }

    async fn send_notification(&self, notification: NotificationFromClient) -> Result<(), String> {
        let message = ClientMessage::from_message(
            MessageFromClient::NotificationFromClient(notification),
            None,
        )
        .map_err(|err| err.to_string())?;
        self.post_without_reply(message).await
    }

    async fn send_result(
        &self,
        request_id: RequestId,
        result: ResultFromClient,
    ) -> Result<(), String> {
        let message = ClientMessage::from_message(
            MessageFromClient::ResultFromClient(result),
            Some(request_id),
        )
        .map_err(|err| err.to_string())?;
        self.post_without_reply(message).await
    }

    async fn send_error(&self, request_id: RequestId, error: RpcError) -> Result<(), String> {
        let message =
            ClientMessage::from_message(MessageFromClient::Error(error), Some(request_id))
                .map_err(|err| err.to_string())?;
        self.post_without_reply(message).await
    }

    async fn initialized(&self, result: &InitializeResult) {
        *self.protocol_version.write().await = Some(result.protocol_version.clone());
        let session_id = self.session_id.read().await.clone();
        self.spawn_listener(session_id, Some(result.protocol_version.clone()));
    }

    async fn close(&self) {
        if self.listener.is_cancelled() {
            return;
        }
        self.listener.cancel();

        let Some(session_id) = self.session_id.write().await.take() else {
            return;
        };
        debug!(server_id = %self.server_id, "Closing MCP HTTP session");
        let mut request = self
            .client
            .delete(&self.url)
            .header(MCP_SESSION_ID_HEADER, session_id);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let request = apply_protocol_version_header(
            request,
            self.protocol_version.read().await.as_deref(),
        );
        let _ = tokio::time::timeout(
            Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECONDS),
            request.send(),
        )
        .await;
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        self.listener.cancel();
    }
}
