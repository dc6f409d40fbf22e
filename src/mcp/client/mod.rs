//! One connection to one MCP server.
//!
//! [`McpClient`] drives the handshake and tool discovery over whatever
//! [`Transport`] its [`Connector`] hands back, routes tool calls, and answers
//! server-initiated `sampling/createMessage` requests through the installed
//! [`SamplingHandler`].

use rust_mcp_schema::schema_utils::{
    NotificationFromClient, RequestFromClient, ResultFromClient, ServerJsonrpcRequest,
};
use rust_mcp_schema::{
    CallToolRequestParams, ClientCapabilities, ClientSampling, InitializeResult, RpcError, Tool,
};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::config::data::ServerConfig;
use crate::core::mcp_sampling::SamplingHandler;
use crate::core::tools::ToolSpec;
use crate::mcp::error::McpError;
use crate::mcp::events::McpServerRequest;
use crate::mcp::transport::{is_method_not_found, Connector, Transport};

mod protocol;

use protocol::{
    client_details, paginated_params, parse_call_tool, parse_initialize_result, parse_list_tools,
    parse_tool_arguments, tool_output, tool_spec, MCP_MAX_TOOL_LIST,
};

/// Upper bound on `tools/list` round trips, for servers that keep handing
/// out cursors.
const MCP_MAX_TOOL_PAGES: usize = 50;

type SharedSamplingHandler = Arc<RwLock<Option<Arc<SamplingHandler>>>>;

/// A live connection. Dropped as a whole on stop; nothing survives into the
/// next start.
struct Session {
    transport: Arc<dyn Transport>,
    tools: Vec<ToolSpec>,
    protocol_version: String,
    /// Child of the start context. Cancelling it interrupts in-flight calls
    /// and closes the transport.
    cancel: CancellationToken,
}

pub struct McpClient {
    name: String,
    config: ServerConfig,
    connector: Arc<dyn Connector>,
    sampling: SharedSamplingHandler,
    lifecycle: Mutex<()>,
    /// Token of a start that has not installed its session yet.
    starting: Mutex<Option<CancellationToken>>,
    session: RwLock<Option<Arc<Session>>>,
}

impl McpClient {
    pub fn new(name: impl Into<String>, config: ServerConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            name: name.into(),
            config,
            connector,
            sampling: Arc::new(RwLock::new(None)),
            lifecycle: Mutex::new(()),
            starting: Mutex::new(None),
            session: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Installs the handler used for server-initiated sampling requests.
    /// Takes effect for requests that arrive after the call.
    pub async fn set_sampling_handler(&self, handler: Option<Arc<SamplingHandler>>) {
        *self.sampling.write().await = handler;
    }

    pub async fn is_running(&self) -> bool {
        self.session.read().await.is_some()
    }

    /// Negotiated protocol version of the live session.
    pub async fn protocol_version(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|session| session.protocol_version.clone())
    }

    /// Connects, performs the handshake and fetches the tool list.
    ///
    /// A no-op when already running. On failure the transport is closed and
    /// the client stays stopped. A concurrent [`McpClient::stop`] aborts the
    /// start with [`McpError::Interrupted`].
    pub async fn start(&self, ctx: &CancellationToken) -> Result<(), McpError> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.session.read().await.is_some() {
            return Ok(());
        }

        self.config
            .validate()
            .map_err(|message| McpError::InvalidConfig {
                server: self.name.clone(),
                message,
            })?;

        let cancel = ctx.child_token();
        *self.starting.lock().await = Some(cancel.clone());
        let result = self.connect_session(cancel).await;
        *self.starting.lock().await = None;
        result
    }

    async fn connect_session(&self, cancel: CancellationToken) -> Result<(), McpError> {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let transport = tokio::select! {
            _ = cancel.cancelled() => return Err(McpError::Interrupted),
            transport = self.connector.connect(&self.name, &self.config, request_tx) => {
                transport.map_err(McpError::Transport)?
            }
        };

        spawn_request_dispatcher(
            transport.clone(),
            request_rx,
            self.sampling.clone(),
            cancel.clone(),
        );

        let handshake = tokio::select! {
            _ = cancel.cancelled() => Err(McpError::Interrupted),
            result = handshake(transport.as_ref()) => result,
        };
        let (initialize, tools) = match handshake {
            Ok(outcome) => outcome,
            Err(err) => {
                debug!(server_id = %self.name, error = %err, "MCP handshake failed");
                cancel.cancel();
                transport.close().await;
                return Err(err);
            }
        };

        // Checked under the session lock: `stop` cancels before taking it.
        let mut session = self.session.write().await;
        if cancel.is_cancelled() {
            drop(session);
            debug!(server_id = %self.name, "MCP start aborted by stop");
            transport.close().await;
            return Err(McpError::Interrupted);
        }

        info!(
            server_id = %self.name,
            server = %initialize.server_info.name,
            protocol_version = %initialize.protocol_version,
            tool_count = tools.len(),
            "MCP server connected"
        );
        *session = Some(Arc::new(Session {
            transport,
            tools,
            protocol_version: initialize.protocol_version,
            cancel,
        }));
        Ok(())
    }

    /// Aborts a start in progress, closes the transport and forgets the tool
    /// list. In-flight calls return [`McpError::Interrupted`].
    pub async fn stop(&self) {
        if let Some(starting) = self.starting.lock().await.take() {
            starting.cancel();
        }

        let session = self.session.write().await.take();
        let Some(session) = session else {
            return;
        };
        session.cancel.cancel();
        session.transport.close().await;
        debug!(server_id = %self.name, "MCP server stopped");
    }

    /// Snapshot of the tools fetched at start; empty when not running.
    pub async fn tools(&self) -> Vec<ToolSpec> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|session| session.tools.clone())
            .unwrap_or_default()
    }

    /// Calls `tool_name` with JSON object arguments and returns its text.
    pub async fn call_tool(
        &self,
        ctx: &CancellationToken,
        tool_name: &str,
        args_json: &str,
    ) -> Result<String, McpError> {
        let arguments = parse_tool_arguments(args_json).map_err(McpError::InvalidArguments)?;
        let session = self
            .session
            .read()
            .await
            .clone()
            .ok_or_else(|| McpError::NotRunning(self.name.clone()))?;

        debug!(server_id = %self.name, tool = %tool_name, "Calling MCP tool");
        let params = CallToolRequestParams::new(tool_name).with_arguments(arguments);
        let response = tokio::select! {
            _ = ctx.cancelled() => return Err(McpError::Interrupted),
            _ = session.cancel.cancelled() => return Err(McpError::Interrupted),
            response = session.transport.send_request(RequestFromClient::CallToolRequest(params)) => {
                response.map_err(McpError::Transport)?
            }
        };

        let result = parse_call_tool(response).map_err(McpError::Protocol)?;
        tool_output(&result).map_err(McpError::ToolFailed)
    }
}

async fn handshake(
    transport: &dyn Transport,
) -> Result<(InitializeResult, Vec<ToolSpec>), McpError> {
    let response = transport
        .send_request(RequestFromClient::InitializeRequest(client_details()))
        .await
        .map_err(McpError::Transport)?;
    let initialize = parse_initialize_result(response).map_err(McpError::Protocol)?;
    transport
        .send_notification(NotificationFromClient::InitializedNotification(None))
        .await
        .map_err(McpError::Transport)?;
    transport.initialized(&initialize).await;

    let tools = list_tools(transport).await?;
    Ok((initialize, tools.iter().map(tool_spec).collect()))
}

/// Follows `tools/list` cursors up to [`MCP_MAX_TOOL_LIST`] tools. A server
/// without the method has no tools.
async fn list_tools(transport: &dyn Transport) -> Result<Vec<Tool>, McpError> {
    let mut tools = Vec::new();
    let mut cursor = None;

    for _ in 0..MCP_MAX_TOOL_PAGES {
        let response = transport
            .send_request(RequestFromClient::ListToolsRequest(paginated_params(
                cursor.take(),
            )))
            .await
            .map_err(McpError::Transport)?;
        if is_method_not_found(&response) {
            break;
        }

        let page = parse_list_tools(response).map_err(McpError::Protocol)?;
        tools.extend(page.tools);
        if tools.len() >= MCP_MAX_TOOL_LIST {
            tools.truncate(MCP_MAX_TOOL_LIST);
            break;
        }
        match page.next_cursor {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => break,
        }
    }

    Ok(tools)
}

/// Answers server-initiated requests until the session is cancelled, then
/// closes the transport.
fn spawn_request_dispatcher(
    transport: Arc<dyn Transport>,
    mut requests: mpsc::UnboundedReceiver<McpServerRequest>,
    sampling: SharedSamplingHandler,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let request = tokio::select! {
                _ = cancel.cancelled() => break,
                request = requests.recv() => request,
            };
            let Some(request) = request else {
                break;
            };

            let handler = sampling.read().await.clone();
            let transport = transport.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = respond_to_server_request(transport.as_ref(), request, handler) => {}
                }
            });
        }
        transport.close().await;
    });
}

async fn respond_to_server_request(
    transport: &dyn Transport,
    request: McpServerRequest,
    handler: Option<Arc<SamplingHandler>>,
) {
    let server_id = request.server_id;
    let request_id = request.request.request_id().clone();

    let capabilities = ClientCapabilities {
        sampling: Some(ClientSampling::default()),
        ..ClientCapabilities::default()
    };
    let outcome = if let Err(err) = capabilities.can_handle_request(&request.request) {
        transport.send_error(request_id.clone(), err).await
    } else if let ServerJsonrpcRequest::CreateMessageRequest(create) = request.request {
        match handler {
            Some(handler) => match handler.handle_request(&server_id, &create.params).await {
                Ok(result) => {
                    transport
                        .send_result(
                            request_id.clone(),
                            ResultFromClient::CreateMessageResult(result),
                        )
                        .await
                }
                Err(err) => {
                    let message = err.to_string();
                    transport
                        .send_error(
                            request_id.clone(),
                            RpcError::internal_error().with_message(&message),
                        )
                        .await
                }
            },
            None => {
                transport
                    .send_error(
                        request_id.clone(),
                        RpcError::internal_error().with_message("Sampling is not configured."),
                    )
                    .await
            }
        }
    } else {
        transport
            .send_error(
                request_id.clone(),
                RpcError::method_not_found().with_message("Unsupported MCP request from server."),
            )
            .await
    };

    if let Err(err) = outcome {
        warn!(
            server_id = %server_id,
            request_id = ?request_id,
            error = %err,
            "Failed to answer MCP server request"
        );
    }
}
