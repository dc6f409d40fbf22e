//! In-memory fakes for providers, approvers and MCP transports.

use async_trait::async_trait;
use rust_mcp_schema::schema_utils::{
    NotificationFromClient, RequestFromClient, ResultFromClient, ServerJsonrpcRequest,
    ServerMessage,
};
use rust_mcp_schema::{RequestId, RpcError};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use crate::core::config::data::ServerConfig;
use crate::core::mcp_sampling::{SamplingApprover, SamplingRequest};
use crate::core::provider::{Completion, CompletionProvider, CompletionRequest, StreamMessage};
use crate::mcp::events::McpServerRequest;
use crate::mcp::permissions::ApprovalDecision;
use crate::mcp::transport::{Connector, Transport};

/// Replays scripted completions in order and records every request.
pub struct MockProvider {
    model: String,
    responses: Mutex<VecDeque<Result<Completion, String>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockProvider {
    pub fn with_texts(texts: &[&str]) -> Self {
        let responses = texts
            .iter()
            .map(|text| {
                Ok(Completion {
                    events: vec![StreamMessage::Chunk(text.to_string()), StreamMessage::End],
                    finish_reason: Some("stop".to_string()),
                })
            })
            .collect();
        Self {
            model: "mock-model".to_string(),
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: &str) -> Self {
        Self {
            model: "mock-model".to_string(),
            responses: Mutex::new(VecDeque::from([Err(error.to_string())])),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, String> {
        self.requests.lock().await.push(request);
        self.responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err("no scripted response".to_string()))
    }
}

/// Answers every prompt with a fixed decision and counts prompts.
pub struct CountingApprover {
    decision: ApprovalDecision,
    prompts: AtomicUsize,
}

impl CountingApprover {
    pub fn new(decision: ApprovalDecision) -> Self {
        Self {
            decision,
            prompts: AtomicUsize::new(0),
        }
    }

    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SamplingApprover for CountingApprover {
    async fn approve(&self, _server: &str, _request: &SamplingRequest) -> ApprovalDecision {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.decision
    }
}

pub fn fake_tool(name: &str, description: &str) -> Value {
    json!({
        "name": name,
        "description": description,
        "inputSchema": {"type": "object", "properties": {}}
    })
}

/// Scripted behaviour of one fake MCP server.
#[derive(Clone, Default)]
pub struct FakeServer {
    pub tools: Vec<Value>,
    pub page_size: Option<usize>,
    pub list_tools_unsupported: bool,
    pub fail_connect: Option<String>,
    pub fail_initialize: Option<String>,
    pub connect_delay: Option<Duration>,
    pub call_delay: Option<Duration>,
}

impl FakeServer {
    pub fn with_tools(tools: &[(&str, &str)]) -> Self {
        Self {
            tools: tools
                .iter()
                .map(|(name, description)| fake_tool(name, description))
                .collect(),
            ..Self::default()
        }
    }
}

fn response(result: Value) -> Result<ServerMessage, String> {
    serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": result}))
        .map_err(|err| err.to_string())
}

fn error_response(code: i64, message: &str) -> Result<ServerMessage, String> {
    serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "error": {"code": code, "message": message}
    }))
    .map_err(|err| err.to_string())
}

pub struct FakeTransport {
    server: FakeServer,
    methods: Mutex<Vec<String>>,
    results: Mutex<Vec<(RequestId, ResultFromClient)>>,
    errors: Mutex<Vec<(RequestId, RpcError)>>,
    closed: AtomicBool,
}

impl FakeTransport {
    pub fn new(server: FakeServer) -> Self {
        Self {
            server,
            methods: Mutex::new(Vec::new()),
            results: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub async fn methods(&self) -> Vec<String> {
        self.methods.lock().await.clone()
    }

    /// Sampling results sent back to the server, as JSON.
    pub async fn sampling_results(&self) -> Vec<Value> {
        self.results
            .lock()
            .await
            .iter()
            .filter_map(|(_, result)| match result {
                ResultFromClient::CreateMessageResult(result) => {
                    Some(serde_json::to_value(result).expect("serialize result"))
                }
                _ => None,
            })
            .collect()
    }

    /// `(code, message)` of every error sent back to the server.
    pub async fn errors(&self) -> Vec<(i64, String)> {
        self.errors
            .lock()
            .await
            .iter()
            .map(|(_, error)| (error.code, error.message.clone()))
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Waits until the transport has answered `count` server requests.
    pub async fn wait_for_answers(&self, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let answered = self.results.lock().await.len() + self.errors.lock().await.len();
                if answered >= count {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("server request was not answered");
    }

    fn list_tools_page(&self, cursor: Option<String>) -> Result<ServerMessage, String> {
        if self.server.list_tools_unsupported {
            return error_response(-32601, "Method not found");
        }
        let offset = cursor
            .as_deref()
            .and_then(|cursor| cursor.parse::<usize>().ok())
            .unwrap_or(0);
        let page_size = self.server.page_size.unwrap_or(usize::MAX);
        let page: Vec<Value> = self
            .server
            .tools
            .iter()
            .skip(offset)
            .take(page_size)
            .cloned()
            .collect();
        let next = offset.saturating_add(page.len());
        let next_cursor = (next < self.server.tools.len()).then(|| next.to_string());
        response(json!({"tools": page, "nextCursor": next_cursor}))
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_request(&self, request: RequestFromClient) -> Result<ServerMessage, String> {
        if self.is_closed() {
            return Err("transport closed".to_string());
        }
        match request {
            RequestFromClient::InitializeRequest(_) => {
                self.methods.lock().await.push("initialize".to_string());
                if let Some(error) = &self.server.fail_initialize {
                    return Err(error.clone());
                }
                response(json!({
                    "protocolVersion": "2025-11-25",
                    "capabilities": {"tools": {}},
                    "serverInfo": {"name": "fake", "version": "1.0.0"}
                }))
            }
            RequestFromClient::ListToolsRequest(params) => {
                self.methods.lock().await.push("tools/list".to_string());
                self.list_tools_page(params.and_then(|params| params.cursor))
            }
            RequestFromClient::CallToolRequest(params) => {
                self.methods.lock().await.push("tools/call".to_string());
                if let Some(delay) = self.server.call_delay {
                    tokio::time::sleep(delay).await;
                }
                if params.name == "fail" {
                    return response(json!({
                        "content": [{"type": "text", "text": "tool exploded"}],
                        "isError": true
                    }));
                }
                let arguments = serde_json::to_string(&params.arguments.unwrap_or_default())
                    .map_err(|err| err.to_string())?;
                response(json!({
                    "content": [{"type": "text", "text": format!("{} {}", params.name, arguments)}]
                }))
            }
            _ => error_response(-32601, "Method not found"),
        }
    }

    async fn send_notification(&self, _notification: NotificationFromClient) -> Result<(), String> {
        self.methods
            .lock()
            .await
            .push("notifications/initialized".to_string());
        Ok(())
    }

    async fn send_result(
        &self,
        request_id: RequestId,
        result: ResultFromClient,
    ) -> Result<(), String> {
        self.results.lock().await.push((request_id, result));
        Ok(())
    }

    async fn send_error(&self, request_id: RequestId, error: RpcError) -> Result<(), String> {
        self.errors.lock().await.push((request_id, error));
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Hands out [`FakeTransport`]s and keeps each server's inbound request
/// sender so tests can play the server side.
#[derive(Default)]
pub struct FakeConnector {
    servers: HashMap<String, FakeServer>,
    connects: AtomicUsize,
    transports: Mutex<Vec<(String, Arc<FakeTransport>)>>,
    senders: Mutex<HashMap<String, mpsc::UnboundedSender<McpServerRequest>>>,
}

impl FakeConnector {
    pub fn new(servers: Vec<(&str, FakeServer)>) -> Self {
        Self {
            servers: servers
                .into_iter()
                .map(|(name, server)| (name.to_string(), server))
                .collect(),
            ..Self::default()
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub async fn transport(&self, name: &str) -> Arc<FakeTransport> {
        self.transports
            .lock()
            .await
            .iter()
            .rev()
            .find(|(server, _)| server == name)
            .map(|(_, transport)| transport.clone())
            .expect("server was never connected")
    }

    pub async fn transports(&self, name: &str) -> Vec<Arc<FakeTransport>> {
        self.transports
            .lock()
            .await
            .iter()
            .filter(|(server, _)| server == name)
            .map(|(_, transport)| transport.clone())
            .collect()
    }

    /// Delivers a server-initiated request as if `name` had sent it.
    pub async fn send_server_request(&self, name: &str, message: Value) {
        let ServerMessage::Request(request) =
            serde_json::from_value::<ServerMessage>(message).expect("server message")
        else {
            panic!("expected a server request");
        };
        let request: ServerJsonrpcRequest = request;
        let sender = self
            .senders
            .lock()
            .await
            .get(name)
            .cloned()
            .expect("server was never connected");
        sender
            .send(McpServerRequest {
                server_id: name.to_string(),
                request,
            })
            .expect("dispatcher should be listening");
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        server_name: &str,
        _config: &ServerConfig,
        requests: mpsc::UnboundedSender<McpServerRequest>,
    ) -> Result<Arc<dyn Transport>, String> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let server = self.servers.get(server_name).cloned().unwrap_or_default();
        if let Some(delay) = server.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &server.fail_connect {
            return Err(error.clone());
        }

        let transport = Arc::new(FakeTransport::new(server));
        self.transports
            .lock()
            .await
            .push((server_name.to_string(), transport.clone()));
        self.senders
            .lock()
            .await
            .insert(server_name.to_string(), requests);
        let transport: Arc<dyn Transport> = transport;
        Ok(transport)
    }
}

pub fn sampling_request_message(id: i64, text: &str, max_tokens: i64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "sampling/createMessage",
        "params": {
            "messages": [{"role": "user", "content": {"type": "text", "text": text}}],
            "maxTokens": max_tokens
        }
    })
}
