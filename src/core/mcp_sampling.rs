//! Policy engine for `sampling/createMessage` requests raised by MCP servers.
//!
//! Protocol messages are converted once into [`SamplingRequest`]; everything
//! past that boundary works with the provider-agnostic message model.

use async_trait::async_trait;
use rust_mcp_schema::{
    CreateMessageContent, CreateMessageRequestParams, CreateMessageResult, MessageMeta,
    Role as ProtocolRole, SamplingMessageContent, SamplingMessageContentBlock, TextContent,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::core::config::data::{McpConfig, SamplingConfig};
use crate::core::message::{Message, Role};
use crate::core::provider::{first_text_fragment, CompletionProvider, CompletionRequest};
use crate::mcp::error::McpError;
use crate::mcp::permissions::{ApprovalDecision, SamplingApprovals};

pub const DEFAULT_SAMPLING_TIMEOUT: Duration = Duration::from_secs(300);

/// One piece of sampling message content, resolved at the protocol boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentPart {
    Text(String),
    /// Image, audio, tool use and other payloads the provider path ignores.
    Unsupported(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplingMessage {
    pub role: Role,
    pub parts: Vec<ContentPart>,
}

impl SamplingMessage {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![ContentPart::Text(text.into())],
        }
    }

    /// Text parts only; `None` when nothing usable is left.
    fn to_message(&self) -> Option<Message> {
        let parts: Vec<String> = self
            .parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text(text) => Some(text.clone()),
                ContentPart::Unsupported(_) => None,
            })
            .collect();
        (!parts.is_empty()).then_some(Message {
            role: self.role,
            parts,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplingRequest {
    pub messages: Vec<SamplingMessage>,
    pub system_prompt: Option<String>,
    pub max_tokens: i64,
    pub stop_sequences: Vec<String>,
    pub timeout: Option<Duration>,
}

impl SamplingRequest {
    pub fn new(messages: Vec<SamplingMessage>, max_tokens: i64) -> Self {
        Self {
            messages,
            system_prompt: None,
            max_tokens,
            stop_sequences: Vec::new(),
            timeout: None,
        }
    }

    pub fn from_params(params: &CreateMessageRequestParams) -> Self {
        let messages = params
            .messages
            .iter()
            .map(|message| SamplingMessage {
                role: match message.role {
                    ProtocolRole::User => Role::User,
                    ProtocolRole::Assistant => Role::Assistant,
                },
                parts: content_parts(&message.content),
            })
            .collect();

        Self {
            messages,
            system_prompt: params.system_prompt.clone(),
            max_tokens: params.max_tokens,
            stop_sequences: params.stop_sequences.clone(),
            timeout: params.meta.as_ref().and_then(sampling_timeout_from_meta),
        }
    }
}

fn content_parts(content: &SamplingMessageContent) -> Vec<ContentPart> {
    match content {
        SamplingMessageContent::TextContent(text) => vec![ContentPart::Text(text.text.clone())],
        SamplingMessageContent::SamplingMessageContentBlock(blocks) => {
            blocks.iter().map(block_part).collect()
        }
        _ => vec![ContentPart::Unsupported("non-text content")],
    }
}

fn block_part(block: &SamplingMessageContentBlock) -> ContentPart {
    match block {
        SamplingMessageContentBlock::TextContent(TextContent { text, .. }) => {
            ContentPart::Text(text.clone())
        }
        _ => ContentPart::Unsupported("non-text content block"),
    }
}

/// Reads a timeout from request `_meta`: keys containing `timeoutMs` are
/// milliseconds, other keys containing `timeout` are seconds.
fn sampling_timeout_from_meta(meta: &MessageMeta) -> Option<Duration> {
    let extra = meta.extra.as_ref()?;
    let mut timeout_ms: Option<u64> = None;
    let mut timeout_secs: Option<f64> = None;

    for (key, value) in extra {
        let key = key.to_ascii_lowercase();
        if key.contains("timeoutms") {
            timeout_ms = timeout_ms.or_else(|| positive_number(value).map(|ms| ms as u64));
        } else if key.contains("timeout") {
            timeout_secs = timeout_secs.or_else(|| positive_number(value));
        }
    }

    timeout_ms
        .map(Duration::from_millis)
        .or_else(|| timeout_secs.map(|secs| Duration::from_millis((secs * 1000.0).ceil() as u64)))
}

fn positive_number(value: &serde_json::Value) -> Option<f64> {
    let number = match value {
        serde_json::Value::Number(number) => number.as_f64(),
        serde_json::Value::String(value) => value.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    (number > 0.0).then_some(number)
}

/// Maps OpenAI-style finish reasons onto MCP stop reasons.
pub fn map_finish_reason(reason: Option<String>) -> Option<String> {
    let reason = reason?;
    let mapped = match reason.as_str() {
        "stop" => "endTurn",
        "length" => "maxTokens",
        "tool_calls" => "toolUse",
        "content_filter" => "stopSequence",
        _ => return Some(reason),
    };
    Some(mapped.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamplingResponse {
    pub text: String,
    pub model: String,
    pub stop_reason: Option<String>,
}

impl SamplingResponse {
    pub fn into_result(self) -> CreateMessageResult {
        CreateMessageResult {
            content: CreateMessageContent::from(TextContent::new(self.text, None, None)),
            meta: None,
            model: self.model,
            role: ProtocolRole::Assistant,
            stop_reason: self.stop_reason,
        }
    }
}

/// Interactive approval hook. Front-ends implement this to prompt the user.
#[async_trait]
pub trait SamplingApprover: Send + Sync {
    async fn approve(&self, server: &str, request: &SamplingRequest) -> ApprovalDecision;
}

pub struct SamplingHandler {
    provider: Arc<dyn CompletionProvider>,
    configs: HashMap<String, SamplingConfig>,
    yolo: bool,
    approvals: Mutex<SamplingApprovals>,
    approver: Option<Arc<dyn SamplingApprover>>,
}

impl SamplingHandler {
    pub fn new(provider: Arc<dyn CompletionProvider>) -> Self {
        Self {
            provider,
            configs: HashMap::new(),
            yolo: false,
            approvals: Mutex::new(SamplingApprovals::default()),
            approver: None,
        }
    }

    /// Auto-approves every request.
    pub fn with_yolo(mut self, yolo: bool) -> Self {
        self.yolo = yolo;
        self
    }

    pub fn with_server_config(mut self, server: impl Into<String>, config: SamplingConfig) -> Self {
        self.configs.insert(server.into(), config);
        self
    }

    /// Copies the sampling block of every configured server.
    pub fn with_mcp_config(mut self, config: &McpConfig) -> Self {
        for (name, server) in &config.servers {
            if let Some(sampling) = &server.sampling {
                self.configs.insert(name.clone(), sampling.clone());
            }
        }
        self
    }

    pub fn with_approver(mut self, approver: Arc<dyn SamplingApprover>) -> Self {
        self.approver = Some(approver);
        self
    }

    pub fn is_yolo(&self) -> bool {
        self.yolo
    }

    /// Agents allowed to sample through `server`; empty means unrestricted.
    pub fn allowed_agents(&self, server: &str) -> &[String] {
        self.configs
            .get(server)
            .map(|config| config.allowed_agents.as_slice())
            .unwrap_or_default()
    }

    pub async fn approve_server(&self, server: &str) {
        self.approvals
            .lock()
            .await
            .record(server, ApprovalDecision::AllowSession);
    }

    pub async fn revoke_server(&self, server: &str) {
        self.approvals.lock().await.clear_server(server);
    }

    pub async fn is_approved(&self, server: &str) -> bool {
        self.approvals.lock().await.is_approved(server)
    }

    fn config_for(&self, server: &str) -> SamplingConfig {
        self.configs.get(server).cloned().unwrap_or_default()
    }

    /// Protocol entry point used by clients.
    pub async fn handle_request(
        &self,
        server: &str,
        params: &CreateMessageRequestParams,
    ) -> Result<CreateMessageResult, McpError> {
        self.handle(server, SamplingRequest::from_params(params))
            .await
            .map(SamplingResponse::into_result)
    }

    pub async fn handle(
        &self,
        server: &str,
        request: SamplingRequest,
    ) -> Result<SamplingResponse, McpError> {
        let config = self.config_for(server);
        if !config.is_enabled() {
            debug!(server_id = %server, "Sampling rejected: disabled");
            return Err(McpError::SamplingDisabled(server.to_string()));
        }

        self.authorize(server, &config, &request).await?;

        let max_tokens = effective_max_tokens(request.max_tokens, config.token_cap());
        let completion = CompletionRequest {
            messages: build_messages(&request),
            max_tokens: (max_tokens > 0).then_some(max_tokens),
            stop: (!request.stop_sequences.is_empty()).then(|| request.stop_sequences.clone()),
        };
        let timeout = request.timeout.unwrap_or(DEFAULT_SAMPLING_TIMEOUT);
        info!(
            server_id = %server,
            messages = completion.messages.len(),
            max_tokens,
            timeout_secs = timeout.as_secs(),
            "Running MCP sampling request"
        );

        let completion = tokio::time::timeout(timeout, self.provider.complete(completion))
            .await
            .map_err(|_| {
                McpError::Provider(format!("Sampling timed out after {}s", timeout.as_secs()))
            })?
            .map_err(McpError::Provider)?;
        let text = first_text_fragment(&completion.events).map_err(McpError::Provider)?;

        Ok(SamplingResponse {
            text,
            model: self.provider.model().to_string(),
            stop_reason: map_finish_reason(completion.finish_reason),
        })
    }

    async fn authorize(
        &self,
        server: &str,
        config: &SamplingConfig,
        request: &SamplingRequest,
    ) -> Result<(), McpError> {
        if self.yolo || config.auto_approve || self.is_approved(server).await {
            return Ok(());
        }

        let decision = match &self.approver {
            Some(approver) => approver.approve(server, request).await,
            // Without an approver the caller has already obtained consent.
            None => ApprovalDecision::AllowSession,
        };
        debug!(server_id = %server, decision = ?decision, "Sampling approval decision");

        match decision {
            ApprovalDecision::Deny => Err(McpError::SamplingDenied(server.to_string())),
            decision => {
                self.approvals.lock().await.record(server, decision);
                Ok(())
            }
        }
    }
}

/// `min(requested, cap)` when a cap is configured.
pub fn effective_max_tokens(requested: i64, cap: Option<i64>) -> i64 {
    match cap {
        Some(cap) => requested.min(cap),
        None => requested,
    }
}

/// System prompt first, then the converted conversation.
pub fn build_messages(request: &SamplingRequest) -> Vec<Message> {
    let system = request
        .system_prompt
        .as_deref()
        .filter(|prompt| !prompt.trim().is_empty())
        .map(|prompt| Message::text(Role::System, prompt));

    system
        .into_iter()
        .chain(request.messages.iter().filter_map(SamplingMessage::to_message))
        .collect()
}
