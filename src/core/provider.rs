//! LLM provider boundary used by MCP sampling.
//!
//! Sampling only needs one capability from a provider: complete a list of
//! messages and hand back the resulting events. Tool calling is never
//! requested through this path.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use crate::api::{ChatCompletionResponse, ChatMessage, ChatRequest};
use crate::core::message::Message;
use crate::utils::url::construct_api_url;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const PROVIDER_CONNECT_TIMEOUT_SECONDS: u64 = 10;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamMessage {
    Chunk(String),
    Error(String),
    End,
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub max_tokens: Option<i64>,
    pub stop: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Completion {
    pub events: Vec<StreamMessage>,
    pub finish_reason: Option<String>,
}

impl Completion {
    pub fn from_events(events: Vec<StreamMessage>) -> Self {
        Self {
            events,
            finish_reason: None,
        }
    }
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Model identifier reported back to servers that requested sampling.
    fn model(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, String>;
}

/// Returns the first text fragment of a completion, surfacing an error event
/// that arrives before any text.
pub fn first_text_fragment(events: &[StreamMessage]) -> Result<String, String> {
    for event in events {
        match event {
            StreamMessage::Chunk(text) => return Ok(text.clone()),
            StreamMessage::Error(error) => return Err(error.clone()),
            StreamMessage::End => break,
        }
    }
    Err("LLM provider returned no text.".to_string())
}

/// Non-streaming client for OpenAI-compatible chat completion endpoints.
pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(base_url: String, api_key: String, model: String) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(PROVIDER_CONNECT_TIMEOUT_SECONDS))
            .build()
            .map_err(|err| err.to_string())?;
        Ok(Self {
            client,
            base_url,
            api_key,
            model,
        })
    }

    fn chat_request(&self, request: CompletionRequest) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|message| ChatMessage {
                    role: message.role.as_str().to_string(),
                    content: message.joined_text(),
                })
                .collect(),
            stream: false,
            max_tokens: request.max_tokens,
            stop: request.stop,
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, String> {
        let chat_url = construct_api_url(&self.base_url, "chat/completions");
        let body = self.chat_request(request);
        debug!(url = %chat_url, model = %self.model, messages = body.messages.len(), "Requesting chat completion");

        let response = self
            .client
            .post(chat_url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|err| format_api_error(&err.to_string()))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(format_api_error(&error_text));
        }

        let completion = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|err| err.to_string())?;
        let Some(choice) = completion.choices.into_iter().next() else {
            return Ok(Completion::from_events(vec![StreamMessage::End]));
        };

        let mut events = Vec::new();
        if let Some(content) = choice.message.content {
            events.push(StreamMessage::Chunk(content));
        }
        events.push(StreamMessage::End);
        Ok(Completion {
            events,
            finish_reason: choice.finish_reason,
        })
    }
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| {
        let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.trim().to_string()
    })
}

pub fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "API Error: <empty>".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Some(summary) = extract_error_summary(&json_value) {
            if !summary.is_empty() {
                return format!("API Error: {summary}");
            }
        }
        if let Ok(compact) = serde_json::to_string(&json_value) {
            return format!("API Error: {compact}");
        }
    }

    format!("API Error: {trimmed}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Role;

    #[test]
    fn first_text_fragment_returns_first_chunk() {
        let events = vec![
            StreamMessage::Chunk("Hello".to_string()),
            StreamMessage::Chunk(" world".to_string()),
            StreamMessage::End,
        ];
        assert_eq!(first_text_fragment(&events), Ok("Hello".to_string()));
    }

    #[test]
    fn first_text_fragment_reports_errors_and_empty_streams() {
        let errored = vec![StreamMessage::Error("boom".to_string())];
        assert_eq!(first_text_fragment(&errored), Err("boom".to_string()));

        let empty = vec![StreamMessage::End];
        assert!(first_text_fragment(&empty).is_err());
    }

    #[test]
    fn chat_request_flattens_message_parts() {
        let provider = OpenAiProvider::new(
            DEFAULT_BASE_URL.to_string(),
            "key".to_string(),
            "gpt-4o-mini".to_string(),
        )
        .expect("provider");
        let request = provider.chat_request(CompletionRequest {
            messages: vec![
                Message::text(Role::System, "Be brief."),
                Message {
                    role: Role::User,
                    parts: vec!["one".to_string(), "two".to_string()],
                },
            ],
            max_tokens: Some(50),
            stop: None,
        });

        assert_eq!(request.model, "gpt-4o-mini");
        assert!(!request.stream);
        assert_eq!(request.max_tokens, Some(50));
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[1].content, "one\ntwo");
    }

    #[test]
    fn format_api_error_prefers_json_summary() {
        let raw = r#"{"error":{"message":"model   overloaded","type":"server_error"}}"#;
        assert_eq!(format_api_error(raw), "API Error: model overloaded");
    }

    #[test]
    fn format_api_error_handles_plaintext_and_empty_bodies() {
        assert_eq!(format_api_error("api failure"), "API Error: api failure");
        assert_eq!(format_api_error("   "), "API Error: <empty>");
        assert_eq!(
            format_api_error(r#"{"status":"failed"}"#),
            r#"API Error: {"status":"failed"}"#
        );
    }
}
