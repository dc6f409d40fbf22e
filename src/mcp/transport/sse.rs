//! Server-sent event framing for the streamable HTTP transport.

use futures_util::StreamExt;
use rust_mcp_schema::schema_utils::ServerMessage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::mcp::events::McpServerRequest;

/// Splits a byte stream into trimmed, non-empty lines across chunk boundaries.
#[derive(Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
}

impl SseLineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(newline) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            if let Some(text) = decode_line(&line) {
                lines.push(text);
            }
        }
        lines
    }

    /// Flushes a trailing line that never saw its newline.
    pub fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.pending);
        decode_line(&rest).into_iter().collect()
    }
}

fn decode_line(bytes: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(bytes).ok()?.trim();
    (!text.is_empty()).then(|| text.to_string())
}

pub fn is_event_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case("text/event-stream"))
}

pub fn sse_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:")
        .map(str::trim)
        .filter(|payload| !payload.is_empty())
}

/// Parses one SSE line. Server requests are forwarded; responses and errors
/// are handed back to the caller.
fn route_sse_line(
    line: &str,
    server_id: &str,
    request_tx: Option<&mpsc::UnboundedSender<McpServerRequest>>,
) -> Option<ServerMessage> {
    let payload = sse_data_payload(line)?;
    let message = match serde_json::from_str::<ServerMessage>(payload) {
        Ok(message) => message,
        Err(err) => {
            debug!(server_id = %server_id, error = %err, "Skipping unparseable SSE payload");
            return None;
        }
    };
    match message {
        ServerMessage::Response(_) | ServerMessage::Error(_) => Some(message),
        ServerMessage::Request(request) => {
            if let Some(tx) = request_tx {
                let _ = tx.send(McpServerRequest {
                    server_id: server_id.to_string(),
                    request,
                });
            }
            None
        }
        ServerMessage::Notification(_) => None,
    }
}

/// Reads an SSE response body until the JSON-RPC response for the request
/// arrives, forwarding any server requests seen on the way.
pub async fn read_sse_response(
    response: reqwest::Response,
    server_id: &str,
    request_tx: Option<&mpsc::UnboundedSender<McpServerRequest>>,
) -> Result<ServerMessage, String> {
    let mut stream = response.bytes_stream();
    let mut buffer = SseLineBuffer::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| err.to_string())?;
        for line in buffer.push(&chunk) {
            if let Some(message) = route_sse_line(&line, server_id, request_tx) {
                return Ok(message);
            }
        }
    }

    for line in buffer.finish() {
        if let Some(message) = route_sse_line(&line, server_id, request_tx) {
            return Ok(message);
        }
    }

    Err("Empty event-stream response.".to_string())
}

/// Forwards server requests from a long-lived SSE stream until it ends or
/// `cancel` fires.
pub async fn forward_sse_requests(
    response: reqwest::Response,
    server_id: &str,
    request_tx: &mpsc::UnboundedSender<McpServerRequest>,
    cancel: &CancellationToken,
) {
    let mut stream = response.bytes_stream();
    let mut buffer = SseLineBuffer::default();

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return,
            chunk = stream.next() => chunk,
        };
        let Some(Ok(chunk)) = chunk else {
            break;
        };
        for line in buffer.push(&chunk) {
            let _ = route_sse_line(&line, server_id, Some(request_tx));
        }
    }

    for line in buffer.finish() {
        let _ = route_sse_line(&line, server_id, Some(request_tx));
    }
}
