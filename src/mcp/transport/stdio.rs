//! Newline-delimited JSON-RPC over a spawned subprocess.

use async_trait::async_trait;
use rust_mcp_schema::schema_utils::{
    ClientMessage, FromMessage, MessageFromClient, NotificationFromClient, RequestFromClient,
    ResultFromClient, ServerMessage,
};
use rust_mcp_schema::{RequestId, RpcError};
use std::collections::HashMap;
use std::ffi::OsString;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Transport;
use crate::core::config::data::ServerConfig;
use crate::mcp::events::McpServerRequest;

const STDIO_REQUEST_TIMEOUT_SECONDS: u64 = 60;
const STDIO_SAMPLING_TIMEOUT_MULTIPLIER: u64 = 5;
const STDIO_WRITE_TIMEOUT_SECONDS: u64 = 10;

type PendingRequests = Arc<Mutex<HashMap<RequestId, oneshot::Sender<ServerMessage>>>>;

/// Environment for the child process.
///
/// `None` means inherit the parent environment untouched. With overrides the
/// result is the parent environment followed by the overrides, so a later
/// entry wins on key collision.
pub fn merged_env(
    overrides: Option<&HashMap<String, String>>,
) -> Option<Vec<(OsString, OsString)>> {
    let overrides = overrides.filter(|env| !env.is_empty())?;
    let mut env: Vec<(OsString, OsString)> = std::env::vars_os().collect();
    env.extend(
        overrides
            .iter()
            .map(|(key, value)| (OsString::from(key), OsString::from(value))),
    );
    Some(env)
}

/// Builds the child command without spawning it.
pub fn build_command(config: &ServerConfig) -> Result<Command, String> {
    let program = config
        .command
        .as_deref()
        .map(str::trim)
        .filter(|command| !command.is_empty())
        .ok_or_else(|| "MCP command is required for stdio transport.".to_string())?;

    let mut command = Command::new(program);
    command
        .args(&config.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(env) = merged_env(config.env.as_ref()) {
        command.env_clear().envs(env);
    }

    Ok(command)
}

pub struct StdioTransport {
    server_id: String,
    stdin: Mutex<ChildStdin>,
    pending: PendingRequests,
    next_request_id: AtomicI64,
    request_tx: mpsc::UnboundedSender<McpServerRequest>,
    activity_notify: Arc<Notify>,
    inflight_server_requests: Arc<AtomicI64>,
    /// Cancelled on close, drop or process exit. The supervisor kills the
    /// child when it fires.
    process: CancellationToken,
}

impl StdioTransport {
    pub fn spawn(
        server_id: String,
        config: &ServerConfig,
        request_tx: mpsc::UnboundedSender<McpServerRequest>,
    ) -> Result<Arc<Self>, String> {
        let mut command = build_command(config)?;
        debug!(
            server_id = %server_id,
            command = ?config.command,
            args = ?config.args,
            env_overrides = config.env.as_ref().map_or(0, HashMap::len),
            "Starting MCP stdio server"
        );

        let mut child = command
            .spawn()
            .map_err(|err| format!("Failed to start MCP server: {err}"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| "Unable to retrieve stdin.".to_string())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| "Unable to retrieve stdout.".to_string())?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| "Unable to retrieve stderr.".to_string())?;

        let transport = Arc::new(Self {
            server_id,
            stdin: Mutex::new(stdin),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_request_id: AtomicI64::new(0),
            request_tx,
            activity_notify: Arc::new(Notify::new()),
            inflight_server_requests: Arc::new(AtomicI64::new(0)),
            process: CancellationToken::new(),
        });

        transport.spawn_stdout_reader(stdout);
        Self::spawn_stderr_drain(stderr, transport.server_id.clone());
        Self::spawn_supervisor(
            child,
            transport.pending.clone(),
            transport.process.clone(),
            transport.server_id.clone(),
        );

        Ok(transport)
    }

    fn spawn_stdout_reader(&self, stdout: ChildStdout) {
        let pending = self.pending.clone();
        let server_id = self.server_id.clone();
        let request_tx = self.request_tx.clone();
        let activity_notify = self.activity_notify.clone();
        let inflight = self.inflight_server_requests.clone();

        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                let Ok(value) = serde_json::from_str::<serde_json::Value>(&line) else {
                    debug!(server_id = %server_id, "Ignoring non-JSON stdout line");
                    continue;
                };
                let batch = match value {
                    serde_json::Value::Array(items) => items,
                    single => vec![single],
                };
                for item in batch {
                    if let Ok(message) = serde_json::from_value::<ServerMessage>(item) {
                        dispatch_message(
                            &pending,
                            message,
                            &server_id,
                            &request_tx,
                            &activity_notify,
                            &inflight,
                        )
                        .await;
                    }
                }
            }
            debug!(server_id = %server_id, "MCP stdio stdout closed");
        });
    }

    fn spawn_stderr_drain(stderr: ChildStderr, server_id: String) {
        tokio::spawn(async move {
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                debug!(server_id = %server_id, stderr = %line, "MCP server stderr");
            }
        });
    }

    /// Owns the child: waits for it to exit or kills it on cancellation, then
    /// fails every pending request.
    fn spawn_supervisor(
        mut child: Child,
        pending: PendingRequests,
        process: CancellationToken,
        server_id: String,
    ) {
        tokio::spawn(async move {
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = process.cancelled() => None,
            };
            match exited {
                Some(status) => {
                    debug!(server_id = %server_id, status = ?status, "MCP stdio server exited");
                    process.cancel();
                }
                None => {
                    debug!(server_id = %server_id, "Terminating MCP stdio server");
                    let _ = child.kill().await;
                }
            }
            pending.lock().await.clear();
        });
    }

    fn timeout_for_wait(&self) -> Duration {
        let inflight = self.inflight_server_requests.load(Ordering::SeqCst);
        let multiplier = if inflight > 0 {
            STDIO_SAMPLING_TIMEOUT_MULTIPLIER
        } else {
            1
        };
        Duration::from_secs(STDIO_REQUEST_TIMEOUT_SECONDS * multiplier)
    }

    fn decrement_inflight(&self) -> i64 {
        let previous = self
            .inflight_server_requests
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current > 0).then(|| current - 1)
            })
            .unwrap_or(0);
        (previous - 1).max(0)
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Integer(self.next_request_id.fetch_add(1, Ordering::SeqCst))
    }

    fn ensure_running(&self) -> Result<(), String> {
        if self.process.is_cancelled() {
            Err("MCP stdio server is not running.".to_string())
        } else {
            Ok(())
        }
    }

    async fn write_message(&self, message: &ClientMessage, kind: &str) -> Result<(), String> {
        self.ensure_running()?;
        let mut payload = serde_json::to_vec(message).map_err(|err| err.to_string())?;
        payload.push(b'\n');

        let write_timeout = Duration::from_secs(STDIO_WRITE_TIMEOUT_SECONDS);
        let mut stdin = tokio::time::timeout(write_timeout, self.stdin.lock())
            .await
            .map_err(|_| "Timed out waiting for MCP stdio stdin lock.".to_string())?;
        debug!(
            server_id = %self.server_id,
            bytes = payload.len(),
            kind,
            "Writing MCP stdio message"
        );
        tokio::time::timeout(write_timeout, stdin.write_all(&payload))
            .await
            .map_err(|_| format!("Timed out writing MCP stdio {kind}."))?
            .map_err(|err| err.to_string())?;
        tokio::time::timeout(write_timeout, stdin.flush())
            .await
            .map_err(|_| format!("Timed out flushing MCP stdio {kind}."))?
            .map_err(|err| err.to_string())
    }

    /// Waits for the response, extending the deadline whenever the server
    /// shows activity.
    async fn await_response(
        &self,
        request_id: &RequestId,
        mut rx: oneshot::Receiver<ServerMessage>,
    ) -> Result<ServerMessage, String> {
        let mut timeout = self.timeout_for_wait();
        let mut deadline = tokio::time::Instant::now() + timeout;
        loop {
            tokio::select! {
                result = &mut rx => {
                    return result.map_err(|_| {
                        debug!(request_id = ?request_id, "MCP stdio response channel closed");
                        "MCP stdio response channel closed.".to_string()
                    });
                }
                _ = tokio::time::sleep_until(deadline) => {
                    debug!(
                        server_id = %self.server_id,
                        request_id = ?request_id,
                        timeout_secs = timeout.as_secs(),
                        "MCP stdio request timed out"
                    );
                    self.pending.lock().await.remove(request_id);
                    return Err("MCP stdio request timed out.".to_string());
                }
                _ = self.activity_notify.notified() => {
                    timeout = self.timeout_for_wait();
                    deadline = tokio::time::Instant::now() + timeout;
                }
            }
        }
    }

    async fn answer_server_request(
        &self,
        message: ClientMessage,
        request_id: &RequestId,
    ) -> Result<(), String> {
        self.write_message(&message, "response").await?;
        let inflight = self.decrement_inflight();
        debug!(
            server_id = %self.server_id,
            request_id = ?request_id,
            inflight_server_requests = inflight,
            "Answered MCP server request"
        );
        self.activity_notify.notify_waiters();
        Ok(())
    }
}

async fn dispatch_message(
    pending: &PendingRequests,
    message: ServerMessage,
    server_id: &str,
    request_tx: &mpsc::UnboundedSender<McpServerRequest>,
    activity_notify: &Notify,
    inflight_server_requests: &AtomicI64,
) {
    let response_id = match &message {
        ServerMessage::Response(response) => Some(response.id.clone()),
        ServerMessage::Error(error) => error.id.clone(),
        ServerMessage::Request(request) => {
            let inflight = inflight_server_requests.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(
                server_id = %server_id,
                method = %request.method(),
                request_id = ?request.request_id(),
                inflight_server_requests = inflight,
                "Received MCP stdio request"
            );
            activity_notify.notify_waiters();
            let forwarded = request_tx.send(McpServerRequest {
                server_id: server_id.to_string(),
                request: request.clone(),
            });
            if forwarded.is_err() {
                inflight_server_requests.fetch_sub(1, Ordering::SeqCst);
            }
            return;
        }
        ServerMessage::Notification(_) => {
            activity_notify.notify_waiters();
            return;
        }
    };

    let Some(id) = response_id else {
        debug!(server_id = %server_id, "Dropping MCP error without id");
        return;
    };
    if let Some(tx) = pending.lock().await.remove(&id) {
        let _ = tx.send(message);
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send_request(&self, request: RequestFromClient) -> Result<ServerMessage, String> {
        let request_id = self.next_request_id();
        let message = ClientMessage::from_message(
            MessageFromClient::RequestFromClient(request),
            Some(request_id.clone()),
        )
        .map_err(|err| err.to_string())?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);

        if let Err(err) = self.write_message(&message, "request").await {
            self.pending.lock().await.remove(&request_id);
            return Err(err);
        }
        self.await_response(&request_id, rx).await
    }

    async fn send_notification(&self, notification: NotificationFromClient) -> Result<(), String> {
        let message = ClientMessage::from_message(
            MessageFromClient::NotificationFromClient(notification),
            None,
        )
        .map_err(|err| err.to_string())?;
        self.write_message(&message, "notification").await
    }

    async fn send_result(
        &self,
        request_id: RequestId,
        result: ResultFromClient,
    ) -> Result<(), String> {
        let message = ClientMessage::from_message(
            MessageFromClient::ResultFromClient(result),
            Some(request_id.clone()),
        )
        .map_err(|err| err.to_string())?;
        self.answer_server_request(message, &request_id).await
    }

    async fn send_error(&self, request_id: RequestId, error: RpcError) -> Result<(), String> {
        let message =
            ClientMessage::from_message(MessageFromClient::Error(error), Some(request_id.clone()))
                .map_err(|err| err.to_string())?;
        self.answer_server_request(message, &request_id).await
    }

    async fn close(&self) {
        if !self.process.is_cancelled() {
            debug!(server_id = %self.server_id, "Closing MCP stdio transport");
        }
        self.process.cancel();
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.process.cancel();
    }
}
