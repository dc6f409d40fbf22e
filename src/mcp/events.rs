use rust_mcp_schema::schema_utils::ServerJsonrpcRequest;
use std::fmt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

/// A request initiated by a server (e.g. `sampling/createMessage`), tagged
/// with the server it came from.
#[derive(Debug, Clone)]
pub struct McpServerRequest {
    pub server_id: String,
    pub request: ServerJsonrpcRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerStatus {
    Stopped,
    Starting,
    Ready,
    Failed,
}

impl ServerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ServerStatus::Stopped => "stopped",
            ServerStatus::Starting => "starting",
            ServerStatus::Ready => "ready",
            ServerStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub name: String,
    pub status: ServerStatus,
    pub error: Option<String>,
}

impl StatusUpdate {
    pub fn new(name: impl Into<String>, status: ServerStatus, error: Option<String>) -> Self {
        Self {
            name: name.into(),
            status,
            error,
        }
    }
}

/// Non-blocking publisher for status updates.
///
/// Delivery is lossy: when the queue is full the newest update is dropped.
/// Consumers that need the complete picture poll the manager instead.
#[derive(Debug, Clone)]
pub struct StatusPublisher {
    tx: mpsc::Sender<StatusUpdate>,
}

impl StatusPublisher {
    pub fn new(tx: mpsc::Sender<StatusUpdate>) -> Self {
        Self { tx }
    }

    /// Returns `false` when the update was dropped.
    pub fn publish(&self, update: StatusUpdate) -> bool {
        match self.tx.try_send(update) {
            Ok(()) => true,
            Err(TrySendError::Full(update)) => {
                debug!(
                    server_id = %update.name,
                    status = %update.status,
                    "Status queue full; dropping update"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Creates a bounded status queue and its publisher.
pub fn status_channel(capacity: usize) -> (StatusPublisher, mpsc::Receiver<StatusUpdate>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (StatusPublisher::new(tx), rx)
}
