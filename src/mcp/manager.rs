//! Lifecycle manager for every configured MCP server.
//!
//! Each server moves through `Stopped -> Starting -> Ready | Failed`.
//! [`McpManager::enable`] only performs the synchronous transition to
//! `Starting`; the connection runs as a detached task that later records the
//! terminal state. All live state sits behind one reader-writer lock that is
//! never held across a connect.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::config::data::{validate_server_name, McpConfig, ServerConfig};
use crate::core::mcp_sampling::SamplingHandler;
use crate::core::tools::ToolSpec;
use crate::mcp::client::McpClient;
use crate::mcp::error::McpError;
use crate::mcp::events::{ServerStatus, StatusPublisher, StatusUpdate};
use crate::mcp::tool_cache::ToolCache;
use crate::mcp::transport::{Connector, DefaultConnector};
use crate::mcp::{namespaced_tool_name, parse_tool_name};

const SETTLE_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Live record for one enabled server. Replaced, never reused, when the
/// server is enabled again.
pub struct ServerState {
    pub name: String,
    pub status: ServerStatus,
    pub error: Option<String>,
    client: Arc<McpClient>,
    /// Child of the enable context; cancelled by `disable`.
    cancel: CancellationToken,
}

impl ServerState {
    fn snapshot(&self) -> StatusUpdate {
        StatusUpdate::new(self.name.clone(), self.status, self.error.clone())
    }
}

#[derive(Default)]
struct ManagerState {
    servers: BTreeMap<String, ServerState>,
}

pub struct McpManager {
    configs: BTreeMap<String, ServerConfig>,
    state: Arc<RwLock<ManagerState>>,
    sampling: RwLock<Option<Arc<SamplingHandler>>>,
    publisher: Option<StatusPublisher>,
    connector: Arc<dyn Connector>,
    tool_cache: Option<PathBuf>,
    cache_lock: Arc<Mutex<()>>,
}

impl McpManager {
    pub fn new(config: &McpConfig) -> Self {
        Self::with_connector(config, Arc::new(DefaultConnector))
    }

    pub fn with_connector(config: &McpConfig, connector: Arc<dyn Connector>) -> Self {
        for name in config.servers.keys() {
            if let Err(err) = validate_server_name(name) {
                warn!(server_id = %name, error = %err, "MCP server cannot be enabled");
            }
        }
        Self {
            configs: config.servers.clone(),
            state: Arc::new(RwLock::new(ManagerState::default())),
            sampling: RwLock::new(None),
            publisher: None,
            connector,
            tool_cache: None,
            cache_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Pushes every status transition to `publisher`.
    pub fn with_status_publisher(mut self, publisher: StatusPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Records each ready server's tools in the cache file at `path`.
    pub fn with_tool_cache(mut self, path: PathBuf) -> Self {
        self.tool_cache = Some(path);
        self
    }

    /// Used by clients created after this call.
    pub async fn set_sampling_handler(&self, handler: Option<Arc<SamplingHandler>>) {
        *self.sampling.write().await = handler;
    }

    pub async fn sampling_handler(&self) -> Option<Arc<SamplingHandler>> {
        self.sampling.read().await.clone()
    }

    pub fn server_names(&self) -> Vec<String> {
        self.configs.keys().cloned().collect()
    }

    pub fn server_config(&self, name: &str) -> Option<&ServerConfig> {
        self.configs.get(name)
    }

    fn publish(&self, update: StatusUpdate) {
        publish(self.publisher.as_ref(), update);
    }

    /// Moves `name` to `Starting` and connects in the background.
    ///
    /// Returns immediately; a server already starting or ready is left alone.
    pub async fn enable(&self, ctx: &CancellationToken, name: &str) -> Result<(), McpError> {
        let config = self
            .configs
            .get(name)
            .cloned()
            .ok_or_else(|| McpError::UnknownServer(name.to_string()))?;
        validate_server_name(name).map_err(|message| McpError::InvalidConfig {
            server: name.to_string(),
            message,
        })?;
        let sampling = self.sampling_handler().await;

        let (client, cancel) = {
            let mut state = self.state.write().await;
            if let Some(existing) = state.servers.get(name) {
                if matches!(existing.status, ServerStatus::Starting | ServerStatus::Ready) {
                    debug!(server_id = %name, status = %existing.status, "MCP server already enabled");
                    return Ok(());
                }
            }

            let client = Arc::new(McpClient::new(name, config, self.connector.clone()));
            let cancel = ctx.child_token();
            state.servers.insert(
                name.to_string(),
                ServerState {
                    name: name.to_string(),
                    status: ServerStatus::Starting,
                    error: None,
                    client: client.clone(),
                    cancel: cancel.clone(),
                },
            );
            self.publish(StatusUpdate::new(name, ServerStatus::Starting, None));
            (client, cancel)
        };
        client.set_sampling_handler(sampling).await;
        info!(server_id = %name, "Starting MCP server");

        let task = ConnectTask {
            name: name.to_string(),
            client,
            state: self.state.clone(),
            publisher: self.publisher.clone(),
            tool_cache: self.tool_cache.clone(),
            cache_lock: self.cache_lock.clone(),
        };
        tokio::spawn(async move { task.run(&cancel).await });
        Ok(())
    }

    /// Enables every configured server not marked `disabled`.
    pub async fn enable_all(&self, ctx: &CancellationToken) {
        for (name, config) in &self.configs {
            if config.disabled {
                debug!(server_id = %name, "Skipping disabled MCP server");
                continue;
            }
            if let Err(err) = self.enable(ctx, name).await {
                warn!(server_id = %name, error = %err, "Failed to enable MCP server");
            }
        }
    }

    /// Tears the server down and forgets it. Unknown names are a no-op.
    pub async fn disable(&self, name: &str) -> Result<(), McpError> {
        let removed = {
            let mut state = self.state.write().await;
            let removed = state.servers.remove(name);
            if removed.is_some() {
                self.publish(StatusUpdate::new(name, ServerStatus::Stopped, None));
            }
            removed
        };
        let Some(server) = removed else {
            return Ok(());
        };

        server.cancel.cancel();
        server.client.stop().await;
        info!(server_id = %name, "Stopped MCP server");
        Ok(())
    }

    /// `disable` followed by `enable`. Observers may see `Stopped` in between.
    pub async fn restart(&self, ctx: &CancellationToken, name: &str) -> Result<(), McpError> {
        self.disable(name).await?;
        self.enable(ctx, name).await
    }

    pub async fn stop_all(&self) {
        let names: Vec<String> = self.state.read().await.servers.keys().cloned().collect();
        for name in names {
            let _ = self.disable(&name).await;
        }
    }

    /// Current status of `name`; servers without live state are `Stopped`.
    pub async fn server_status(&self, name: &str) -> StatusUpdate {
        self.state
            .read()
            .await
            .servers
            .get(name)
            .map(ServerState::snapshot)
            .unwrap_or_else(|| StatusUpdate::new(name, ServerStatus::Stopped, None))
    }

    /// Status of every server with live state, in name order.
    pub async fn all_states(&self) -> Vec<StatusUpdate> {
        self.state
            .read()
            .await
            .servers
            .values()
            .map(ServerState::snapshot)
            .collect()
    }

    /// Polls until no server is `Starting`. Returns `false` on timeout.
    pub async fn wait_until_settled(&self, timeout: Duration) -> bool {
        let settled = async {
            loop {
                let starting = self
                    .state
                    .read()
                    .await
                    .servers
                    .values()
                    .any(|server| server.status == ServerStatus::Starting);
                if !starting {
                    return;
                }
                tokio::time::sleep(SETTLE_POLL_INTERVAL).await;
            }
        };
        tokio::time::timeout(timeout, settled).await.is_ok()
    }

    async fn ready_clients(&self) -> Vec<(String, Arc<McpClient>)> {
        self.state
            .read()
            .await
            .servers
            .values()
            .filter(|server| server.status == ServerStatus::Ready)
            .map(|server| (server.name.clone(), server.client.clone()))
            .collect()
    }

    /// Namespaced tools of every ready server.
    pub async fn all_tools(&self) -> Vec<ToolSpec> {
        let mut tools = Vec::new();
        for (server, client) in self.ready_clients().await {
            tools.extend(client.tools().await.into_iter().map(|tool| ToolSpec {
                name: namespaced_tool_name(&server, &tool.name),
                description: format!("[{server}] {}", tool.description),
                input_schema: tool.input_schema,
            }));
        }
        tools
    }

    /// Routes `<server>__<tool>` to the owning ready server.
    pub async fn call_tool(
        &self,
        ctx: &CancellationToken,
        full_name: &str,
        args_json: &str,
    ) -> Result<String, McpError> {
        let (server, tool) = parse_tool_name(full_name);
        if server.is_empty() || tool.is_empty() {
            return Err(McpError::InvalidToolName(full_name.to_string()));
        }

        let client = {
            let state = self.state.read().await;
            match state.servers.get(server) {
                Some(entry) if entry.status == ServerStatus::Ready => entry.client.clone(),
                Some(_) => return Err(McpError::NotRunning(server.to_string())),
                None if self.configs.contains_key(server) => {
                    return Err(McpError::NotRunning(server.to_string()))
                }
                None => return Err(McpError::UnknownServer(server.to_string())),
            }
        };
        client.call_tool(ctx, tool, args_json).await
    }

    /// Last-known tools per server from the cache file, without connecting.
    pub async fn cached_tools(&self) -> BTreeMap<String, Vec<ToolSpec>> {
        let Some(path) = self.tool_cache.clone() else {
            return BTreeMap::new();
        };
        tokio::task::spawn_blocking(move || ToolCache::load(&path).servers)
            .await
            .unwrap_or_default()
    }
}

fn publish(publisher: Option<&StatusPublisher>, update: StatusUpdate) {
    if let Some(publisher) = publisher {
        publisher.publish(update);
    }
}

/// Background half of `enable`.
struct ConnectTask {
    name: String,
    client: Arc<McpClient>,
    state: Arc<RwLock<ManagerState>>,
    publisher: Option<StatusPublisher>,
    tool_cache: Option<PathBuf>,
    cache_lock: Arc<Mutex<()>>,
}

impl ConnectTask {
    async fn run(self, ctx: &CancellationToken) {
        let outcome = self.client.start(ctx).await;
        let (status, error) = match &outcome {
            Ok(()) => (ServerStatus::Ready, None),
            Err(err) => (ServerStatus::Failed, Some(err.to_string())),
        };

        // Published under the lock so a later disable cannot overtake it.
        let current = {
            let mut state = self.state.write().await;
            match state.servers.get_mut(&self.name) {
                Some(entry) if Arc::ptr_eq(&entry.client, &self.client) => {
                    entry.status = status;
                    entry.error = error.clone();
                    publish(
                        self.publisher.as_ref(),
                        StatusUpdate::new(self.name.clone(), status, error.clone()),
                    );
                    true
                }
                _ => false,
            }
        };
        if !current {
            debug!(server_id = %self.name, "Discarding superseded MCP connection");
            self.client.stop().await;
            return;
        }

        match &error {
            Some(message) => warn!(server_id = %self.name, error = %message, "MCP server failed"),
            None => info!(server_id = %self.name, "MCP server ready"),
        }

        if status == ServerStatus::Ready {
            self.record_tools().await;
        }
    }

    async fn record_tools(&self) {
        let Some(path) = self.tool_cache.clone() else {
            return;
        };
        let tools = self.client.tools().await;
        let name = self.name.clone();
        let _guard = self.cache_lock.lock().await;
        let _ = tokio::task::spawn_blocking(move || ToolCache::record(&path, &name, tools)).await;
    }
}

#[cfg(test)]
mod tests;
