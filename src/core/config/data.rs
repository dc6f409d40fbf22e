use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use crate::mcp::transport::McpTransportKind;
use crate::mcp::TOOL_NAME_DELIMITER;

/// Per-server policy for inbound sampling (`sampling/createMessage`) requests.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct SamplingConfig {
    /// Unset means enabled; only an explicit `false` turns sampling off.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub auto_approve: bool,
    /// Upper bound applied to the `maxTokens` a server asks for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    /// Agents allowed to sample through this server. Exposed to callers,
    /// not enforced by the sampling handler.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_agents: Vec<String>,
}

impl SamplingConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled != Some(false)
    }

    /// The configured cap, ignoring non-positive values.
    pub fn token_cap(&self) -> Option<i64> {
        self.max_tokens.filter(|cap| *cap > 0)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ServerConfig {
    /// `stdio` (default) or `http`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<SamplingConfig>,
    /// Kept out of `enable_all`; can still be enabled by name.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

impl ServerConfig {
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: Some(command.into()),
            args,
            ..Self::default()
        }
    }

    pub fn http(url: impl Into<String>) -> Self {
        Self {
            transport: Some("http".to_string()),
            url: Some(url.into()),
            ..Self::default()
        }
    }

    /// Checks that exactly one of `command`/`url` is set and that it agrees
    /// with the transport discriminator.
    pub fn validate(&self) -> Result<McpTransportKind, String> {
        let kind = McpTransportKind::from_config(self)?;
        let has_command = self
            .command
            .as_deref()
            .is_some_and(|command| !command.trim().is_empty());
        let has_url = self.url.as_deref().is_some_and(|url| !url.trim().is_empty());

        match (kind, has_command, has_url) {
            (_, true, true) => Err("command and url are mutually exclusive.".to_string()),
            (McpTransportKind::Stdio, false, _) => {
                Err("MCP command is required for stdio transport.".to_string())
            }
            (McpTransportKind::StreamableHttp, _, false) => {
                Err("MCP url is required for HTTP transport.".to_string())
            }
            _ => Ok(kind),
        }
    }

    pub fn sampling_config(&self) -> SamplingConfig {
        self.sampling.clone().unwrap_or_default()
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq, Eq)]
pub struct McpConfig {
    #[serde(rename = "mcpServers", alias = "servers", default)]
    pub servers: BTreeMap<String, ServerConfig>,
}

impl McpConfig {
    pub fn server(&self, name: &str) -> Option<&ServerConfig> {
        self.servers.get(name)
    }

    pub fn enabled_server_names(&self) -> Vec<String> {
        self.servers
            .iter()
            .filter(|(_, server)| !server.disabled)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Validates every server, reporting the first failure with its name.
    pub fn validate(&self) -> Result<(), (String, String)> {
        for (name, server) in &self.servers {
            validate_server_name(name).map_err(|err| (name.clone(), err))?;
            server.validate().map_err(|err| (name.clone(), err))?;
        }
        Ok(())
    }
}

/// Server names prefix their tools, so they must be non-empty and free of
/// the tool name delimiter.
pub fn validate_server_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Server name must not be empty.".to_string());
    }
    if name.contains(TOOL_NAME_DELIMITER) {
        return Err(format!(
            "Server name must not contain \"{TOOL_NAME_DELIMITER}\"."
        ));
    }
    Ok(())
}

/// Get a user-friendly display string for a path, using `~` for the home
/// directory on Unix-like systems.
pub fn path_display<P: AsRef<Path>>(path: P) -> String {
    let path = path.as_ref();

    #[cfg(unix)]
    {
        if let Some(home) = std::env::var_os("HOME") {
            let home_path = PathBuf::from(home);
            if let Ok(relative) = path.strip_prefix(&home_path) {
                return format!("~/{}", relative.display());
            }
        }
    }

    path.display().to_string()
}
