use std::error::Error as StdError;
use std::fmt;

/// Errors surfaced by MCP clients, the manager and the sampling handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McpError {
    /// A namespaced tool name without a `<server>__` prefix.
    InvalidToolName(String),
    UnknownServer(String),
    /// The server exists but is not in the ready state.
    NotRunning(String),
    InvalidConfig { server: String, message: String },
    /// Tool arguments were not a JSON object.
    InvalidArguments(String),
    Transport(String),
    Protocol(String),
    /// The tool ran and reported error content.
    ToolFailed(String),
    SamplingDisabled(String),
    SamplingDenied(String),
    /// Displayed unchanged so servers see the provider's own message.
    Provider(String),
    Interrupted,
}

impl fmt::Display for McpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            McpError::InvalidToolName(name) => write!(
                f,
                "Invalid MCP tool name '{name}': expected <server>__<tool>"
            ),
            McpError::UnknownServer(name) => write!(f, "Unknown MCP server: {name}"),
            McpError::NotRunning(name) => write!(f, "MCP server '{name}' is not running"),
            McpError::InvalidConfig { server, message } => {
                write!(f, "Invalid MCP server '{server}': {message}")
            }
            McpError::InvalidArguments(message) => {
                write!(f, "Invalid tool arguments: {message}")
            }
            McpError::Transport(message) => write!(f, "MCP transport error: {message}"),
            McpError::Protocol(message) => write!(f, "MCP protocol error: {message}"),
            McpError::ToolFailed(message) => write!(f, "Tool failed: {message}"),
            McpError::SamplingDisabled(server) => {
                write!(f, "Sampling disabled for server {server}")
            }
            McpError::SamplingDenied(server) => {
                write!(f, "Sampling request from server {server} was denied")
            }
            McpError::Provider(message) => f.write_str(message),
            McpError::Interrupted => write!(f, "MCP operation interrupted."),
        }
    }
}

impl StdError for McpError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_display_unchanged() {
        let err = McpError::Provider("API Error: rate limited".to_string());
        assert_eq!(err.to_string(), "API Error: rate limited");
    }

    #[test]
    fn sampling_disabled_names_the_server() {
        let err = McpError::SamplingDisabled("fs".to_string());
        assert!(err.to_string().contains("fs"));
    }
}
