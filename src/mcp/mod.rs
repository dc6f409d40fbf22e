pub mod client;
pub mod error;
pub mod events;
pub mod manager;
pub mod permissions;
pub mod registry;
pub mod tool_cache;
pub mod transport;

pub use error::McpError;

/// Separator between the server name and the tool name in namespaced tools.
pub const TOOL_NAME_DELIMITER: &str = "__";
pub const MCP_CLIENT_NAME: &str = "mcpmux";

/// Splits a namespaced tool name on the first delimiter.
///
/// A name without a delimiter yields an empty server name.
///
/// ```
/// use mcpmux::mcp::parse_tool_name;
///
/// assert_eq!(parse_tool_name("fs__read_file"), ("fs", "read_file"));
/// assert_eq!(parse_tool_name("no_delimiter"), ("", "no_delimiter"));
/// ```
pub fn parse_tool_name(full_name: &str) -> (&str, &str) {
    full_name
        .split_once(TOOL_NAME_DELIMITER)
        .unwrap_or(("", full_name))
}

pub fn namespaced_tool_name(server: &str, tool: &str) -> String {
    format!("{server}{TOOL_NAME_DELIMITER}{tool}")
}
