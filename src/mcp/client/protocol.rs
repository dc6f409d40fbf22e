use rust_mcp_schema::schema_utils::ServerMessage;
use rust_mcp_schema::{
    CallToolResult, ClientCapabilities, ClientSampling, ContentBlock, Implementation,
    InitializeRequestParams, InitializeResult, ListToolsResult, PaginatedRequestParams, RpcError,
    Tool, LATEST_PROTOCOL_VERSION,
};
use serde_json::{Map, Value};

use crate::core::tools::{empty_object_schema, ToolSpec};
use crate::mcp::MCP_CLIENT_NAME;

/// Most tools kept from a single server's paginated listing.
pub(crate) const MCP_MAX_TOOL_LIST: usize = 100;

pub(crate) fn client_details() -> InitializeRequestParams {
    let capabilities = ClientCapabilities {
        sampling: Some(ClientSampling::default()),
        ..ClientCapabilities::default()
    };
    InitializeRequestParams {
        capabilities,
        client_info: Implementation {
            name: MCP_CLIENT_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("mcpmux".to_string()),
            description: Some("MCP tool-server runtime".to_string()),
            icons: Vec::new(),
            website_url: None,
        },
        meta: None,
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
    }
}

pub(crate) fn parse_initialize_result(message: ServerMessage) -> Result<InitializeResult, String> {
    let result: InitializeResult = parse_response(message)?;
    if result.protocol_version.trim().is_empty() {
        return Err("Unexpected initialize response.".to_string());
    }
    Ok(result)
}

pub(crate) fn parse_list_tools(message: ServerMessage) -> Result<ListToolsResult, String> {
    parse_response(message)
}

pub(crate) fn parse_call_tool(message: ServerMessage) -> Result<CallToolResult, String> {
    parse_response(message)
}

fn parse_response<T: serde::de::DeserializeOwned>(message: ServerMessage) -> Result<T, String> {
    let value = match message {
        ServerMessage::Response(response) => {
            serde_json::to_value(&response.result).map_err(|err| err.to_string())?
        }
        ServerMessage::Error(error) => return Err(format_rpc_error(&error.error)),
        other => return Err(format!("Unexpected MCP server message: {other:?}")),
    };
    serde_json::from_value::<T>(value).map_err(|err| err.to_string())
}

pub(crate) fn format_rpc_error(error: &RpcError) -> String {
    let mut output = format!("MCP error {}: {}", error.code, error.message);
    let details = error.data.as_ref().and_then(|data| {
        data.get("details")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| data.as_str().map(str::to_string))
            .or_else(|| serde_json::to_string(data).ok())
    });
    if let Some(details) = details.filter(|details| !details.is_empty()) {
        output.push('\n');
        output.push_str(&details);
    }
    output
}

pub(crate) fn paginated_params(cursor: Option<String>) -> Option<PaginatedRequestParams> {
    cursor.map(|cursor| PaginatedRequestParams {
        cursor: Some(cursor),
        meta: None,
    })
}

pub(crate) fn tool_spec(tool: &Tool) -> ToolSpec {
    ToolSpec {
        name: tool.name.clone(),
        description: tool.description.clone().unwrap_or_default(),
        input_schema: serde_json::to_value(&tool.input_schema)
            .unwrap_or_else(|_| empty_object_schema()),
    }
}

/// Parses tool arguments. Blank input is an empty argument map.
pub(crate) fn parse_tool_arguments(raw: &str) -> Result<Map<String, Value>, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Map::new());
    }

    let value: Value = serde_json::from_str(trimmed).map_err(|err| err.to_string())?;
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        _ => Err("Tool arguments must be a JSON object.".to_string()),
    }
}

/// Joins the text blocks of a tool result. An error result yields `Err` with
/// the tool's own text.
pub(crate) fn tool_output(result: &CallToolResult) -> Result<String, String> {
    let text = result
        .content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::TextContent(text) => Some(text.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");

    if result.is_error.unwrap_or(false) {
        if text.is_empty() {
            return Err("Tool reported an error without details.".to_string());
        }
        return Err(text);
    }
    Ok(text)
}
