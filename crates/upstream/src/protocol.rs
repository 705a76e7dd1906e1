//! JSON-RPC 2.0 message types for the MCP handshake and tool/resource/prompt
//! operations, plus the legacy `toolResult` response coercion (§4.E).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        JsonRpcRequest { jsonrpc: "2.0", id, method: method.into(), params }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        JsonRpcNotification { jsonrpc: "2.0", method: method.into(), params }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JSON-RPC error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for JsonRpcError {}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: Value,
    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,
}

pub fn initialize_params() -> InitializeParams {
    InitializeParams {
        protocol_version: MCP_PROTOCOL_VERSION.to_string(),
        capabilities: serde_json::json!({}),
        client_info: ClientInfo { name: "mcproxy".to_string(), version: env!("CARGO_PKG_VERSION").to_string() },
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<Value>,
    #[serde(default)]
    pub resources: Option<Value>,
    #[serde(default)]
    pub prompts: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(default, rename = "protocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolDef {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_input_schema", rename = "inputSchema")]
    pub input_schema: Value,
}

fn default_input_schema() -> Value {
    serde_json::json!({"type": "object", "properties": {}})
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<McpToolDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResourceDef {
    pub uri: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "mimeType")]
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourcesListResult {
    #[serde(default)]
    pub resources: Vec<McpResourceDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpPromptDef {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptsListResult {
    #[serde(default)]
    pub prompts: Vec<McpPromptDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallContent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ToolCallContent {
    pub fn text(text: impl Into<String>) -> Self {
        ToolCallContent { kind: "text".to_string(), text: Some(text.into()), extra: Default::default() }
    }

    pub fn is_text(&self) -> bool {
        self.kind == "text"
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ToolCallContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

/// Converts a value to its JS-flavored "default string form": arrays join
/// elements with `,`, objects collapse to `[object Object]`, primitives use
/// their natural textual form. Mirrors the original's JS `String(x)`
/// coercion, which callTool responses predating the `content` field relied
/// on implicitly.
pub fn legacy_stringify(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(legacy_stringify).collect::<Vec<_>>().join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

/// Parses a raw `tools/call` result, coercing the legacy `{toolResult: ...}`
/// shape (from upstreams predating the `content` field) into the standard
/// `{content: [...]}` shape.
pub fn parse_tool_call_result(raw: Value) -> ToolCallResult {
    if raw.get("content").is_some() {
        return serde_json::from_value(raw).unwrap_or_default();
    }
    if let Some(tool_result) = raw.get("toolResult") {
        return ToolCallResult {
            content: vec![ToolCallContent::text(legacy_stringify(tool_result))],
            is_error: false,
        };
    }
    serde_json::from_value(raw).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_request_serialization() {
        let req = JsonRpcRequest::new(1, "tools/list", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(!json.contains("params"));
    }

    #[test]
    fn response_with_error_propagates() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-1,"message":"boom"}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(raw).unwrap();
        assert!(resp.is_error());
        assert!(resp.into_result().is_err());
    }

    #[test]
    fn legacy_tool_result_coercion() {
        let raw = serde_json::json!({"toolResult": ["a", "b", 3]});
        let result = parse_tool_call_result(raw);
        assert_eq!(result.content.len(), 1);
        assert_eq!(result.content[0].text.as_deref(), Some("a,b,3"));
    }

    #[test]
    fn legacy_tool_result_object_coercion() {
        let raw = serde_json::json!({"toolResult": {"a": 1}});
        let result = parse_tool_call_result(raw);
        assert_eq!(result.content[0].text.as_deref(), Some("[object Object]"));
    }

    #[test]
    fn content_shape_passes_through() {
        let raw = serde_json::json!({"content": [{"type": "text", "text": "hi"}], "isError": false});
        let result = parse_tool_call_result(raw);
        assert_eq!(result.content[0].text.as_deref(), Some("hi"));
        assert!(!result.is_error);
    }

    #[test]
    fn tool_def_defaults_input_schema() {
        let raw = serde_json::json!({"name": "x"});
        let tool: McpToolDef = serde_json::from_value(raw).unwrap();
        assert_eq!(tool.input_schema["type"], "object");
    }
}
