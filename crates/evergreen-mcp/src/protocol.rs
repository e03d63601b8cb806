//! MCP wire types on top of JSON-RPC 2.0.
//!
//! Only what the Evergreen server speaks is modelled: the lifecycle
//! handshake, tools, and read-only resources.

use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// MCP revision this server implements.
pub const MCP_VERSION: &str = "2024-11-05";

/// MIME type of every resource and tool payload.
pub const JSON_MIME_TYPE: &str = "application/json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// A message without an `id`; never answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Request id as sent by the client. `Null` is used when answering a line
/// that could not be parsed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
    Null,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    fn with_code(code: i32, label: &str, detail: impl Display) -> Self {
        Self {
            code,
            message: format!("{}: {}", label, detail),
            data: None,
        }
    }

    pub fn parse_error(detail: impl Display) -> Self {
        Self::with_code(Self::PARSE_ERROR, "Parse error", detail)
    }

    pub fn invalid_request(detail: impl Display) -> Self {
        Self::with_code(Self::INVALID_REQUEST, "Invalid request", detail)
    }

    pub fn method_not_found(method: impl Display) -> Self {
        Self::with_code(Self::METHOD_NOT_FOUND, "Method not found", method)
    }

    pub fn invalid_params(detail: impl Display) -> Self {
        Self::with_code(Self::INVALID_PARAMS, "Invalid params", detail)
    }

    pub fn internal_error(detail: impl Display) -> Self {
        Self::with_code(Self::INTERNAL_ERROR, "Internal error", detail)
    }
}

impl JsonRpcResponse {
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: RequestId, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

// ----------------------------------------------------------------------------
// Lifecycle
// ----------------------------------------------------------------------------

/// `initialize` params. Only logged, so everything but the protocol
/// version is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default)]
    pub client_info: Option<PeerInfo>,
}

/// Name and version of either end of the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: PeerInfo,
}

impl InitializeResult {
    pub fn new(server_name: &str, server_version: &str) -> Self {
        Self {
            protocol_version: MCP_VERSION.to_string(),
            capabilities: ServerCapabilities::tools_and_resources(),
            server_info: PeerInfo {
                name: server_name.to_string(),
                version: server_version.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,
}

impl ServerCapabilities {
    /// Static tool list and static, unsubscribable resources.
    pub fn tools_and_resources() -> Self {
        Self {
            tools: Some(ToolsCapability::default()),
            resources: Some(ResourcesCapability::default()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    #[serde(default)]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesCapability {
    #[serde(default)]
    pub subscribe: bool,
    #[serde(default)]
    pub list_changed: bool,
}

// ----------------------------------------------------------------------------
// Tools
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsListResult {
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// `tools/call` result. Tool failures set `is_error` instead of becoming
/// JSON-RPC errors, so the assistant can read them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub content: Vec<ToolResultContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolResultContent {
    Text { text: String },
}

impl ToolCallResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolResultContent::Text { text: text.into() }],
            is_error: None,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            is_error: Some(true),
            ..Self::text(text)
        }
    }
}

// ----------------------------------------------------------------------------
// Resources
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    pub uri: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl ResourceDefinition {
    /// A JSON resource.
    pub fn json(uri: &str, name: &str, description: &str) -> Self {
        Self {
            uri: uri.to_string(),
            name: name.to_string(),
            description: Some(description.to_string()),
            mime_type: Some(JSON_MIME_TYPE.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesListResult {
    pub resources: Vec<ResourceDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceParams {
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceResult {
    pub contents: Vec<ResourceContents>,
}

impl ReadResourceResult {
    /// Single JSON document served under `uri`.
    pub fn json(uri: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            contents: vec![ResourceContents {
                uri: uri.into(),
                mime_type: Some(JSON_MIME_TYPE.to_string()),
                text: text.into(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_without_params() {
        let req: JsonRpcRequest =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":"a-1","method":"ping"}"#).unwrap();
        assert_eq!(req.id, RequestId::String("a-1".into()));
        assert!(req.params.is_none());

        let back = serde_json::to_value(&req).unwrap();
        assert_eq!(back, json!({ "jsonrpc": "2.0", "id": "a-1", "method": "ping" }));
    }

    #[test]
    fn test_error_response_omits_result() {
        let resp = JsonRpcResponse::error(RequestId::Null, JsonRpcError::parse_error("eof"));
        let json = serde_json::to_value(&resp).unwrap();

        assert_eq!(json["id"], Value::Null);
        assert_eq!(json["error"]["code"], JsonRpcError::PARSE_ERROR);
        assert_eq!(json["error"]["message"], "Parse error: eof");
        assert!(json.get("result").is_none());
        assert!(json["error"].get("data").is_none());
    }

    #[test]
    fn test_error_codes() {
        let cases = [
            (JsonRpcError::invalid_request("x"), JsonRpcError::INVALID_REQUEST),
            (JsonRpcError::method_not_found("tools/frob"), JsonRpcError::METHOD_NOT_FOUND),
            (JsonRpcError::invalid_params("missing uri"), JsonRpcError::INVALID_PARAMS),
            (JsonRpcError::internal_error("boom"), JsonRpcError::INTERNAL_ERROR),
        ];
        for (err, code) in cases {
            assert_eq!(err.code, code, "{}", err.message);
        }
        assert_eq!(
            JsonRpcError::method_not_found("tools/frob").message,
            "Method not found: tools/frob"
        );
    }

    #[test]
    fn test_initialize_params_are_lenient() {
        let params: InitializeParams =
            serde_json::from_value(json!({ "protocolVersion": "2024-11-05" })).unwrap();
        assert!(params.client_info.is_none());

        let params: InitializeParams = serde_json::from_value(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": { "roots": { "listChanged": true } },
            "clientInfo": { "name": "claude", "version": "1.0" }
        }))
        .unwrap();
        assert_eq!(params.client_info.unwrap().name, "claude");
    }

    #[test]
    fn test_initialize_result_shape() {
        let json = serde_json::to_value(InitializeResult::new("evergreen-mcp-server", "0.1.0"))
            .unwrap();
        assert_eq!(json["protocolVersion"], MCP_VERSION);
        assert_eq!(json["serverInfo"]["name"], "evergreen-mcp-server");
        assert_eq!(json["capabilities"]["tools"]["listChanged"], false);
        assert_eq!(json["capabilities"]["resources"]["subscribe"], false);
    }

    #[test]
    fn test_tool_results() {
        let ok = serde_json::to_value(ToolCallResult::text("{}")).unwrap();
        assert_eq!(ok, json!({ "content": [{ "type": "text", "text": "{}" }] }));

        let failed = serde_json::to_value(ToolCallResult::error("nope")).unwrap();
        assert_eq!(failed["isError"], true);
        assert_eq!(failed["content"][0]["text"], "nope");
    }

    #[test]
    fn test_resource_serialization() {
        let def = serde_json::to_value(ResourceDefinition::json(
            "evergreen://projects",
            "projects",
            "All projects",
        ))
        .unwrap();
        assert_eq!(def["mimeType"], JSON_MIME_TYPE);

        let bare = ResourceDefinition {
            mime_type: None,
            description: None,
            ..ResourceDefinition::json("evergreen://x", "x", "")
        };
        let json = serde_json::to_string(&bare).unwrap();
        assert!(!json.contains("description"));
        assert!(!json.contains("mimeType"));

        let read = serde_json::to_value(ReadResourceResult::json("evergreen://projects", "[]"))
            .unwrap();
        assert_eq!(read["contents"][0]["uri"], "evergreen://projects");
        assert_eq!(read["contents"][0]["mimeType"], JSON_MIME_TYPE);
        assert_eq!(read["contents"][0]["text"], "[]");
    }

    #[test]
    fn test_request_id_forms() {
        for (raw, id) in [
            ("42", RequestId::Number(42)),
            ("\"abc\"", RequestId::String("abc".into())),
            ("null", RequestId::Null),
        ] {
            assert_eq!(serde_json::from_str::<RequestId>(raw).unwrap(), id);
            assert_eq!(serde_json::to_string(&id).unwrap(), raw);
        }
    }
}
