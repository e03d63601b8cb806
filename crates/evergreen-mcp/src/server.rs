//! MCP server implementation.
//!
//! The server handles the MCP protocol lifecycle:
//! 1. Initialize - exchange capabilities
//! 2. Handle tool calls and resource reads against the Evergreen API
//! 3. Shutdown on EOF

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::context::EvergreenContext;
use crate::handlers::ToolHandler;
use crate::protocol::{
    InitializeParams, InitializeResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    ReadResourceParams, ReadResourceResult, RequestId, ResourcesListResult, ToolCallParams,
    ToolsListResult,
};
use crate::transport::{IncomingMessage, StdioTransport};

pub const SERVER_NAME: &str = "evergreen-mcp-server";

/// MCP server for Evergreen.
pub struct McpServer {
    handler: ToolHandler,
    initialized: bool,
}

impl McpServer {
    pub fn new(context: EvergreenContext) -> Self {
        Self {
            handler: ToolHandler::new(context),
            initialized: false,
        }
    }

    pub fn context(&self) -> &EvergreenContext {
        self.handler.context()
    }

    /// Serve MCP over stdin/stdout until EOF.
    pub async fn run(&mut self) -> evergreen_core::Result<()> {
        self.run_with(StdioTransport::stdio()).await
    }

    /// Serve MCP over `transport` until EOF or a write failure.
    pub async fn run_with<R, W>(
        &mut self,
        mut transport: StdioTransport<R, W>,
    ) -> evergreen_core::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!(user = %self.context().user_id, "Starting MCP server");

        loop {
            match transport.read_message().await {
                Ok(Some(msg)) => {
                    if let Some(resp) = self.handle_message(msg).await {
                        if let Err(e) = transport.write_response(&resp).await {
                            tracing::error!("Failed to write response: {}", e);
                            return Err(evergreen_core::Error::Other(e.into()));
                        }
                    }
                }
                Ok(None) => {
                    tracing::info!("EOF received, shutting down");
                    break;
                }
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    let error_resp = JsonRpcResponse::error(
                        RequestId::Null,
                        JsonRpcError::parse_error(e),
                    );
                    if let Err(e) = transport.write_response(&error_resp).await {
                        tracing::error!("Failed to write response: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Transport error: {}", e);
                    return Err(evergreen_core::Error::Other(e.into()));
                }
            }
        }

        tracing::info!("MCP server stopped");
        Ok(())
    }

    async fn handle_message(&mut self, msg: IncomingMessage) -> Option<JsonRpcResponse> {
        match msg {
            IncomingMessage::Request(req) => Some(self.handle_request(req).await),
            IncomingMessage::Notification(notif) => {
                self.handle_notification(&notif.method);
                None
            }
        }
    }

    /// Handle a JSON-RPC request.
    pub async fn handle_request(&mut self, req: JsonRpcRequest) -> JsonRpcResponse {
        tracing::debug!("Handling request: {} (id: {:?})", req.method, req.id);

        match req.method.as_str() {
            "initialize" => self.handle_initialize(req.id, req.params),
            "tools/list" => self.handle_tools_list(req.id),
            "tools/call" => self.handle_tools_call(req.id, req.params).await,
            "resources/list" => self.handle_resources_list(req.id),
            "resources/read" => self.handle_resources_read(req.id, req.params).await,
            "ping" => JsonRpcResponse::success(req.id, serde_json::json!({})),
            method => {
                tracing::warn!("Unknown method: {}", method);
                JsonRpcResponse::error(req.id, JsonRpcError::method_not_found(method))
            }
        }
    }

    fn handle_notification(&mut self, method: &str) {
        match method {
            "notifications/initialized" | "initialized" => {
                tracing::info!("Client initialized");
            }
            "notifications/cancelled" => {
                tracing::debug!("Request cancelled by client");
            }
            _ => {
                tracing::debug!("Ignoring notification: {}", method);
            }
        }
    }

    fn handle_initialize(&mut self, id: RequestId, params: Option<Value>) -> JsonRpcResponse {
        if self.initialized {
            return JsonRpcResponse::error(
                id,
                JsonRpcError::invalid_request("Server already initialized"),
            );
        }

        if let Some(params) = params {
            match serde_json::from_value::<InitializeParams>(params) {
                Ok(init_params) => {
                    let client = init_params
                        .client_info
                        .map(|info| format!("{} v{}", info.name, info.version))
                        .unwrap_or_else(|| "unknown client".to_string());
                    tracing::info!(
                        client = %client,
                        protocol = %init_params.protocol_version,
                        "Client initializing"
                    );
                }
                Err(e) => {
                    tracing::warn!("Failed to parse initialize params: {}", e);
                }
            }
        }

        self.initialized = true;

        respond(id, &InitializeResult::new(SERVER_NAME, env!("CARGO_PKG_VERSION")))
    }

    fn handle_tools_list(&self, id: RequestId) -> JsonRpcResponse {
        let result = ToolsListResult {
            tools: self.handler.available_tools(),
        };
        respond(id, &result)
    }

    async fn handle_tools_call(&self, id: RequestId, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolCallParams = match parse_params(params) {
            Ok(params) => params,
            Err(error) => return JsonRpcResponse::error(id, error),
        };

        tracing::info!("Calling tool: {}", params.name);

        let result = self.handler.execute(&params.name, params.arguments).await;
        respond(id, &result)
    }

    fn handle_resources_list(&self, id: RequestId) -> JsonRpcResponse {
        let result = ResourcesListResult {
            resources: self.handler.available_resources(),
        };
        respond(id, &result)
    }

    async fn handle_resources_read(&self, id: RequestId, params: Option<Value>) -> JsonRpcResponse {
        let params: ReadResourceParams = match parse_params(params) {
            Ok(params) => params,
            Err(error) => return JsonRpcResponse::error(id, error),
        };

        match self.handler.read_resource(&params.uri).await {
            Ok(text) => respond(id, &ReadResourceResult::json(params.uri, text)),
            Err(evergreen_core::Error::NotFound(message)) => {
                JsonRpcResponse::error(id, JsonRpcError::invalid_params(message))
            }
            Err(e) => {
                tracing::error!(uri = %params.uri, error = %e, "Failed to read resource");
                JsonRpcResponse::error(id, JsonRpcError::internal_error(e))
            }
        }
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(
    params: Option<Value>,
) -> Result<T, JsonRpcError> {
    let params = params.ok_or_else(|| JsonRpcError::invalid_params("Missing params"))?;
    serde_json::from_value(params).map_err(JsonRpcError::invalid_params)
}

fn respond<T: Serialize>(id: RequestId, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(id, JsonRpcError::internal_error(e)),
    }
}
