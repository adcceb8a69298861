use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::application::Application;
use crate::errors::ToolError;
use crate::tools::ToolCall;

pub const SERVER_NAME: &str = "codescout";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// One inbound call on the framed transports (stdio, websocket).
#[derive(Deserialize, Debug)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Value,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Serialize, Debug)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

#[derive(Serialize, Debug)]
pub struct RpcResponse {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn from_tool_error(id: Value, err: &ToolError) -> Self {
        Self::err(id, err.kind.rpc_code(), err.message.clone())
    }

    /// Response to a line that did not parse as a request at all.
    pub fn parse_error() -> Self {
        Self::err(Value::Null, -32700, "parse error: invalid JSON")
    }
}

/// Capability advertisement returned by `initialize`.
pub fn server_info() -> Value {
    json!({
        "serverInfo": {
            "name": SERVER_NAME,
            "version": SERVER_VERSION,
        },
        "capabilities": {
            "tools": {},
        },
    })
}

/// Shared method router for the framed transports. HTTP has its own routes
/// but funnels `POST /api/call` through the same dispatcher.
pub async fn handle_request(
    app: &Application,
    request: RpcRequest,
    transport_session: Option<&str>,
    cancel: CancellationToken,
) -> RpcResponse {
    debug!(method = %request.method, "rpc request");
    match request.method.as_str() {
        "initialize" => RpcResponse::ok(request.id, server_info()),
        "tools/list" => {
            let tools = app.tools.list();
            RpcResponse::ok(
                request.id,
                json!({
                    "tools": tools,
                    "total": app.tools.len(),
                    "categories": app.tools.categories(),
                }),
            )
        }
        "tools/call" => {
            let call = match parse_call(&request.params) {
                Ok(call) => call,
                Err(err) => return RpcResponse::from_tool_error(request.id, &err),
            };
            match app.tools.dispatch(app, call, transport_session, cancel).await {
                Ok(result) => RpcResponse::ok(request.id, result),
                Err(err) => RpcResponse::from_tool_error(request.id, &err),
            }
        }
        "ping" => RpcResponse::ok(request.id, json!({})),
        other => RpcResponse::err(request.id, -32601, format!("method not found: {other}")),
    }
}

/// `tools/call` params accept both `tool` and the MCP-style `name` key.
fn parse_call(params: &Value) -> Result<ToolCall, ToolError> {
    let tool = params
        .get("tool")
        .or_else(|| params.get("name"))
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::invalid_argument("tools/call requires a `tool` name"))?;
    Ok(ToolCall {
        tool: tool.to_owned(),
        arguments: params.get("arguments").cloned().unwrap_or(Value::Null),
        session_id: params
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_owned),
    })
}
