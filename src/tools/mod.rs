pub mod args;
mod core;
mod edit;
mod git_tools;
mod navigate;
mod session_tools;
pub mod paths;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::application::Application;
use crate::errors::{ToolError, ToolResult};
use crate::session::Session;

/// The closed set of parameter types a tool schema may use.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    Array,
}

#[derive(Serialize, Clone, Debug)]
pub struct ParamSpec {
    pub name: &'static str,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub required: bool,
    pub description: &'static str,
}

impl ParamSpec {
    pub const fn required(name: &'static str, param_type: ParamType, description: &'static str) -> Self {
        Self {
            name,
            param_type,
            required: true,
            description,
        }
    }

    pub const fn optional(name: &'static str, param_type: ParamType, description: &'static str) -> Self {
        Self {
            name,
            param_type,
            required: false,
            description,
        }
    }
}

/// Everything a handler gets: the application, the resolved session and the
/// validated arguments, plus the request's cancellation token.
pub struct ToolContext {
    pub app: Application,
    pub session: Session,
    pub args: Value,
    pub cancel: CancellationToken,
}

pub type Handler =
    Arc<dyn Fn(ToolContext) -> BoxFuture<'static, ToolResult<Value>> + Send + Sync>;

pub struct Tool {
    pub name: &'static str,
    pub description: &'static str,
    /// Grouping for listings only; dispatch ignores it
    pub category: &'static str,
    pub params: Vec<ParamSpec>,
    handler: Handler,
}

/// What `tools/list` and `GET /api/tools` expose per tool.
#[derive(Serialize, Clone, Debug)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// An inbound call, however it was framed.
#[derive(Deserialize, Clone, Debug)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Registers named operations with typed input schemas and routes calls to
/// their handlers.
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Tool>,
}

impl ToolRegistry {
    pub fn empty() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// The full tool surface of the server.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        self::core::register(&mut registry);
        self::navigate::register(&mut registry);
        self::edit::register(&mut registry);
        self::git_tools::register(&mut registry);
        self::session_tools::register(&mut registry);
        registry
    }

    pub fn register(
        &mut self,
        name: &'static str,
        description: &'static str,
        category: &'static str,
        params: Vec<ParamSpec>,
        handler: Handler,
    ) {
        let previous = self.tools.insert(
            name,
            Tool {
                name,
                description,
                category,
                params,
                handler,
            },
        );
        debug_assert!(previous.is_none(), "duplicate tool name {name}");
    }

    pub fn list(&self) -> Vec<ToolDescriptor> {
        self.tools
            .values()
            .map(|tool| ToolDescriptor {
                name: tool.name,
                description: tool.description,
                category: tool.category,
                input_schema: input_schema(&tool.params),
            })
            .collect()
    }

    pub fn categories(&self) -> Vec<&'static str> {
        let mut categories: Vec<&'static str> =
            self.tools.values().map(|tool| tool.category).collect();
        categories.sort();
        categories.dedup();
        categories
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Full request flow: resolve the session, validate arguments, run the
    /// handler under the operation timeout, and convert panics into
    /// structured errors when recovery is on. In multi-session mode (the
    /// HTTP/WS daemon) a `session_info` object is merged into the result;
    /// single-client stdio responses stay bare.
    pub async fn dispatch(
        &self,
        app: &Application,
        call: ToolCall,
        transport_session: Option<&str>,
        cancel: CancellationToken,
    ) -> ToolResult<Value> {
        let tool = self
            .tools
            .get(call.tool.as_str())
            .ok_or_else(|| ToolError::not_found(format!("unknown tool `{}`", call.tool)))?;

        // session resolution: explicit argument, then transport metadata,
        // then the shared anonymous session
        let session_id = call
            .session_id
            .as_deref()
            .or(transport_session)
            .map(str::to_owned);
        let session = match session_id.as_deref() {
            Some(id) => app.sessions.get_or_create_session(Some(id), id, None),
            None => app.sessions.anonymous_session(),
        };

        let args = if call.arguments.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            call.arguments
        };
        validate_args(&tool.params, &args)?;

        let ctx = ToolContext {
            app: app.clone(),
            session: session.clone(),
            args,
            cancel: cancel.clone(),
        };

        let timeout = Duration::from_secs(app.config.operation_timeout_secs);
        let handler = Arc::clone(&tool.handler);
        let tool_name = call.tool.clone();
        let invocation = async move {
            if ctx.app.config.recovery {
                // panics become Internal errors; the handler is never re-run
                match std::panic::AssertUnwindSafe(handler(ctx)).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => {
                        let message = panic
                            .downcast_ref::<&str>()
                            .map(|s| (*s).to_owned())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "handler panicked".to_owned());
                        error!(tool = %tool_name, %message, "handler panicked");
                        Err(ToolError::internal(format!("handler panicked: {message}")))
                    }
                }
            } else {
                handler(ctx).await
            }
        };

        let mut result = tokio::select! {
            outcome = tokio::time::timeout(timeout, invocation) => match outcome {
                Ok(result) => result?,
                Err(_) => return Err(ToolError::timeout(format!(
                    "tool `{}` exceeded the {}s operation budget",
                    call.tool,
                    timeout.as_secs()
                ))),
            },
            _ = cancel.cancelled() => {
                return Err(ToolError::cancelled(format!("tool `{}` cancelled", call.tool)))
            }
        };

        // every successful call that resolved to a session touches it
        app.sessions.touch(&session.id);
        if app.multi_session {
            if let Ok(refreshed) = app.sessions.get_session(&session.id) {
                if let Value::Object(map) = &mut result {
                    map.insert(
                        "session_info".to_owned(),
                        serde_json::to_value(refreshed.info()).unwrap_or(Value::Null),
                    );
                }
            }
        }
        debug!(tool = %call.tool, session = %session.id, "tool call succeeded");
        Ok(result)
    }
}

fn input_schema(params: &[ParamSpec]) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for param in params {
        properties.insert(
            param.name.to_owned(),
            serde_json::json!({
                "type": match param.param_type {
                    ParamType::String => "string",
                    ParamType::Number => "number",
                    ParamType::Boolean => "boolean",
                    ParamType::Array => "array",
                },
                "description": param.description,
            }),
        );
        if param.required {
            required.push(Value::String(param.name.to_owned()));
        }
    }
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn validate_args(params: &[ParamSpec], args: &Value) -> ToolResult<()> {
    let object = args.as_object().ok_or_else(|| {
        ToolError::invalid_argument("arguments must be a JSON object")
    })?;
    for param in params {
        match object.get(param.name) {
            None | Some(Value::Null) => {
                if param.required {
                    return Err(ToolError::invalid_argument(format!(
                        "missing required parameter `{}`",
                        param.name
                    )));
                }
            }
            Some(value) => {
                let ok = match param.param_type {
                    ParamType::String => value.is_string(),
                    ParamType::Number => value.is_number(),
                    ParamType::Boolean => value.is_boolean(),
                    ParamType::Array => value.is_array(),
                };
                if !ok {
                    return Err(ToolError::invalid_argument(format!(
                        "parameter `{}` has the wrong type, expected {:?}",
                        param.name, param.param_type
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_handler() -> Handler {
        Arc::new(|ctx: ToolContext| {
            async move { Ok(serde_json::json!({"echo": ctx.args})) }.boxed()
        })
    }

    #[test]
    fn registry_lists_tools_with_schemas() {
        let mut registry = ToolRegistry::empty();
        registry.register(
            "echo",
            "echoes",
            "utility",
            vec![
                ParamSpec::required("text", ParamType::String, "what to echo"),
                ParamSpec::optional("upper", ParamType::Boolean, "uppercase it"),
            ],
            echo_handler(),
        );
        let listed = registry.list();
        assert_eq!(listed.len(), 1);
        let schema = &listed[0].input_schema;
        assert_eq!(schema["required"][0], "text");
        assert_eq!(schema["properties"]["upper"]["type"], "boolean");
    }

    #[test]
    fn standard_registry_has_the_full_surface() {
        let registry = ToolRegistry::standard();
        for name in [
            "index_repository",
            "search_code",
            "get_metadata",
            "list_repositories",
            "get_index_stats",
            "find_files",
            "find_symbols",
            "get_file_content",
            "list_directory",
            "delete_lines",
            "insert_at_line",
            "replace_lines",
            "get_file_snippet",
            "find_references",
            "refresh_index",
            "git_blame",
            "list_sessions",
            "create_session",
            "get_session_info",
        ] {
            assert!(
                registry.list().iter().any(|tool| tool.name == name),
                "missing tool {name}"
            );
        }
        assert!(registry.categories().contains(&"core"));
    }

    #[test]
    fn validation_catches_missing_and_mistyped() {
        let params = vec![
            ParamSpec::required("path", ParamType::String, ""),
            ParamSpec::optional("count", ParamType::Number, ""),
        ];
        assert!(validate_args(&params, &serde_json::json!({"path": "x"})).is_ok());
        assert!(validate_args(&params, &serde_json::json!({})).is_err());
        assert!(
            validate_args(&params, &serde_json::json!({"path": "x", "count": "two"})).is_err()
        );
    }
}
