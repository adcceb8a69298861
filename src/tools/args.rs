use serde_json::Value;

use crate::errors::{ToolError, ToolResult};

/// Typed accessors over a tool call's `arguments` object. Validation errors
/// are structured `InvalidArgument` failures naming the parameter.
pub fn require_str<'a>(args: &'a Value, name: &str) -> ToolResult<&'a str> {
    match args.get(name) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s),
        Some(Value::String(_)) => Err(ToolError::invalid_argument(format!(
            "parameter `{name}` must not be empty"
        ))),
        Some(_) => Err(ToolError::invalid_argument(format!(
            "parameter `{name}` must be a string"
        ))),
        None => Err(ToolError::invalid_argument(format!(
            "missing required parameter `{name}`"
        ))),
    }
}

/// Like `require_str`, but the empty string is a legal value (editing
/// content, for one).
pub fn require_str_allow_empty<'a>(args: &'a Value, name: &str) -> ToolResult<&'a str> {
    match args.get(name) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ToolError::invalid_argument(format!(
            "parameter `{name}` must be a string"
        ))),
        None => Err(ToolError::invalid_argument(format!(
            "missing required parameter `{name}`"
        ))),
    }
}

pub fn opt_str<'a>(args: &'a Value, name: &str) -> Option<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

pub fn require_u64(args: &Value, name: &str) -> ToolResult<u64> {
    match args.get(name) {
        Some(value) => value.as_u64().ok_or_else(|| {
            ToolError::invalid_argument(format!(
                "parameter `{name}` must be a non-negative integer"
            ))
        }),
        None => Err(ToolError::invalid_argument(format!(
            "missing required parameter `{name}`"
        ))),
    }
}

pub fn opt_u64(args: &Value, name: &str) -> ToolResult<Option<u64>> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            ToolError::invalid_argument(format!(
                "parameter `{name}` must be a non-negative integer"
            ))
        }),
    }
}

pub fn opt_bool(args: &Value, name: &str) -> ToolResult<Option<bool>> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(ToolError::invalid_argument(format!(
            "parameter `{name}` must be a boolean"
        ))),
    }
}
