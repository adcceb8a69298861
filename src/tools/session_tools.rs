use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{json, Value};

use crate::errors::ToolResult;

use super::args::{opt_str, require_str};
use super::{ParamSpec, ParamType, ToolContext, ToolRegistry};

pub(super) fn register(registry: &mut ToolRegistry) {
    registry.register(
        "list_sessions",
        "All live sessions with activity statistics",
        "session",
        vec![],
        Arc::new(|ctx| list_sessions(ctx).boxed()),
    );
    registry.register(
        "create_session",
        "Create a named session, optionally bound to a workspace directory",
        "session",
        vec![
            ParamSpec::required("name", ParamType::String, "Human-readable session name"),
            ParamSpec::optional("workspace_dir", ParamType::String, "Workspace root for this session"),
        ],
        Arc::new(|ctx| create_session(ctx).boxed()),
    );
    registry.register(
        "get_session_info",
        "Details of one session, defaulting to the caller's",
        "session",
        vec![ParamSpec::optional(
            "session_id",
            ParamType::String,
            "Session id; defaults to the calling session",
        )],
        Arc::new(|ctx| get_session_info(ctx).boxed()),
    );
}

async fn list_sessions(ctx: ToolContext) -> ToolResult<Value> {
    let sessions = ctx.app.sessions.list_sessions();
    let stats = ctx.app.sessions.stats();
    Ok(json!({
        "sessions": sessions,
        "stats": stats,
    }))
}

async fn create_session(ctx: ToolContext) -> ToolResult<Value> {
    let name = require_str(&ctx.args, "name")?;
    let workspace_dir = opt_str(&ctx.args, "workspace_dir").map(PathBuf::from);
    let session = ctx.app.sessions.create_session(name, workspace_dir);
    Ok(json!({
        "session": session.info(),
    }))
}

async fn get_session_info(ctx: ToolContext) -> ToolResult<Value> {
    let session = match opt_str(&ctx.args, "session_id") {
        Some(id) => ctx.app.sessions.get_session(id)?,
        None => ctx.session.clone(),
    };
    Ok(json!({
        "session": session.info(),
        "context_keys": session.context.keys().cloned().collect::<Vec<_>>(),
    }))
}
