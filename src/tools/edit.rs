use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;

use crate::editing;
use crate::errors::{ToolError, ToolResult};
use crate::locking::{Lock, LockMode, ResourceType};

use super::args::{opt_str, require_str, require_str_allow_empty, require_u64};
use super::paths::resolve_path;
use super::{ParamSpec, ParamType, ToolContext, ToolRegistry};

pub(super) fn register(registry: &mut ToolRegistry) {
    registry.register(
        "delete_lines",
        "Delete an inclusive line range from a file",
        "core",
        vec![
            ParamSpec::required("file_path", ParamType::String, "File path, repo-relative or absolute"),
            ParamSpec::required("start_line", ParamType::Number, "First line to delete, 1-based"),
            ParamSpec::required("end_line", ParamType::Number, "Last line to delete, inclusive"),
        ],
        Arc::new(|ctx| delete_lines(ctx).boxed()),
    );
    registry.register(
        "insert_at_line",
        "Insert content immediately before the given line",
        "core",
        vec![
            ParamSpec::required("file_path", ParamType::String, "File path, repo-relative or absolute"),
            ParamSpec::required("line_number", ParamType::Number, "Insertion point, 1-based; length+1 appends"),
            ParamSpec::required("content", ParamType::String, "Content to insert; may span lines"),
        ],
        Arc::new(|ctx| insert_at_line(ctx).boxed()),
    );
    registry.register(
        "replace_lines",
        "Replace an inclusive line range with new content, atomically",
        "core",
        vec![
            ParamSpec::required("file_path", ParamType::String, "File path, repo-relative or absolute"),
            ParamSpec::required("start_line", ParamType::Number, "First line to replace, 1-based"),
            ParamSpec::required("end_line", ParamType::Number, "Last line to replace, inclusive"),
            ParamSpec::required("new_content", ParamType::String, "Replacement content; may span lines"),
        ],
        Arc::new(|ctx| replace_lines(ctx).boxed()),
    );
}

/// All three mutators share the same shape: resolve the file, take a write
/// lock on it, mutate, release. The index is intentionally left stale; the
/// caller follows up with refresh_index.
async fn with_write_lock(
    ctx: &ToolContext,
    file_path: &str,
) -> ToolResult<(PathBuf, Lock)> {
    let repository = opt_str(&ctx.args, "repository");
    let (_repo, absolute) = resolve_path(&ctx.app, &ctx.session, repository, file_path)?;
    if !absolute.is_file() {
        return Err(ToolError::not_found(format!(
            "{} does not exist",
            absolute.display()
        )));
    }
    let lock = ctx
        .app
        .locks
        .acquire(
            ResourceType::File,
            &absolute.to_string_lossy(),
            LockMode::Write,
            &ctx.session.id,
            std::time::Duration::from_secs(ctx.app.config.lock_timeout_secs),
            &ctx.cancel,
        )
        .await?;
    Ok((absolute, lock))
}

async fn delete_lines(ctx: ToolContext) -> ToolResult<Value> {
    let file_path = require_str(&ctx.args, "file_path")?;
    let start_line = require_u64(&ctx.args, "start_line")?;
    let end_line = require_u64(&ctx.args, "end_line")?;

    let (absolute, lock) = with_write_lock(&ctx, file_path).await?;
    let record = editing::delete_lines(&absolute, start_line, end_line);
    let _ = ctx.app.locks.release(&lock.id).await;
    let record = record?;
    Ok(serde_json::to_value(record).map_err(|err| ToolError::internal(err.to_string()))?)
}

async fn insert_at_line(ctx: ToolContext) -> ToolResult<Value> {
    let file_path = require_str(&ctx.args, "file_path")?;
    let line_number = require_u64(&ctx.args, "line_number")?;
    let content = require_str_allow_empty(&ctx.args, "content")?;

    let (absolute, lock) = with_write_lock(&ctx, file_path).await?;
    let record = editing::insert_at_line(&absolute, line_number, content);
    let _ = ctx.app.locks.release(&lock.id).await;
    let record = record?;
    Ok(serde_json::to_value(record).map_err(|err| ToolError::internal(err.to_string()))?)
}

async fn replace_lines(ctx: ToolContext) -> ToolResult<Value> {
    let file_path = require_str(&ctx.args, "file_path")?;
    let start_line = require_u64(&ctx.args, "start_line")?;
    let end_line = require_u64(&ctx.args, "end_line")?;
    let new_content = require_str_allow_empty(&ctx.args, "new_content")?;

    let (absolute, lock) = with_write_lock(&ctx, file_path).await?;
    let record = editing::replace_lines(&absolute, start_line, end_line, new_content);
    let _ = ctx.app.locks.release(&lock.id).await;
    let record = record?;
    Ok(serde_json::to_value(record).map_err(|err| ToolError::internal(err.to_string()))?)
}
