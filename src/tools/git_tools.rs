use std::sync::Arc;

use futures::FutureExt;
use serde_json::{json, Value};

use crate::errors::{ToolError, ToolResult};
use crate::gitops;

use super::args::{opt_str, opt_u64, require_str};
use super::paths::{repo_relative, resolve_in_repo};
use super::{ParamSpec, ParamType, ToolContext, ToolRegistry};

pub(super) fn register(registry: &mut ToolRegistry) {
    registry.register(
        "git_blame",
        "Line-by-line authorship for a file (git blame, porcelain)",
        "project",
        vec![
            ParamSpec::required("file_path", ParamType::String, "File path, repo-relative or absolute"),
            ParamSpec::optional("start_line", ParamType::Number, "First line, 1-based inclusive"),
            ParamSpec::optional("end_line", ParamType::Number, "Last line, 1-based inclusive"),
            ParamSpec::optional("repository", ParamType::String, "Repository name or id"),
        ],
        Arc::new(|ctx| git_blame(ctx).boxed()),
    );
}

async fn git_blame(ctx: ToolContext) -> ToolResult<Value> {
    let file_path = require_str(&ctx.args, "file_path")?;
    let repository = opt_str(&ctx.args, "repository");
    let start_line = opt_u64(&ctx.args, "start_line")?;
    let end_line = opt_u64(&ctx.args, "end_line")?;

    let (repo, absolute) = resolve_in_repo(&ctx.app, &ctx.session, repository, file_path)?;
    if !absolute.is_file() {
        return Err(ToolError::not_found(format!(
            "{} does not exist",
            absolute.display()
        )));
    }
    let relative = repo_relative(&repo, &absolute);

    let range = match (start_line, end_line) {
        (None, None) => None,
        (start, end) => {
            let start = start.unwrap_or(1);
            Some((start, end.unwrap_or(start)))
        }
    };

    let lines = gitops::blame(&repo.path, std::path::Path::new(&relative), range).await?;
    Ok(json!({
        "file": relative,
        "repository": repo.name,
        "total": lines.len(),
        "lines": lines,
    }))
}
