use std::path::{Path, PathBuf};

use crate::application::Application;
use crate::errors::{ToolError, ToolResult};
use crate::repo::pool::{find_repository, list_repositories, repository_containing};
use crate::repo::types::Repository;
use crate::session::Session;

/// Resolve a tool-supplied file or directory path.
///
/// Order: an explicit `repository` argument anchors relative paths at that
/// repo's root; otherwise relative paths resolve under the session's
/// workspace when it has one, and then against the known repos. Absolute
/// paths are used as-is and associated with the deepest repo containing
/// them.
pub fn resolve_path(
    app: &Application,
    session: &Session,
    repository: Option<&str>,
    path: &str,
) -> ToolResult<(Option<Repository>, PathBuf)> {
    let candidate = Path::new(path);

    if let Some(name_or_id) = repository {
        let repo = find_repository(&app.repo_pool, name_or_id)
            .ok_or_else(|| ToolError::not_found(format!("repository {name_or_id} not found")))?;
        let absolute = if candidate.is_absolute() {
            if !candidate.starts_with(&repo.path) {
                return Err(ToolError::failed_precondition(format!(
                    "{path} is not under repository {}",
                    repo.name
                )));
            }
            candidate.to_path_buf()
        } else {
            repo.path.join(candidate)
        };
        return Ok((Some(repo), absolute));
    }

    if candidate.is_absolute() {
        let repo = repository_containing(&app.repo_pool, candidate);
        return Ok((repo, candidate.to_path_buf()));
    }

    if let Some(workspace) = &session.workspace_dir {
        let absolute = workspace.join(candidate);
        let repo = repository_containing(&app.repo_pool, &absolute);
        return Ok((repo, absolute));
    }

    // no anchor given: the first known repo that actually contains the file
    for repo in list_repositories(&app.repo_pool) {
        let absolute = repo.path.join(candidate);
        if absolute.exists() {
            return Ok((Some(repo), absolute));
        }
    }

    Err(ToolError::failed_precondition(format!(
        "relative path {path} cannot be resolved: no repository match and the session has no workspace"
    )))
}

/// Same resolution, but the file must belong to a known repository.
pub fn resolve_in_repo(
    app: &Application,
    session: &Session,
    repository: Option<&str>,
    path: &str,
) -> ToolResult<(Repository, PathBuf)> {
    let (repo, absolute) = resolve_path(app, session, repository, path)?;
    let repo = repo.ok_or_else(|| {
        ToolError::failed_precondition(format!("{path} is not under any known repository"))
    })?;
    Ok((repo, absolute))
}

/// Path of `absolute` relative to the repo root, slash-normalized.
pub fn repo_relative(repo: &Repository, absolute: &Path) -> String {
    absolute
        .strip_prefix(&repo.path)
        .unwrap_or(absolute)
        .to_string_lossy()
        .replace('\\', "/")
}
