use std::path::{Path, PathBuf};
use std::sync::Arc;

use ignore::WalkBuilder;
use tracing::{debug, trace};

use crate::errors::{ToolError, ToolResult};

use super::filter::{FilterDecision, PathFilter};
use super::language::language_of;
use super::types::{read_submodules, Submodule};

/// Injected transport for remote origins. Given a url and a destination
/// directory it must leave a checkout at the returned path. The core never
/// talks to the network itself.
pub type Fetcher = Arc<dyn Fn(&str, &Path) -> anyhow::Result<PathBuf> + Send + Sync>;

/// Owns the repositories root directory: resolving origins to local
/// checkouts, walking them through the path filter and bounded file reads.
pub struct RepoManager {
    repos_root: PathBuf,
    filter: Arc<PathFilter>,
    max_file_size: u64,
    fetch: Fetcher,
}

impl RepoManager {
    pub fn new(
        repos_root: PathBuf,
        filter: Arc<PathFilter>,
        max_file_size: u64,
        fetch: Fetcher,
    ) -> Self {
        Self {
            repos_root,
            filter,
            max_file_size,
            fetch,
        }
    }

    pub fn filter(&self) -> &Arc<PathFilter> {
        &self.filter
    }

    /// Resolve an origin (filesystem path or url) to a local repo root.
    /// Filesystem paths are used in place; urls are fetched under
    /// `<repo_dir>/<name>` once and reused afterwards (idempotent on name).
    pub fn clone_source(&self, origin: &str, name: &str) -> ToolResult<PathBuf> {
        let as_path = Path::new(origin);
        if as_path.is_dir() {
            let canonical = std::fs::canonicalize(as_path).map_err(|err| {
                ToolError::invalid_argument(format!("cannot resolve {origin}: {err}"))
            })?;
            return Ok(canonical);
        }
        if !looks_like_url(origin) {
            return Err(ToolError::not_found(format!(
                "{origin} is neither an existing directory nor a fetchable url"
            )));
        }

        let destination = self.repos_root.join(name);
        if destination.is_dir() {
            debug!(name, "reusing existing checkout");
            return Ok(destination);
        }
        std::fs::create_dir_all(&self.repos_root)?;
        let path = (self.fetch)(origin, &destination)
            .map_err(|err| ToolError::internal(format!("fetching {origin} failed: {err:#}")))?;
        Ok(path)
    }

    /// All indexable files under a repo root, in stable (sorted) order.
    /// Rejections are reported at trace level and counted, never fatal.
    pub fn walk(&self, repo_root: &Path) -> Vec<PathBuf> {
        let walker = WalkBuilder::new(repo_root)
            .standard_filters(false)
            .hidden(false)
            .filter_entry(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map(PathFilter::descend_into)
                    .unwrap_or(true)
            })
            .build();

        let mut accepted = Vec::new();
        let mut rejected = 0usize;
        for entry in walker.filter_map(Result::ok) {
            if !entry.path().is_file() {
                continue;
            }
            match self.filter.check(repo_root, entry.path()) {
                FilterDecision::Accepted => accepted.push(entry.into_path()),
                FilterDecision::Rejected(reason) => {
                    rejected += 1;
                    trace!(path = %entry.path().display(), %reason, "skipping file");
                }
            }
        }
        debug!(
            root = %repo_root.display(),
            accepted = accepted.len(),
            rejected,
            "walked repository"
        );
        accepted.sort();
        accepted
    }

    /// Language tag for a file name; `generic` when unknown.
    pub fn language_of(&self, path: &Path) -> &'static str {
        language_of(path)
    }

    /// Read a file that the filter would accept. Refuses filtered paths so
    /// tool handlers cannot leak gitignored or oversized content.
    pub fn read_file(&self, repo_root: &Path, path: &Path) -> ToolResult<String> {
        if let FilterDecision::Rejected(reason) = self.filter.check(repo_root, path) {
            return Err(ToolError::failed_precondition(format!(
                "{} is not indexable: {reason}",
                path.display()
            )));
        }
        let meta = std::fs::metadata(path)?;
        if meta.len() > self.max_file_size {
            return Err(ToolError::failed_precondition(format!(
                "{} exceeds the configured size limit",
                path.display()
            )));
        }
        Ok(std::fs::read_to_string(path)?)
    }

    pub fn submodules(&self, repo_root: &Path) -> Vec<Submodule> {
        read_submodules(repo_root)
    }
}

fn looks_like_url(origin: &str) -> bool {
    origin.contains("://") || origin.starts_with("git@")
}

/// Default fetcher used by the binary: shells out to `git clone`. Tests and
/// embedders inject their own.
pub fn git_fetcher() -> Fetcher {
    Arc::new(|url: &str, destination: &Path| {
        let status = std::process::Command::new("git")
            .arg("clone")
            .arg("--depth=1")
            .arg(url)
            .arg(destination)
            .status()?;
        if !status.success() {
            anyhow::bail!("git clone exited with {status}");
        }
        Ok(destination.to_path_buf())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(root: &Path) -> RepoManager {
        RepoManager::new(
            root.join("repos"),
            Arc::new(PathFilter::new(1024 * 1024)),
            1024 * 1024,
            Arc::new(|_url: &str, _dst: &Path| anyhow::bail!("no network in tests")),
        )
    }

    #[test]
    fn walk_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("zeta.rs"), "fn z() {}\n").unwrap();
        std::fs::write(dir.path().join("alpha.go"), "package a\n").unwrap();
        std::fs::write(dir.path().join("notes.xyz"), "skip me\n").unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/x")).unwrap();
        std::fs::write(dir.path().join("node_modules/x/i.js"), "1\n").unwrap();

        let mgr = manager(dir.path());
        let files = mgr.walk(dir.path());
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_owned())
            .collect();
        assert_eq!(names, vec!["alpha.go", "zeta.rs"]);
    }

    #[test]
    fn clone_source_accepts_local_dirs_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let src = dir.path().join("project");
        std::fs::create_dir_all(&src).unwrap();
        let first = mgr.clone_source(src.to_str().unwrap(), "project").unwrap();
        let second = mgr.clone_source(src.to_str().unwrap(), "project").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn read_file_refuses_filtered_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "secret.rs\n").unwrap();
        std::fs::write(dir.path().join("secret.rs"), "fn s() {}\n").unwrap();
        let mgr = manager(dir.path());
        let err = mgr
            .read_file(dir.path(), &dir.path().join("secret.rs"))
            .unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::FailedPrecondition);
    }
}
