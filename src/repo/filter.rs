use std::path::{Path, PathBuf};
use std::time::SystemTime;

use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::sync::Arc;
use tracing::warn;

use super::language::{language_for_bare_filename, language_for_extension};

/// Path components that are never indexed, regardless of gitignore state.
pub const HARD_EXCLUDES: &[&str] = &[
    ".git",
    "node_modules",
    "vendor",
    "target",
    "build",
    "dist",
    "__pycache__",
];

/// Why a candidate file was rejected. Reported to the caller for logging;
/// rejection is never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    OutsideRoot,
    HardExcluded(String),
    GitIgnored,
    TooLarge(u64),
    UnknownExtension,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::OutsideRoot => write!(f, "path escapes the repository root"),
            RejectReason::HardExcluded(dir) => write!(f, "inside excluded directory `{dir}`"),
            RejectReason::GitIgnored => write!(f, "matched by .gitignore"),
            RejectReason::TooLarge(size) => write!(f, "file too large ({size} bytes)"),
            RejectReason::UnknownExtension => write!(f, "extension not indexable"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterDecision {
    Accepted,
    Rejected(RejectReason),
}

impl FilterDecision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, FilterDecision::Accepted)
    }
}

struct CachedGitignore {
    matcher: Arc<Gitignore>,
    mtime: Option<SystemTime>,
}

/// Decides which files under a repo root are indexable. Stateless apart from
/// a per-repo gitignore cache keyed by the `.gitignore` mtime.
pub struct PathFilter {
    max_file_size: u64,
    gitignore_cache: scc::HashMap<PathBuf, CachedGitignore>,
}

impl PathFilter {
    pub fn new(max_file_size: u64) -> Self {
        Self {
            max_file_size,
            gitignore_cache: scc::HashMap::default(),
        }
    }

    /// Decision sequence from the top; the first matching rule wins.
    pub fn check(&self, repo_root: &Path, path: &Path) -> FilterDecision {
        // symlink escapes: the canonical path must stay under the root
        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let canonical_root =
            std::fs::canonicalize(repo_root).unwrap_or_else(|_| repo_root.to_path_buf());
        let relative = match canonical.strip_prefix(&canonical_root) {
            Ok(rel) => rel,
            Err(_) => return FilterDecision::Rejected(RejectReason::OutsideRoot),
        };

        for component in relative.components() {
            if let Some(name) = component.as_os_str().to_str() {
                if HARD_EXCLUDES.contains(&name) {
                    return FilterDecision::Rejected(RejectReason::HardExcluded(name.to_owned()));
                }
            }
        }

        if let Some(matcher) = self.gitignore_for(&canonical_root) {
            if matcher
                .matched_path_or_any_parents(relative, false)
                .is_ignore()
            {
                return FilterDecision::Rejected(RejectReason::GitIgnored);
            }
        }

        if let Ok(meta) = std::fs::metadata(&canonical) {
            if meta.len() > self.max_file_size {
                return FilterDecision::Rejected(RejectReason::TooLarge(meta.len()));
            }
        }

        let known_extension = canonical
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| language_for_extension(&e.to_ascii_lowercase()).is_some())
            .unwrap_or(false);
        let known_bare = canonical
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| language_for_bare_filename(n).is_some())
            .unwrap_or(false);
        if !known_extension && !known_bare {
            return FilterDecision::Rejected(RejectReason::UnknownExtension);
        }

        FilterDecision::Accepted
    }

    /// Quick check used while walking: should this directory be descended
    /// into at all.
    pub fn descend_into(name: &str) -> bool {
        !HARD_EXCLUDES.contains(&name)
    }

    /// Load (or reuse) the gitignore matcher for a repo root. The cache entry
    /// is invalidated when the `.gitignore` file's mtime changes.
    fn gitignore_for(&self, repo_root: &Path) -> Option<Arc<Gitignore>> {
        let gitignore_path = repo_root.join(".gitignore");
        let current_mtime = std::fs::metadata(&gitignore_path)
            .and_then(|m| m.modified())
            .ok();

        if let Some(cached) = self.gitignore_cache.read(&repo_root.to_path_buf(), |_, c| {
            (c.mtime, c.matcher.clone())
        }) {
            let (cached_mtime, matcher) = cached;
            if cached_mtime == current_mtime {
                return Some(matcher);
            }
            let _ = self.gitignore_cache.remove(&repo_root.to_path_buf());
        }

        let mut builder = GitignoreBuilder::new(repo_root);
        if gitignore_path.exists() {
            if let Some(err) = builder.add(&gitignore_path) {
                warn!(%err, path = %gitignore_path.display(), "failed to parse .gitignore");
            }
        }
        let matcher = match builder.build() {
            Ok(matcher) => Arc::new(matcher),
            Err(err) => {
                warn!(%err, "failed to build gitignore matcher");
                return None;
            }
        };
        let _ = self.gitignore_cache.insert(
            repo_root.to_path_buf(),
            CachedGitignore {
                matcher: matcher.clone(),
                mtime: current_mtime,
            },
        );
        Some(matcher)
    }
}
