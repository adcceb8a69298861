use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::warn;

use super::types::Repository;

/// Process-wide registry of known repositories, keyed by repo id.
pub type RepositoryPool = Arc<scc::HashMap<String, Repository>>;

/// Where the pool is persisted between runs. A missing or unreadable state
/// file yields an empty pool; partial corruption never takes the process
/// down.
#[derive(Debug, Clone)]
pub struct StateSource {
    state_file: PathBuf,
}

impl StateSource {
    pub fn new(state_file: PathBuf) -> Self {
        Self { state_file }
    }

    pub fn initialize_pool(&self) -> RepositoryPool {
        let pool: RepositoryPool = Arc::new(scc::HashMap::default());
        match std::fs::read_to_string(&self.state_file) {
            Ok(content) => match serde_json::from_str::<Vec<Repository>>(&content) {
                Ok(repos) => {
                    for repo in repos {
                        let _ = pool.insert(repo.id.clone(), repo);
                    }
                }
                Err(err) => {
                    warn!(%err, file = %self.state_file.display(), "repo state unreadable, starting empty");
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(%err, file = %self.state_file.display(), "repo state unreadable, starting empty");
            }
        }
        pool
    }

    /// Serialize the pool back to disk. Written through a sibling temp file
    /// and renamed, so readers never observe a half-written state file.
    pub fn save(&self, pool: &RepositoryPool) -> anyhow::Result<()> {
        let mut repos: Vec<Repository> = Vec::new();
        pool.scan(|_, repo| repos.push(repo.clone()));
        repos.sort_by(|a, b| a.name.cmp(&b.name));

        if let Some(parent) = self.state_file.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let payload = serde_json::to_string_pretty(&repos)?;
        let tmp = self.state_file.with_extension("json.tmp");
        std::fs::write(&tmp, payload).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.state_file)
            .with_context(|| format!("renaming into {}", self.state_file.display()))?;
        Ok(())
    }
}

/// Find a repository by name or by id.
pub fn find_repository(pool: &RepositoryPool, name_or_id: &str) -> Option<Repository> {
    if let Some(repo) = pool.read(&name_or_id.to_owned(), |_, r| r.clone()) {
        return Some(repo);
    }
    let mut found = None;
    pool.scan(|_, repo| {
        if found.is_none() && repo.name == name_or_id {
            found = Some(repo.clone());
        }
    });
    found
}

/// Find the repository whose root contains the given absolute path.
pub fn repository_containing(pool: &RepositoryPool, path: &Path) -> Option<Repository> {
    let mut best: Option<Repository> = None;
    pool.scan(|_, repo| {
        if path.starts_with(&repo.path) {
            let better = best
                .as_ref()
                .map(|b| repo.path.as_os_str().len() > b.path.as_os_str().len())
                .unwrap_or(true);
            if better {
                best = Some(repo.clone());
            }
        }
    });
    best
}

pub fn list_repositories(pool: &RepositoryPool) -> Vec<Repository> {
    let mut repos = Vec::new();
    pool.scan(|_, repo| repos.push(repo.clone()));
    repos.sort_by(|a, b| a.name.cmp(&b.name));
    repos
}
