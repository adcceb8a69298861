use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rayon::prelude::*;
use relative_path::RelativePathBuf;
use serde::Serialize;
use tantivy::schema::Document;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunking::Chunker;
use crate::errors::{ToolError, ToolResult};
use crate::gitops;
use crate::locking::{LockManager, LockMode, ResourceType};
use crate::parsing::ParserRegistry;
use crate::repo::manager::RepoManager;
use crate::repo::pool::{find_repository, RepositoryPool, StateSource};
use crate::repo::types::{repo_id, IndexingMode, Repository};

use super::schema::ids;
use super::store::SearchStore;

/// Result of one `IndexRepository` run. Per-file failures land in `errors`;
/// the call as a whole still succeeds unless the pipeline was unusable.
#[derive(Serialize, Clone, Debug)]
pub struct IndexReport {
    pub repository: Repository,
    pub mode: IndexingMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
    pub files_indexed: u64,
    pub files_deleted: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

/// Orchestrates filter -> parse -> chunk -> index per file, per repo.
/// Indexing one repo runs under an exclusive repository lock; different
/// repos index in parallel up to the configured cap.
pub struct Indexer {
    repo_manager: Arc<RepoManager>,
    parsers: Arc<ParserRegistry>,
    chunker: Chunker,
    pool: RepositoryPool,
    state: StateSource,
    locks: Arc<LockManager>,
    concurrency: Semaphore,
    lock_timeout: Duration,
    incremental: bool,
}

impl Indexer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo_manager: Arc<RepoManager>,
        parsers: Arc<ParserRegistry>,
        chunker: Chunker,
        pool: RepositoryPool,
        state: StateSource,
        locks: Arc<LockManager>,
        max_concurrent: usize,
        lock_timeout: Duration,
        incremental: bool,
    ) -> Self {
        Self {
            repo_manager,
            parsers,
            chunker,
            pool,
            state,
            locks,
            concurrency: Semaphore::new(max_concurrent.max(1)),
            lock_timeout,
            incremental,
        }
    }

    pub fn pool(&self) -> &RepositoryPool {
        &self.pool
    }

    /// Index (or re-index) one repository from a path or url.
    pub async fn index_repository(
        &self,
        store: &Arc<SearchStore>,
        origin: &str,
        name: Option<&str>,
        owner: &str,
        cancel: &CancellationToken,
    ) -> ToolResult<IndexReport> {
        let inferred_name = name
            .map(str::to_owned)
            .or_else(|| {
                Path::new(origin)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "repository".to_owned());
        let root = self.repo_manager.clone_source(origin, &inferred_name)?;
        let origin_key = if origin.contains("://") || origin.starts_with("git@") {
            origin.to_owned()
        } else {
            root.to_string_lossy().into_owned()
        };
        let id = repo_id(&origin_key);

        let _permit = self
            .concurrency
            .acquire()
            .await
            .map_err(|_| ToolError::internal("indexer shutting down"))?;
        let lock = self
            .locks
            .acquire(
                ResourceType::Repository,
                &id,
                LockMode::Exclusive,
                owner,
                self.lock_timeout,
                cancel,
            )
            .await?;

        let result = self
            .index_locked(store, &root, &origin_key, &inferred_name, &id, cancel)
            .await;
        let _ = self.locks.release(&lock.id).await;
        result
    }

    async fn index_locked(
        &self,
        store: &Arc<SearchStore>,
        root: &Path,
        origin_key: &str,
        name: &str,
        id: &str,
        cancel: &CancellationToken,
    ) -> ToolResult<IndexReport> {
        let started = std::time::Instant::now();
        let mut errors: Vec<String> = Vec::new();

        let existing = self.pool.read(&id.to_owned(), |_, r| r.clone());
        let mut repository = existing.clone().unwrap_or_else(|| {
            Repository::new(
                id.to_owned(),
                name.to_owned(),
                root.to_path_buf(),
                origin_key.contains("://").then(|| origin_key.to_owned()),
            )
        });

        // full unless an incremental baseline is present and usable
        let mut mode = IndexingMode::Full;
        let mut fallback_reason = None;
        let mut worklist: Vec<PathBuf> = Vec::new();
        let mut deletions: Vec<String> = Vec::new();

        if self.incremental {
            match existing.as_ref().and_then(|r| r.last_indexed_hash.clone()) {
                Some(baseline) => match gitops::changed_files(root, &baseline).await {
                    Ok(changed) => {
                        mode = IndexingMode::Incremental;
                        for rel in changed {
                            let absolute = root.join(&rel);
                            if absolute.is_file()
                                && self
                                    .repo_manager
                                    .filter()
                                    .check(root, &absolute)
                                    .is_accepted()
                            {
                                worklist.push(absolute);
                            } else {
                                // deleted on disk, or no longer indexable
                                deletions.push(ids::path_key(id, &normalize(&rel)));
                            }
                        }
                    }
                    Err(err) => {
                        fallback_reason =
                            Some(format!("incremental diff against {baseline} failed: {err}"));
                    }
                },
                None => {
                    if existing.is_some() {
                        fallback_reason = Some("no baseline commit recorded".to_owned());
                    }
                }
            }
        }

        if mode == IndexingMode::Full {
            worklist = self.repo_manager.walk(root);
            if let Some(reason) = &fallback_reason {
                debug!(repo = name, %reason, "falling back to full re-index");
            }
        }

        // parse and chunk on the compute pool, off the async runtime
        let batches = {
            let store = Arc::clone(store);
            let parsers = Arc::clone(&self.parsers);
            let repo_manager = Arc::clone(&self.repo_manager);
            let chunker = self.chunker.clone();
            let root = root.to_path_buf();
            let id = id.to_owned();
            let name = name.to_owned();
            let cancel = cancel.clone();
            let worklist = std::mem::take(&mut worklist);
            tokio::task::spawn_blocking(move || {
                worklist
                    .into_par_iter()
                    .take_any_while(|_| !cancel.is_cancelled())
                    .map(|path| build_file_batch(&store, &parsers, &repo_manager, &chunker, &root, &id, &name, &path))
                    .collect::<Vec<_>>()
            })
            .await
            .map_err(|err| ToolError::internal(format!("parse stage failed: {err}")))?
        };

        if cancel.is_cancelled() {
            return Err(ToolError::cancelled("indexing cancelled"));
        }

        let mut file_count: u64 = 0;
        let mut total_lines: u64 = 0;
        let mut language_counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut indexed_paths: HashSet<String> = HashSet::new();

        for batch in batches {
            match batch {
                Ok(batch) => {
                    if cancel.is_cancelled() {
                        return Err(ToolError::cancelled("indexing cancelled"));
                    }
                    let FileBatch {
                        path_key,
                        relative_path,
                        language,
                        lines,
                        docs,
                    } = batch;
                    if let Err(err) = store.replace_file_batch(&path_key, docs).await {
                        errors.push(format!("{relative_path}: index write failed: {err:#}"));
                        continue;
                    }
                    file_count += 1;
                    total_lines += lines;
                    *language_counts.entry(language).or_insert(0) += 1;
                    indexed_paths.insert(relative_path);
                }
                Err(err) => errors.push(err),
            }
        }

        // stale documents: explicitly deleted files (incremental) or files
        // no longer present in the walk (full)
        if mode == IndexingMode::Full {
            match store.file_paths_for_repo(id) {
                Ok(previously_indexed) => {
                    for path in previously_indexed {
                        if !indexed_paths.contains(&path) {
                            deletions.push(ids::path_key(id, &path));
                        }
                    }
                }
                Err(err) => warn!(%err, "could not enumerate stale documents"),
            }
        }
        let files_deleted = deletions.len() as u64;
        if let Err(err) = store.delete_paths(&deletions).await {
            errors.push(format!("stale document cleanup failed: {err:#}"));
        }

        // refresh the repository record
        if mode == IndexingMode::Incremental {
            // untouched files keep their documents; recount from the index
            repository.file_count = store
                .file_paths_for_repo(id)
                .map(|paths| paths.len() as u64)
                .unwrap_or(repository.file_count);
            repository.total_lines = repository.total_lines.max(total_lines);
            for (language, _) in &language_counts {
                if !repository.languages.contains(language) {
                    repository.languages.push(language.clone());
                }
            }
        } else {
            repository.file_count = file_count;
            repository.total_lines = total_lines;
            let mut languages: Vec<(String, u64)> = language_counts.into_iter().collect();
            languages.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
            repository.languages = languages.into_iter().map(|(lang, _)| lang).collect();
        }
        repository.name = name.to_owned();
        repository.path = root.to_path_buf();
        repository.indexed_at = Some(Utc::now());
        repository.indexing_mode = mode;
        repository.submodules = self.repo_manager.submodules(root);
        repository.last_commit = gitops::head_commit(root).await;
        repository.branch = gitops::current_branch(root).await;
        repository.last_indexed_hash = repository.last_commit.clone();

        let _ = self.pool.remove(&id.to_owned());
        let _ = self.pool.insert(id.to_owned(), repository.clone());
        if let Err(err) = self.state.save(&self.pool) {
            warn!(%err, "failed to persist repository state");
        }

        info!(
            repo = name,
            files = file_count,
            lines = total_lines,
            errors = errors.len(),
            ?mode,
            "repository indexed"
        );

        Ok(IndexReport {
            repository,
            mode,
            fallback_reason,
            files_indexed: file_count,
            files_deleted,
            errors,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Remove a repository and every document derived from it.
    pub async fn remove_repository(
        &self,
        store: &Arc<SearchStore>,
        name_or_id: &str,
        owner: &str,
        cancel: &CancellationToken,
    ) -> ToolResult<Repository> {
        let repository = find_repository(&self.pool, name_or_id)
            .ok_or_else(|| ToolError::not_found(format!("repository {name_or_id} not found")))?;
        let lock = self
            .locks
            .acquire(
                ResourceType::Repository,
                &repository.id,
                LockMode::Exclusive,
                owner,
                self.lock_timeout,
                cancel,
            )
            .await?;
        let result = async {
            store.delete_repository(&repository.id).await?;
            self.pool.remove(&repository.id);
            self.state.save(&self.pool)?;
            Ok::<_, anyhow::Error>(())
        }
        .await;
        let _ = self.locks.release(&lock.id).await;
        result.map_err(ToolError::from)?;
        Ok(repository)
    }
}

struct FileBatch {
    path_key: String,
    relative_path: String,
    language: String,
    lines: u64,
    docs: Vec<Document>,
}

/// The per-file unit of work: read, detect language, parse, chunk, emit the
/// document batch. Pure CPU + one read; runs on the rayon pool.
#[allow(clippy::too_many_arguments)]
fn build_file_batch(
    store: &SearchStore,
    parsers: &ParserRegistry,
    repo_manager: &RepoManager,
    chunker: &Chunker,
    root: &Path,
    repo_id: &str,
    repo_name: &str,
    path: &Path,
) -> Result<FileBatch, String> {
    let relative = path
        .strip_prefix(root)
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|_| path.to_path_buf());
    let relative_path = normalize(&relative.to_string_lossy());

    let content = repo_manager
        .read_file(root, path)
        .map_err(|err| format!("{relative_path}: {}", err.message))?;
    let language = repo_manager.language_of(path);

    let mut file = parsers.parse(language, &content, &relative_path);
    file.id = ids::file_id(repo_id, &relative_path);
    file.repo_id = repo_id.to_owned();
    file.relative_path = relative_path.clone();
    file.modified_at = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(chrono::DateTime::<Utc>::from);
    let now = Utc::now();
    file.indexed_at = Some(now);
    file.chunks = chunker.chunk(&file, &content);

    let docs = store.build_documents(&file, repo_name, now.timestamp(), &content);
    Ok(FileBatch {
        path_key: ids::path_key(repo_id, &relative_path),
        relative_path,
        language: language.to_owned(),
        lines: file.lines,
        docs,
    })
}

/// Forward slashes regardless of platform, so ids and path keys are stable.
fn normalize(path: &str) -> String {
    RelativePathBuf::from(path.replace('\\', "/")).normalize().into_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::ChunkerConfig;
    use crate::repo::filter::PathFilter;

    fn indexer(dir: &Path) -> (Indexer, Arc<SearchStore>) {
        let filter = Arc::new(PathFilter::new(1024 * 1024));
        let repo_manager = Arc::new(RepoManager::new(
            dir.join("repos"),
            filter,
            1024 * 1024,
            Arc::new(|_: &str, _: &Path| anyhow::bail!("no fetch in tests")),
        ));
        let pool: RepositoryPool = Arc::new(scc::HashMap::default());
        let indexer = Indexer::new(
            repo_manager,
            Arc::new(ParserRegistry::init()),
            Chunker::new(ChunkerConfig::default()),
            pool,
            StateSource::new(dir.join("repos.json")),
            Arc::new(LockManager::new(Duration::from_secs(60))),
            2,
            Duration::from_secs(5),
            false,
        );
        let store = Arc::new(SearchStore::open_in_ram().unwrap());
        (indexer, store)
    }

    #[tokio::test]
    async fn tiny_repo_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("proj");
        std::fs::create_dir_all(&repo).unwrap();
        std::fs::write(repo.join("main.go"), "func Hello() {}\n").unwrap();

        let (indexer, store) = indexer(dir.path());
        let report = indexer
            .index_repository(
                &store,
                repo.to_str().unwrap(),
                None,
                "test",
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.repository.file_count, 1);
        assert_eq!(report.repository.languages, vec!["go"]);
        assert!(report.errors.is_empty());
        assert_eq!(store.count_by_type().unwrap()["file"], 1);
        assert_eq!(store.count_by_type().unwrap()["function"], 1);
    }

    #[tokio::test]
    async fn reindex_is_deterministic_and_stable() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("proj");
        std::fs::create_dir_all(&repo).unwrap();
        std::fs::write(repo.join("lib.rs"), "pub fn alpha() {}\npub fn beta() {}\n").unwrap();

        let (indexer, store) = indexer(dir.path());
        let origin = repo.to_str().unwrap().to_owned();
        let token = CancellationToken::new();
        indexer
            .index_repository(&store, &origin, None, "test", &token)
            .await
            .unwrap();
        let first_total = store.total_documents().unwrap();

        indexer
            .index_repository(&store, &origin, None, "test", &token)
            .await
            .unwrap();
        // identical content: identical document set, no accumulation
        assert_eq!(store.total_documents().unwrap(), first_total);
        assert_eq!(store.count_by_type().unwrap()["function"], 2);
    }

    #[tokio::test]
    async fn deleted_files_leave_no_stale_documents() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("proj");
        std::fs::create_dir_all(&repo).unwrap();
        std::fs::write(repo.join("a.go"), "func A() {}\n").unwrap();
        std::fs::write(repo.join("b.go"), "func B() {}\n").unwrap();

        let (indexer, store) = indexer(dir.path());
        let origin = repo.to_str().unwrap().to_owned();
        let token = CancellationToken::new();
        indexer
            .index_repository(&store, &origin, None, "test", &token)
            .await
            .unwrap();
        assert_eq!(store.count_by_type().unwrap()["file"], 2);

        std::fs::remove_file(repo.join("b.go")).unwrap();
        let report = indexer
            .index_repository(&store, &origin, None, "test", &token)
            .await
            .unwrap();
        assert_eq!(report.repository.file_count, 1);
        assert_eq!(store.count_by_type().unwrap()["file"], 1);
    }

    #[tokio::test]
    async fn gitignored_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("proj");
        std::fs::create_dir_all(repo.join("ignored")).unwrap();
        std::fs::write(repo.join("main.go"), "func Hello() {}\n").unwrap();
        std::fs::write(repo.join(".gitignore"), "ignored/\n").unwrap();
        std::fs::write(repo.join("ignored/skip.go"), "func Skip() {}\n").unwrap();

        let (indexer, store) = indexer(dir.path());
        let report = indexer
            .index_repository(
                &store,
                repo.to_str().unwrap(),
                None,
                "test",
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(report.repository.file_count, 1);
        assert_eq!(store.count_by_type().unwrap()["file"], 1);
    }

    #[tokio::test]
    async fn remove_repository_deletes_documents_and_record() {
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("proj");
        std::fs::create_dir_all(&repo).unwrap();
        std::fs::write(repo.join("main.go"), "func Hello() {}\n").unwrap();

        let (indexer, store) = indexer(dir.path());
        let token = CancellationToken::new();
        indexer
            .index_repository(&store, repo.to_str().unwrap(), None, "test", &token)
            .await
            .unwrap();

        let removed = indexer
            .remove_repository(&store, "proj", "test", &token)
            .await
            .unwrap();
        assert_eq!(removed.name, "proj");
        assert_eq!(store.total_documents().unwrap(), 0);
        assert!(find_repository(indexer.pool(), "proj").is_none());
    }
}
