use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::chunking::{ChunkStrategy, Chunker, ChunkerConfig};
use crate::connection::ConnectionManager;
use crate::indexes::pipeline::Indexer;
use crate::indexes::store::SearchStore;
use crate::locking::LockManager;
use crate::parsing::ParserRegistry;
use crate::repo::filter::PathFilter;
use crate::repo::manager::{git_fetcher, Fetcher, RepoManager};
use crate::repo::pool::{RepositoryPool, StateSource};
use crate::session::{Session, SessionManager};
use crate::tools::ToolRegistry;

use super::config::Configuration;

/// The shared application state: configuration, the search index, the
/// process-wide registries and the tool surface. Cloning is cheap; every
/// transport and handler works off the same instance.
#[derive(Clone)]
pub struct Application {
    pub config: Arc<Configuration>,
    pub repo_pool: RepositoryPool,
    /// The shared index partition
    pub store: Arc<SearchStore>,
    /// Lazily opened per-session partitions, only in isolation mode
    session_stores: Arc<scc::HashMap<String, Arc<SearchStore>>>,
    pub repo_manager: Arc<RepoManager>,
    pub parsers: Arc<ParserRegistry>,
    pub indexer: Arc<Indexer>,
    pub sessions: Arc<SessionManager>,
    pub locks: Arc<LockManager>,
    pub connections: Arc<ConnectionManager>,
    pub tools: Arc<ToolRegistry>,
    /// Whether this process serves many editor sessions (HTTP/WS daemon) or
    /// a single client over stdio. Multi-session responses carry a
    /// `session_info` object; single-client responses do not.
    pub multi_session: bool,
    pub started_at: Instant,
    /// Root cancellation token; cancelled on shutdown
    pub cancel: CancellationToken,
}

impl Application {
    pub async fn initialize(config: Configuration) -> anyhow::Result<Self> {
        Self::initialize_with_fetcher(config, git_fetcher()).await
    }

    /// Initialization with an injected fetch function; tests use this to
    /// stay off the network.
    pub async fn initialize_with_fetcher(
        config: Configuration,
        fetch: Fetcher,
    ) -> anyhow::Result<Self> {
        std::fs::create_dir_all(&config.index_dir)?;
        debug!(?config, "configuration after loading");

        let state = StateSource::new(config.repo_state_file());
        let repo_pool = state.initialize_pool();

        let filter = Arc::new(PathFilter::new(config.max_file_size));
        let repo_manager = Arc::new(RepoManager::new(
            config.repo_dir.clone(),
            filter,
            config.max_file_size,
            fetch,
        ));
        let parsers = Arc::new(ParserRegistry::init());
        let chunker = Chunker::new(ChunkerConfig {
            strategy: ChunkStrategy::parse(&config.chunk_strategy),
            window: config.chunk_window,
            overlap: config.chunk_overlap,
            context_before: config.chunk_context_before,
            context_after: config.chunk_context_after,
            max_chunk_lines: config.max_chunk_lines,
        });
        let locks = Arc::new(LockManager::new(Duration::from_secs(config.lock_ttl_secs)));
        let store = Arc::new(SearchStore::open(&config.search_index_path())?);

        let indexer = Arc::new(Indexer::new(
            Arc::clone(&repo_manager),
            Arc::clone(&parsers),
            chunker,
            Arc::clone(&repo_pool),
            state,
            Arc::clone(&locks),
            config.max_concurrent_indexes,
            Duration::from_secs(config.lock_timeout_secs),
            config.incremental,
        ));

        let sessions = Arc::new(SessionManager::new(config.clone()));
        let connections = Arc::new(ConnectionManager::new(
            config.max_connections,
            Duration::from_secs(config.connection_idle_secs),
        ));

        let multi_session = !config.stdio;
        Ok(Self {
            config: Arc::new(config),
            repo_pool,
            store,
            session_stores: Arc::new(scc::HashMap::default()),
            repo_manager,
            parsers,
            indexer,
            sessions,
            locks,
            connections,
            tools: Arc::new(ToolRegistry::standard()),
            multi_session,
            started_at: Instant::now(),
            cancel: CancellationToken::new(),
        })
    }

    /// Start the background sweepers: session cleanup, lock expiry,
    /// idle-connection teardown. They stop when the root token cancels.
    pub fn spawn_background(&self) {
        self.sessions.spawn_cleanup(
            Duration::from_secs(self.config.session_cleanup_secs),
            self.cancel.clone(),
        );
        self.locks
            .spawn_sweeper(Duration::from_secs(30), self.cancel.clone());
        self.connections
            .spawn_sweeper(Duration::from_secs(60), self.cancel.clone());
    }

    /// The index partition a session works against. One mode is chosen at
    /// startup: in isolation mode a session with a workspace gets its own
    /// partition under `<index_dir>/sessions/<id>`, everything else shares
    /// the process index. The two are never mixed.
    pub fn store_for(&self, session: &Session) -> anyhow::Result<Arc<SearchStore>> {
        if !self.config.isolate_workspaces || session.workspace_dir.is_none() {
            return Ok(Arc::clone(&self.store));
        }
        if let Some(store) = self
            .session_stores
            .read(&session.id, |_, store| Arc::clone(store))
        {
            return Ok(store);
        }
        let store = Arc::new(SearchStore::open(&session.config.search_index_path())?);
        let _ = self
            .session_stores
            .insert(session.id.clone(), Arc::clone(&store));
        Ok(store)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Cancel everything; sweepers exit and in-flight requests unwind.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}
