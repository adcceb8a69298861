use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// Process configuration. Every field carries a serde default so the same
/// struct round-trips through a config file and the command line.
#[derive(Serialize, Deserialize, Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Configuration {
    #[clap(short, long, default_value_os_t = default_index_dir())]
    #[serde(default = "default_index_dir")]
    /// Directory to store all persistent state (search index, repo state, logs)
    pub index_dir: PathBuf,

    #[clap(long, default_value_os_t = default_repo_dir())]
    #[serde(default = "default_repo_dir")]
    /// Directory under which cloned/copied repositories live
    pub repo_dir: PathBuf,

    #[clap(long, default_value_t = default_host())]
    #[serde(default = "default_host")]
    /// Bind the webserver to `<host>`
    pub host: String,

    #[clap(long, default_value_t = default_port())]
    #[serde(default = "default_port")]
    /// Bind the webserver to `<port>`
    pub port: u16,

    #[clap(long)]
    #[serde(default)]
    /// Serve a single client over newline-framed stdio instead of HTTP/WS
    pub stdio: bool,

    #[clap(long, default_value_t = default_max_file_size())]
    #[serde(default = "default_max_file_size")]
    /// Files larger than this many bytes are not indexed
    pub max_file_size: u64,

    #[clap(long, default_value_t = default_max_connections())]
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[clap(long, default_value_t = default_chunk_strategy())]
    #[serde(default = "default_chunk_strategy")]
    /// Chunking strategy: semantic, line_window or hybrid
    pub chunk_strategy: String,

    #[clap(long, default_value_t = default_chunk_window())]
    #[serde(default = "default_chunk_window")]
    /// Window size in lines for line-window chunking
    pub chunk_window: usize,

    #[clap(long, default_value_t = default_chunk_overlap())]
    #[serde(default = "default_chunk_overlap")]
    /// Overlap in lines between consecutive line-window chunks
    pub chunk_overlap: usize,

    #[clap(long, default_value_t = default_context_before())]
    #[serde(default = "default_context_before")]
    /// Lines of context captured before a semantic chunk
    pub chunk_context_before: usize,

    #[clap(long, default_value_t = default_context_after())]
    #[serde(default = "default_context_after")]
    /// Lines of context captured after a semantic chunk
    pub chunk_context_after: usize,

    #[clap(long, default_value_t = default_max_chunk_lines())]
    #[serde(default = "default_max_chunk_lines")]
    /// Semantic chunks longer than this are subdivided
    pub max_chunk_lines: usize,

    #[clap(long, default_value_t = default_fuzzy_distance())]
    #[serde(default = "default_fuzzy_distance")]
    /// Edit distance for fuzzy search terms
    pub fuzzy_distance: u8,

    #[clap(long)]
    #[serde(default)]
    /// Give every session with a workspace its own index partition
    pub isolate_workspaces: bool,

    #[clap(long)]
    #[serde(default)]
    /// Prefer incremental re-indexing when a baseline commit is known
    pub incremental: bool,

    #[clap(long, default_value_t = default_recovery())]
    #[serde(default = "default_recovery")]
    /// Convert handler panics into structured errors instead of crashing
    pub recovery: bool,

    #[clap(long, default_value_t = default_session_cleanup_secs())]
    #[serde(default = "default_session_cleanup_secs")]
    pub session_cleanup_secs: u64,

    #[clap(long, default_value_t = default_session_inactive_secs())]
    #[serde(default = "default_session_inactive_secs")]
    /// Sessions idle for longer than this are garbage collected (2h)
    pub session_inactive_secs: u64,

    #[clap(long, default_value_t = default_lock_ttl_secs())]
    #[serde(default = "default_lock_ttl_secs")]
    /// Hard expiry on granted locks
    pub lock_ttl_secs: u64,

    #[clap(long, default_value_t = default_lock_timeout_secs())]
    #[serde(default = "default_lock_timeout_secs")]
    /// How long a request waits in a lock queue before giving up
    pub lock_timeout_secs: u64,

    #[clap(long, default_value_t = default_operation_timeout_secs())]
    #[serde(default = "default_operation_timeout_secs")]
    /// Wall-clock budget for a single tool call
    pub operation_timeout_secs: u64,

    #[clap(long, default_value_t = default_connection_idle_secs())]
    #[serde(default = "default_connection_idle_secs")]
    pub connection_idle_secs: u64,

    #[clap(long, default_value_t = default_max_concurrent_indexes())]
    #[serde(default = "default_max_concurrent_indexes")]
    /// How many different repositories may index in parallel
    pub max_concurrent_indexes: usize,
}

impl Configuration {
    /// Directory where logs are written to
    pub fn log_dir(&self) -> PathBuf {
        self.index_dir.join("logs")
    }

    /// Directory holding the tantivy index files
    pub fn search_index_path(&self) -> PathBuf {
        self.index_dir.join("search")
    }

    /// File holding the serialized repository pool
    pub fn repo_state_file(&self) -> PathBuf {
        self.index_dir.join("repos.json")
    }

    /// Root for per-session index partitions
    pub fn sessions_dir(&self) -> PathBuf {
        self.index_dir.join("sessions")
    }

    /// Clone of this configuration rewritten for one isolated session. The
    /// session gets its own index partition and repo root keyed by id, so two
    /// sessions never see each other's documents.
    pub fn scoped_to_session(&self, session_id: &str, workspace_dir: &PathBuf) -> Configuration {
        let mut scoped = self.clone();
        scoped.index_dir = self.sessions_dir().join(session_id);
        scoped.repo_dir = workspace_dir.clone();
        scoped
    }
}

fn default_index_dir() -> PathBuf {
    match directories::ProjectDirs::from("dev", "codescout", "codescout") {
        Some(dirs) => dirs.data_dir().to_owned(),
        None => "codescout_data".into(),
    }
}

fn default_repo_dir() -> PathBuf {
    default_index_dir().join("repos")
}

fn default_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_port() -> u16 {
    52232
}

fn default_max_file_size() -> u64 {
    1024 * 1024
}

fn default_max_connections() -> usize {
    128
}

fn default_chunk_strategy() -> String {
    "hybrid".to_owned()
}

fn default_chunk_window() -> usize {
    60
}

fn default_chunk_overlap() -> usize {
    10
}

fn default_context_before() -> usize {
    3
}

fn default_context_after() -> usize {
    2
}

fn default_max_chunk_lines() -> usize {
    120
}

fn default_fuzzy_distance() -> u8 {
    2
}

fn default_recovery() -> bool {
    true
}

fn default_session_cleanup_secs() -> u64 {
    300
}

fn default_session_inactive_secs() -> u64 {
    2 * 60 * 60
}

fn default_lock_ttl_secs() -> u64 {
    5 * 60
}

fn default_lock_timeout_secs() -> u64 {
    30
}

fn default_operation_timeout_secs() -> u64 {
    5 * 60
}

fn default_connection_idle_secs() -> u64 {
    5 * 60
}

fn default_max_concurrent_indexes() -> usize {
    2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(dir: &std::path::Path) -> Configuration {
        let mut config: Configuration = serde_json::from_str("{}").unwrap();
        config.index_dir = dir.to_path_buf();
        config
    }

    #[test]
    fn serde_defaults_fill_every_field() {
        let config: Configuration = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_file_size, 1024 * 1024);
        assert_eq!(config.session_inactive_secs, 7200);
        assert_eq!(config.fuzzy_distance, 2);
        assert!(config.recovery);
    }

    #[test]
    fn session_scoping_rewrites_state_dirs() {
        let config = base_config(std::path::Path::new("/tmp/base"));
        let ws = PathBuf::from("/work/a");
        let scoped = config.scoped_to_session("s-1", &ws);
        assert_eq!(scoped.index_dir, PathBuf::from("/tmp/base/sessions/s-1"));
        assert_eq!(scoped.repo_dir, ws);
        // the base config is untouched
        assert_eq!(config.index_dir, PathBuf::from("/tmp/base"));
    }
}
