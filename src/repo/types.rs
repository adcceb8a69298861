use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stable identity of a repository: blake3 of the canonical url (remote) or
/// the absolute path (local), truncated to 16 hex chars. Never derived from
/// wall-clock time, so re-registering the same source yields the same id.
pub fn repo_id(origin: &str) -> String {
    let hash = blake3::hash(origin.as_bytes());
    hash.to_hex().as_str()[..16].to_owned()
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Debug)]
#[serde(rename_all = "snake_case")]
pub enum IndexingMode {
    Full,
    Incremental,
}

impl Default for IndexingMode {
    fn default() -> Self {
        IndexingMode::Full
    }
}

/// One `[submodule]` entry from a repo's `.gitmodules`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Submodule {
    pub name: String,
    pub path: String,
    pub url: Option<String>,
}

/// The repository record kept in the pool and returned by the tools.
/// Created on first index, mutated only by the indexer, removed explicitly.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Repository {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indexed_at: Option<DateTime<Utc>>,
    pub file_count: u64,
    pub total_lines: u64,
    /// Languages seen in this repo, most common first
    pub languages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Commit hash the index was last built against, when the repo is a git
    /// checkout. Drives incremental re-indexing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_indexed_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub submodules: Vec<Submodule>,
    #[serde(default)]
    pub indexing_mode: IndexingMode,
}

impl Repository {
    pub fn new(id: String, name: String, path: PathBuf, url: Option<String>) -> Self {
        Self {
            id,
            name,
            path,
            url,
            indexed_at: None,
            file_count: 0,
            total_lines: 0,
            languages: Vec::new(),
            last_commit: None,
            branch: None,
            last_indexed_hash: None,
            submodules: Vec::new(),
            indexing_mode: IndexingMode::Full,
        }
    }
}

/// Parse `.gitmodules` into submodule records. The format is a small INI
/// dialect; we only care about `[submodule "name"]` sections with `path` and
/// `url` keys.
pub fn parse_gitmodules(content: &str) -> Vec<Submodule> {
    let mut out = Vec::new();
    let mut current: Option<Submodule> = None;

    for line in content.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("[submodule") {
            if let Some(sub) = current.take() {
                if !sub.path.is_empty() {
                    out.push(sub);
                }
            }
            let name = rest
                .trim_start_matches(|c: char| c.is_whitespace() || c == '"')
                .trim_end_matches(|c: char| c == ']' || c == '"' || c.is_whitespace())
                .to_owned();
            current = Some(Submodule {
                name,
                path: String::new(),
                url: None,
            });
        } else if let Some(sub) = current.as_mut() {
            if let Some((key, value)) = line.split_once('=') {
                match key.trim() {
                    "path" => sub.path = value.trim().to_owned(),
                    "url" => sub.url = Some(value.trim().to_owned()),
                    _ => {}
                }
            }
        }
    }
    if let Some(sub) = current {
        if !sub.path.is_empty() {
            out.push(sub);
        }
    }
    out
}

pub fn read_submodules(repo_root: &Path) -> Vec<Submodule> {
    match std::fs::read_to_string(repo_root.join(".gitmodules")) {
        Ok(content) => parse_gitmodules(&content),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_id_is_stable_and_short() {
        let a = repo_id("/home/user/project");
        let b = repo_id("/home/user/project");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, repo_id("/home/user/other"));
    }

    #[test]
    fn gitmodules_parsing() {
        let content = r#"
[submodule "libfoo"]
	path = vendor/libfoo
	url = https://example.com/libfoo.git
[submodule "bare"]
	path = third_party/bare
"#;
        let subs = parse_gitmodules(content);
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].name, "libfoo");
        assert_eq!(subs[0].path, "vendor/libfoo");
        assert_eq!(subs[0].url.as_deref(), Some("https://example.com/libfoo.git"));
        assert_eq!(subs[1].url, None);
    }

    #[test]
    fn gitmodules_without_path_is_dropped() {
        let subs = parse_gitmodules("[submodule \"x\"]\n\turl = https://x\n");
        assert!(subs.is_empty());
    }
}
