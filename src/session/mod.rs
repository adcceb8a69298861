use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::application::config::Configuration;
use crate::errors::{ToolError, ToolResult};

/// Id of the shared fallback session used by requests that carry no session
/// id at all.
pub const ANONYMOUS_SESSION: &str = "anonymous";

/// Per-client state. Sessions are created on first contact or explicit
/// request, touched on every call that resolves to them, garbage collected
/// after inactivity and never survive a restart.
#[derive(Clone, Debug)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub workspace_dir: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub active: bool,
    /// Copy-on-create of the process config, possibly rewritten for
    /// workspace isolation. Copied, not shared, to keep lifetimes acyclic.
    pub config: Configuration,
    pub context: HashMap<String, serde_json::Value>,
}

/// The subset of a session that rides along on tool responses.
#[derive(Serialize, Clone, Debug)]
pub struct SessionInfo {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
    pub active: bool,
}

impl Session {
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            workspace_dir: self.workspace_dir.clone(),
            created_at: self.created_at,
            last_access: self.last_access,
            active: self.active,
        }
    }
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionStats {
    pub active: usize,
    pub inactive: usize,
    pub total: usize,
}

/// Process-wide session registry: one object guarding a concurrent map.
pub struct SessionManager {
    sessions: scc::HashMap<String, Session>,
    base_config: Configuration,
    inactive_threshold: Duration,
}

impl SessionManager {
    pub fn new(base_config: Configuration) -> Self {
        let inactive_threshold = Duration::from_secs(base_config.session_inactive_secs);
        Self {
            sessions: scc::HashMap::default(),
            base_config,
            inactive_threshold,
        }
    }

    pub fn create_session(&self, name: &str, workspace_dir: Option<PathBuf>) -> Session {
        let id = uuid::Uuid::new_v4().to_string();
        self.create_with_id(&id, name, workspace_dir)
    }

    fn create_with_id(&self, id: &str, name: &str, workspace_dir: Option<PathBuf>) -> Session {
        let now = Utc::now();
        let config = match (&workspace_dir, self.base_config.isolate_workspaces) {
            (Some(dir), true) => self.base_config.scoped_to_session(id, dir),
            _ => self.base_config.clone(),
        };
        let session = Session {
            id: id.to_owned(),
            name: name.to_owned(),
            workspace_dir,
            created_at: now,
            last_access: now,
            active: true,
            config,
            context: HashMap::new(),
        };
        let _ = self.sessions.insert(id.to_owned(), session.clone());
        info!(session_id = id, name, "created session");
        session
    }

    pub fn get_session(&self, id: &str) -> ToolResult<Session> {
        self.sessions
            .read(&id.to_owned(), |_, s| s.clone())
            .ok_or_else(|| ToolError::not_found(format!("session {id} not found")))
    }

    /// Resolve or lazily create. A provided id that exists wins; a provided
    /// id that does not exist is created under that id (client-chosen ids);
    /// no id at all yields a fresh session.
    pub fn get_or_create_session(
        &self,
        id: Option<&str>,
        name: &str,
        workspace_dir: Option<PathBuf>,
    ) -> Session {
        match id {
            Some(id) => match self.get_session(id) {
                Ok(session) => session,
                Err(_) => self.create_with_id(id, name, workspace_dir),
            },
            None => self.create_session(name, workspace_dir),
        }
    }

    /// The shared session for requests without any session identity.
    pub fn anonymous_session(&self) -> Session {
        self.get_or_create_session(Some(ANONYMOUS_SESSION), ANONYMOUS_SESSION, None)
    }

    /// Bump `last_access`; every successful tool call that resolves to a
    /// session goes through here.
    pub fn touch(&self, id: &str) {
        let _ = self.sessions.update(&id.to_owned(), |_, session| {
            session.last_access = Utc::now();
        });
    }

    pub fn deactivate_session(&self, id: &str) -> ToolResult<()> {
        let updated = self.sessions.update(&id.to_owned(), |_, session| {
            session.active = false;
        });
        updated.ok_or_else(|| ToolError::not_found(format!("session {id} not found")))
    }

    pub fn remove_session(&self, id: &str) -> ToolResult<()> {
        self.sessions
            .remove(&id.to_owned())
            .map(|_| ())
            .ok_or_else(|| ToolError::not_found(format!("session {id} not found")))
    }

    pub fn update_session_context(
        &self,
        id: &str,
        key: &str,
        value: serde_json::Value,
    ) -> ToolResult<()> {
        let updated = self.sessions.update(&id.to_owned(), |_, session| {
            session.context.insert(key.to_owned(), value.clone());
        });
        updated.ok_or_else(|| ToolError::not_found(format!("session {id} not found")))
    }

    pub fn get_session_context(&self, id: &str, key: &str) -> ToolResult<Option<serde_json::Value>> {
        self.sessions
            .read(&id.to_owned(), |_, session| session.context.get(key).cloned())
            .ok_or_else(|| ToolError::not_found(format!("session {id} not found")))
    }

    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let mut sessions = Vec::new();
        self.sessions.scan(|_, session| sessions.push(session.info()));
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        sessions
    }

    pub fn stats(&self) -> SessionStats {
        let mut active = 0;
        let mut inactive = 0;
        self.sessions.scan(|_, session| {
            if session.active {
                active += 1;
            } else {
                inactive += 1;
            }
        });
        SessionStats {
            active,
            inactive,
            total: active + inactive,
        }
    }

    /// Drop sessions idle past the threshold. Called by the cleanup task.
    pub fn cleanup_expired(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.inactive_threshold)
                .unwrap_or_else(|_| chrono::Duration::hours(2));
        let mut expired = Vec::new();
        self.sessions.scan(|id, session| {
            if session.last_access < cutoff {
                expired.push(id.clone());
            }
        });
        for id in &expired {
            debug!(session_id = %id, "removing inactive session");
            let _ = self.sessions.remove(id);
        }
        expired.len()
    }

    /// Background cleanup; wakes every `interval` until cancelled.
    pub fn spawn_cleanup(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = manager.cleanup_expired();
                        if removed > 0 {
                            info!(removed, "session cleanup removed inactive sessions");
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(index_dir: &std::path::Path, isolate: bool) -> Configuration {
        let mut config: Configuration = serde_json::from_str("{}").unwrap();
        config.index_dir = index_dir.to_path_buf();
        config.isolate_workspaces = isolate;
        config
    }

    #[test]
    fn create_get_touch_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(config(dir.path(), false));
        let session = manager.create_session("editor-1", None);
        let before = manager.get_session(&session.id).unwrap().last_access;
        std::thread::sleep(std::time::Duration::from_millis(5));
        manager.touch(&session.id);
        let after = manager.get_session(&session.id).unwrap().last_access;
        assert!(after > before);
    }

    #[test]
    fn isolation_rewrites_the_session_config() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(config(dir.path(), true));
        let ws = PathBuf::from("/work/a");
        let session = manager.create_session("isolated", Some(ws.clone()));
        assert_eq!(
            session.config.index_dir,
            dir.path().join("sessions").join(&session.id)
        );
        assert_eq!(session.config.repo_dir, ws);

        // without a workspace there is nothing to isolate
        let plain = manager.create_session("plain", None);
        assert_eq!(plain.config.index_dir, dir.path());
    }

    #[test]
    fn get_or_create_reuses_existing_ids() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(config(dir.path(), false));
        let first = manager.get_or_create_session(Some("client-7"), "a", None);
        let second = manager.get_or_create_session(Some("client-7"), "b", None);
        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "a");
    }

    #[test]
    fn anonymous_session_is_shared() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(config(dir.path(), false));
        let a = manager.anonymous_session();
        let b = manager.anonymous_session();
        assert_eq!(a.id, b.id);
        assert_eq!(a.id, ANONYMOUS_SESSION);
    }

    #[test]
    fn context_round_trip_and_stats() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(config(dir.path(), false));
        let session = manager.create_session("ctx", None);
        manager
            .update_session_context(&session.id, "cursor", serde_json::json!({"line": 10}))
            .unwrap();
        let value = manager
            .get_session_context(&session.id, "cursor")
            .unwrap()
            .unwrap();
        assert_eq!(value["line"], 10);
        assert!(manager.get_session_context(&session.id, "missing").unwrap().is_none());

        manager.deactivate_session(&session.id).unwrap();
        let stats = manager.stats();
        assert_eq!(stats.inactive, 1);
        assert_eq!(stats.total, 1);
    }

    #[test]
    fn cleanup_removes_only_stale_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), false);
        cfg.session_inactive_secs = 0;
        let manager = SessionManager::new(cfg);
        let _stale = manager.create_session("stale", None);
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(manager.cleanup_expired(), 1);
        assert_eq!(manager.stats().total, 0);
    }

    #[test]
    fn removing_unknown_session_errors() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(config(dir.path(), false));
        let err = manager.remove_session("ghost").unwrap_err();
        assert_eq!(err.kind, crate::errors::ErrorKind::NotFound);
    }
}
