use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::errors::{ToolError, ToolResult};

#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    Stdio,
    Http,
    Ws,
}

/// One live transport connection. Closing a connection cancels its token
/// (tearing down any in-flight request) and dissociates, but does not
/// destroy, its session.
#[derive(Clone, Debug)]
pub struct Connection {
    pub id: String,
    pub conn_type: ConnectionType,
    pub remote_addr: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub active: bool,
    pub cancel: CancellationToken,
}

#[derive(Serialize, Clone, Debug)]
pub struct ConnectionInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub conn_type: ConnectionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub active: bool,
}

impl Connection {
    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            conn_type: self.conn_type,
            remote_addr: self.remote_addr.clone(),
            user_agent: self.user_agent.clone(),
            session_id: self.session_id.clone(),
            created_at: self.created_at,
            last_active: self.last_active,
            active: self.active,
        }
    }
}

/// Registry of live connections, enforcing the connection cap and sweeping
/// idle ones.
pub struct ConnectionManager {
    connections: scc::HashMap<String, Connection>,
    max_connections: usize,
    idle_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(max_connections: usize, idle_timeout: Duration) -> Self {
        Self {
            connections: scc::HashMap::default(),
            max_connections,
            idle_timeout,
        }
    }

    /// Admit a new connection, or refuse with a clear error when the process
    /// is at capacity.
    pub fn register(
        &self,
        conn_type: ConnectionType,
        remote_addr: Option<String>,
        user_agent: Option<String>,
    ) -> ToolResult<Connection> {
        if self.connections.len() >= self.max_connections {
            return Err(ToolError::resource_exhausted(format!(
                "connection limit reached ({} active)",
                self.max_connections
            )));
        }
        let now = Utc::now();
        let connection = Connection {
            id: uuid::Uuid::new_v4().to_string(),
            conn_type,
            remote_addr,
            user_agent,
            session_id: None,
            created_at: now,
            last_active: now,
            active: true,
            cancel: CancellationToken::new(),
        };
        let _ = self
            .connections
            .insert(connection.id.clone(), connection.clone());
        debug!(connection_id = %connection.id, ?conn_type, "connection registered");
        Ok(connection)
    }

    pub fn touch(&self, id: &str) {
        let _ = self.connections.update(&id.to_owned(), |_, conn| {
            conn.last_active = Utc::now();
        });
    }

    /// Associate the connection with a resolved session.
    pub fn bind_session(&self, id: &str, session_id: &str) {
        let _ = self.connections.update(&id.to_owned(), |_, conn| {
            conn.session_id = Some(session_id.to_owned());
        });
    }

    /// Cancel and drop the connection. The session it pointed at stays.
    pub fn close(&self, id: &str) {
        if let Some((_, connection)) = self.connections.remove(&id.to_owned()) {
            connection.cancel.cancel();
            debug!(connection_id = %id, "connection closed");
        }
    }

    pub fn list(&self) -> Vec<ConnectionInfo> {
        let mut out = Vec::new();
        self.connections.scan(|_, conn| out.push(conn.info()));
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        out
    }

    pub fn stats_by_type(&self) -> BTreeMap<ConnectionType, usize> {
        let mut stats = BTreeMap::new();
        self.connections.scan(|_, conn| {
            *stats.entry(conn.conn_type).or_insert(0) += 1;
        });
        stats
    }

    pub fn active_count(&self) -> usize {
        self.connections.len()
    }

    /// Cancel and remove connections idle past the timeout.
    pub fn sweep_idle(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.idle_timeout)
                .unwrap_or_else(|_| chrono::Duration::minutes(5));
        let mut idle = Vec::new();
        self.connections.scan(|id, conn| {
            if conn.last_active < cutoff {
                idle.push(id.clone());
            }
        });
        for id in &idle {
            self.close(id);
        }
        idle.len()
    }

    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let swept = manager.sweep_idle();
                        if swept > 0 {
                            info!(swept, "closed idle connections");
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        });
    }
}
