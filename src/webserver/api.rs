use std::path::PathBuf;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::application::Application;
use crate::connection::ConnectionType;
use crate::errors::ToolError;
use crate::protocol::{SERVER_NAME, SERVER_VERSION};
use crate::session::SessionStats;
use crate::tools::ToolCall;

use super::types::{failure, reply, Payload};

pub const SESSION_HEADER: &str = "x-session-id";

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime: u64,
    sessions: SessionStats,
    connections: usize,
}

impl Payload for HealthResponse {}

pub(super) async fn health(State(app): State<Application>) -> impl IntoResponse {
    reply(HealthResponse {
        status: "ok",
        version: SERVER_VERSION,
        uptime: app.uptime_secs(),
        sessions: app.sessions.stats(),
        connections: app.connections.active_count(),
    })
}

#[derive(Serialize)]
pub(crate) struct ToolsResponse {
    tools: Vec<crate::tools::ToolDescriptor>,
    total: usize,
    categories: Vec<&'static str>,
    server_info: Value,
}

impl Payload for ToolsResponse {}

pub(super) async fn tools(State(app): State<Application>) -> impl IntoResponse {
    reply(ToolsResponse {
        tools: app.tools.list(),
        total: app.tools.len(),
        categories: app.tools.categories(),
        server_info: serde_json::json!({
            "name": SERVER_NAME,
            "version": SERVER_VERSION,
        }),
    })
}

#[derive(Deserialize)]
pub(crate) struct CallBody {
    tool: String,
    #[serde(default)]
    arguments: Value,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct CallResponse {
    success: bool,
    tool: String,
    result: Value,
}

impl Payload for CallResponse {}

/// `POST /api/call`. Each HTTP call registers as a short-lived connection
/// so the cap and the stats see it.
pub(super) async fn call(
    State(app): State<Application>,
    headers: HeaderMap,
    axum::Json(body): axum::Json<CallBody>,
) -> impl IntoResponse {
    let connection = match app.connections.register(
        ConnectionType::Http,
        None,
        header_string(&headers, "user-agent"),
    ) {
        Ok(connection) => connection,
        Err(err) => return failure(err),
    };

    // the session id may ride in the body or in the X-Session-ID header
    let header_session = header_string(&headers, SESSION_HEADER);
    let call = ToolCall {
        tool: body.tool.clone(),
        arguments: body.arguments,
        session_id: body.session_id,
    };
    debug!(tool = %call.tool, "http tool call");

    let outcome = app
        .tools
        .dispatch(
            &app,
            call,
            header_session.as_deref(),
            connection.cancel.child_token(),
        )
        .await;
    app.connections.close(&connection.id);

    match outcome {
        Ok(result) => reply(CallResponse {
            success: true,
            tool: body.tool,
            result,
        }),
        Err(err) => failure(err),
    }
}

#[derive(Serialize)]
pub(crate) struct SessionsResponse {
    sessions: Vec<crate::session::SessionInfo>,
    stats: SessionStats,
}

impl Payload for SessionsResponse {}

pub(super) async fn list_sessions(State(app): State<Application>) -> impl IntoResponse {
    reply(SessionsResponse {
        sessions: app.sessions.list_sessions(),
        stats: app.sessions.stats(),
    })
}

#[derive(Deserialize)]
pub(crate) struct CreateSessionBody {
    name: String,
    #[serde(default)]
    workspace_dir: Option<PathBuf>,
}

#[derive(Serialize)]
pub(crate) struct SessionCreatedResponse {
    session: crate::session::SessionInfo,
}

impl Payload for SessionCreatedResponse {}

pub(super) async fn create_session(
    State(app): State<Application>,
    axum::Json(body): axum::Json<CreateSessionBody>,
) -> impl IntoResponse {
    if body.name.trim().is_empty() {
        return failure(ToolError::invalid_argument("session name must not be empty"));
    }
    let session = app.sessions.create_session(&body.name, body.workspace_dir);
    reply(SessionCreatedResponse {
        session: session.info(),
    })
}

#[derive(Serialize)]
pub(crate) struct ConnectionsResponse {
    connections: Vec<crate::connection::ConnectionInfo>,
    by_type: std::collections::BTreeMap<ConnectionType, usize>,
    total: usize,
}

impl Payload for ConnectionsResponse {}

pub(super) async fn list_connections(State(app): State<Application>) -> impl IntoResponse {
    reply(ConnectionsResponse {
        connections: app.connections.list(),
        by_type: app.connections.stats_by_type(),
        total: app.connections.active_count(),
    })
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}
