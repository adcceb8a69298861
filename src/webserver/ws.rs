use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use std::net::SocketAddr;
use tracing::{debug, info, warn};

use crate::application::Application;
use crate::connection::ConnectionType;
use crate::protocol::{handle_request, RpcRequest, RpcResponse};

/// Upgrade handler: same call/response envelopes as stdio, one JSON frame
/// per message.
pub(super) async fn upgrade(
    State(app): State<Application>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve(app, socket, addr))
}

async fn serve(app: Application, mut socket: WebSocket, addr: SocketAddr) {
    let connection = match app
        .connections
        .register(ConnectionType::Ws, Some(addr.to_string()), None)
    {
        Ok(connection) => connection,
        Err(err) => {
            // at capacity: tell the client why before hanging up
            let refusal = RpcResponse::err(serde_json::Value::Null, err.kind.rpc_code(), err.message);
            if let Ok(payload) = serde_json::to_string(&refusal) {
                let _ = socket.send(Message::Text(payload)).await;
            }
            let _ = socket.close().await;
            return;
        }
    };
    info!(connection_id = %connection.id, %addr, "websocket connected");

    loop {
        let message = tokio::select! {
            message = socket.recv() => message,
            _ = connection.cancel.cancelled() => break,
            _ = app.cancel.cancelled() => break,
        };
        let message = match message {
            Some(Ok(message)) => message,
            Some(Err(err)) => {
                debug!(%err, "websocket receive error");
                break;
            }
            None => break,
        };

        let text = match message {
            Message::Text(text) => text,
            Message::Ping(payload) => {
                let _ = socket.send(Message::Pong(payload)).await;
                continue;
            }
            Message::Close(_) => break,
            _ => continue,
        };

        app.connections.touch(&connection.id);
        let response = match serde_json::from_str::<RpcRequest>(&text) {
            Ok(request) => {
                let response = handle_request(
                    &app,
                    request,
                    current_session(&app, &connection.id).as_deref(),
                    connection.cancel.child_token(),
                )
                .await;
                bind_session_from(&app, &connection.id, &response);
                response
            }
            Err(err) => {
                warn!(%err, "dropping malformed websocket frame");
                RpcResponse::parse_error()
            }
        };

        match serde_json::to_string(&response) {
            Ok(payload) => {
                if socket.send(Message::Text(payload)).await.is_err() {
                    break;
                }
            }
            Err(err) => {
                warn!(%err, "failed to serialize websocket response");
                break;
            }
        }
    }

    debug!(connection_id = %connection.id, "websocket disconnected");
    app.connections.close(&connection.id);
}

fn current_session(app: &Application, connection_id: &str) -> Option<String> {
    app.connections
        .list()
        .into_iter()
        .find(|c| c.id == connection_id)
        .and_then(|c| c.session_id)
}

/// Remember the session a response resolved to, so later frames on this
/// connection inherit it without repeating the id.
fn bind_session_from(app: &Application, connection_id: &str, response: &RpcResponse) {
    let session_id = response
        .result
        .as_ref()
        .and_then(|result| result.get("session_info"))
        .and_then(|info| info.get("id"))
        .and_then(|id| id.as_str());
    if let Some(session_id) = session_id {
        app.connections.bind_session(connection_id, session_id);
    }
}
