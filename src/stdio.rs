use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::application::Application;
use crate::connection::ConnectionType;
use crate::protocol::{handle_request, RpcRequest, RpcResponse};

/// Serve a single client over newline-framed JSON on stdio: one request per
/// line in, one response per line out. Requests are handled strictly one at
/// a time, which is the ordering contract of this transport.
pub async fn run(app: Application) -> anyhow::Result<()> {
    let connection = app
        .connections
        .register(ConnectionType::Stdio, None, None)?;
    info!(connection_id = %connection.id, "serving on stdio");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut lines = stdin.lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = app.cancel.cancelled() => break,
            _ = connection.cancel.cancelled() => break,
        };
        let line = match line {
            Some(line) => line,
            None => break, // EOF: client went away
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<RpcRequest>(&line) {
            Ok(request) => {
                app.connections.touch(&connection.id);
                handle_request(
                    &app,
                    request,
                    connection.session_id.as_deref(),
                    connection.cancel.child_token(),
                )
                .await
            }
            Err(err) => {
                warn!(%err, "dropping malformed stdio frame");
                RpcResponse::parse_error()
            }
        };

        let mut payload = serde_json::to_vec(&response)?;
        payload.push(b'\n');
        stdout.write_all(&payload).await?;
        stdout.flush().await?;
    }

    debug!("stdio transport shutting down");
    app.connections.close(&connection.id);
    Ok(())
}
