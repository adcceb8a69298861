mod api;
mod types;
mod ws;

use std::net::SocketAddr;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Extension;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer};
use tracing::info;

use crate::application::Application;

pub type Router<S = Application> = axum::Router<S>;

pub fn router(app: Application) -> axum::Router {
    let api = Router::new()
        .route("/health", get(api::health))
        .route("/tools", get(api::tools))
        .route("/call", post(api::call))
        .route(
            "/sessions",
            get(api::list_sessions).post(api::create_session),
        )
        .route("/connections", get(api::list_connections));

    axum::Router::new()
        .nest("/api", api)
        .route("/ws", get(ws::upgrade))
        .layer(Extension(app.clone()))
        .with_state(app)
        .layer(CorsLayer::permissive())
        .layer(CatchPanicLayer::new())
}

/// Bind and serve until the application token cancels. A port already in
/// use surfaces as a startup error (non-zero exit), never a panic.
pub async fn start(app: Application) -> anyhow::Result<()> {
    let bind = SocketAddr::new(
        app.config.host.parse().context("invalid bind host")?,
        app.config.port,
    );
    let cancel = app.cancel.clone();
    let router = router(app);

    info!(%bind, "webserver listening");
    axum::Server::try_bind(&bind)
        .with_context(|| format!("could not bind {bind}"))?
        .serve(router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    Ok(())
}
