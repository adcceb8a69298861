use anyhow::Result;
use clap::Parser;
use codescout::application::{config::Configuration, logging, Application};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let configuration = Configuration::parse();

    // the guard flushes the rolling log file when main returns
    let _log_guard = logging::init(&configuration);
    let stdio = configuration.stdio;

    let application = Application::initialize(configuration).await?;
    application.spawn_background();
    info!(version = codescout::protocol::SERVER_VERSION, "codescout starting");

    // ctrl-c cancels the root token; transports drain and exit cleanly
    let shutdown_app = application.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown_app.shutdown();
        }
    });

    let result = if stdio {
        codescout::stdio::run(application).await
    } else {
        codescout::webserver::start(application).await
    };

    if let Err(err) = &result {
        error!(?err, "server failed");
    }
    result
}
