use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use super::config::Configuration;

/// Wire up process logging: `RUST_LOG`-filtered human output on stderr
/// (stdout stays reserved for the stdio transport) plus a daily-rolled file
/// under `<index_dir>/logs`. The file writer is non-blocking; dropping the
/// returned guard flushes it, so the binary keeps the guard alive for the
/// life of the process.
///
/// Returns `None` when a subscriber is already installed, which happens
/// under test harnesses and embedders; logging then goes wherever they
/// pointed it.
pub fn init(config: &Configuration) -> Option<WorkerGuard> {
    let (file_writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(
        config.log_dir(),
        "codescout.log",
    ));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(EnvFilter::from_default_env()),
        )
        .try_init()
        .ok()?;

    Some(guard)
}
