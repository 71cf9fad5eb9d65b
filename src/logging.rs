//! Logging setup.
//!
//! Configures `tracing` with a stderr layer (for interactive use and
//! container log collection) plus a daily-rotating file layer backed by the
//! configured `log_directory`/`logfile_name`, replacing the source daemon's
//! `TimedRotatingFileHandler`.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::format::FmtSpan, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

/// Initialize global tracing. The returned [`WorkerGuard`] must be kept
/// alive for the lifetime of the process, or buffered file log lines may be
/// dropped on exit.
pub fn init(config: &LoggingConfig) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(&config.log_directory, &config.logfile_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging_level));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}
