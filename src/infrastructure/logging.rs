//! Logging initialization
//!
//! Console output always; file output (non-blocking, one file per run,
//! timestamped name) when enabled. The appender guard is returned to
//! the caller and must be held for the lifetime of the run or buffered
//! lines are lost on exit.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::infrastructure::config::LoggingConfig;

/// Initialize the tracing subscriber from config. Returns the file
/// writer guard when file output is enabled.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mowaffer_scraper={}", config.level)));

    let console_layer = fmt::layer().with_target(false);

    if !config.file_output {
        tracing_subscriber::registry()
            .with(filter)
            .with(console_layer)
            .init();
        return Ok(None);
    }

    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("creating log directory {}", config.log_dir.display()))?;
    let file_name = format!("scraper_{}.log", chrono::Utc::now().format("%Y%m%d_%H%M%S"));
    let appender = tracing_appender::rolling::never(&config.log_dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer().with_writer(writer).with_ansi(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(Some(guard))
}
