//! Tracing setup for the binary.
//!
//! Reads `RUST_LOG`, defaulting to `info`. Output goes to stderr, or to a file
//! when one is given, so stdout stays reserved for the JSON report.

use std::path::Path;

use clap::ValueEnum;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Compact,
    /// One JSON object per event, for log collectors
    Json,
}

/// Installs the global subscriber. Keep the returned guard alive until exit,
/// buffered events are flushed when it drops.
pub fn init(format: LogFormat, log_file: Option<&Path>) -> anyhow::Result<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (writer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or(Path::new("."));
            std::fs::create_dir_all(dir)?;
            let file_name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("log file path has no file name: {}", path.display()))?;
            tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name))
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Compact => registry
            .with(fmt::layer().with_writer(writer).with_ansi(log_file.is_none()).compact())
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().with_writer(writer).json())
            .try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))?;

    Ok(guard)
}
