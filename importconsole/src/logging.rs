use crate::config::LogLevel;
use crate::error::{AppError, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

pub const LOG_FILE_NAME: &str = "importconsole.log";

/// Filter for the stderr layer.
fn console_filter(verbose: bool, quiet: bool) -> EnvFilter {
    if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    }
}

/// Install the global subscriber.
///
/// With `log` set, records at that level also go to `importconsole.log` in
/// `work_dir`; the returned guard flushes the file writer and has to live
/// until the process exits.
pub fn init_logging(
    verbose: bool,
    quiet: bool,
    log: Option<LogLevel>,
    work_dir: &Path,
) -> Result<Option<WorkerGuard>> {
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(verbose)
        .with_filter(console_filter(verbose, quiet));

    let (file, guard) = match log {
        Some(level) => {
            std::fs::create_dir_all(work_dir)?;
            let appender = tracing_appender::rolling::never(work_dir, LOG_FILE_NAME);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(EnvFilter::new(level.as_filter()));
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))?;

    Ok(guard)
}
