use std::{fs, path::Path};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::{PipelineError, Result};

/// Installs a console layer plus a JSON file layer rolling daily under `<log_root>/logs`.
///
/// The returned guard owns the file writer's worker thread; hold it until the
/// program exits so queued lines reach the file.
pub fn init_logging<P: AsRef<Path>>(log_root: P) -> Result<WorkerGuard> {
    let log_dir = log_root.as_ref().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "owntrack.log");
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer().json().with_writer(non_blocking_writer);
    let console_layer = fmt::layer().with_target(false).with_writer(std::io::stderr);

    // RUST_LOG wins when set.
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("owntrack=info,warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| PipelineError::Logging(e.to_string()))?;

    Ok(guard)
}
