use anyhow::{Context, Result};
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Initializes tracing output.
///
/// With `enabled` the subscriber appends to `log_path` (parent directories
/// created as needed); otherwise it writes to stdout. `VOICY_LOG` overrides
/// the level filter. Safe to call more than once: the host application may
/// route several FFI entry points through here, so a second call is a no-op
/// rather than a panic.
///
/// # Errors
/// Returns error if the log file or its directory cannot be created.
pub fn init(enabled: bool, log_path: &str) -> Result<()> {
    let filter = EnvFilter::try_from_env("VOICY_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    if !enabled {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init();
        return Ok(());
    }

    let expanded_path = expand_log_path(log_path)?;

    if let Some(parent) = expanded_path.parent() {
        fs::create_dir_all(parent).context("failed to create log directory")?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&expanded_path)
        .context("failed to open log file")?;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(file)
        .with_target(false)
        .with_ansi(false)
        .try_init();

    tracing::info!("telemetry initialized: {}", expanded_path.display());

    Ok(())
}

fn expand_log_path(path: &str) -> Result<PathBuf> {
    if let Some(stripped) = path.strip_prefix("~/") {
        let home = std::env::var("HOME").context("HOME environment variable not set")?;
        Ok(PathBuf::from(home).join(stripped))
    } else {
        Ok(PathBuf::from(path))
    }
}
