use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogConfig;

/// Installs the global subscriber. The terminal belongs to the UI, so events
/// go to the configured log file and are dropped when there is none.
pub fn init(cfg: &LogConfig) -> Result<()> {
    let Some(path) = cfg.file.as_deref() else {
        return Ok(());
    };
    let file = open_log_file(path)?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .unwrap_or_else(|_| EnvFilter::new("posts_tui=info"));

    fmt()
        .with_env_filter(env_filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .map_err(|err| anyhow::anyhow!("install tracing subscriber: {err}"))?;
    tracing::info!(version = crate::VERSION, "logging started");
    Ok(())
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open log file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_missing_log_directory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("posts-tui.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn no_file_means_no_subscriber() {
        let cfg = LogConfig {
            level: "debug".into(),
            file: None,
        };
        init(&cfg).unwrap();
    }
}
