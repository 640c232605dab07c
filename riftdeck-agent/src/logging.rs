//! Logging setup
//!
//! stdout belongs to the host bridge, so logs go to stderr or to a file.
//! Filter: `RIFTDECK_LOG`, else the configured level.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

pub const LOG_ENV: &str = "RIFTDECK_LOG";
pub const LOG_FILE_ENV: &str = "RIFTDECK_LOG_FILE";

fn filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("riftdeck_agent=info"))
}

fn log_file(config: &LoggingConfig) -> Option<PathBuf> {
    std::env::var(LOG_FILE_ENV)
        .ok()
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .or_else(|| config.file.clone())
}

/// Install the global subscriber; a second call is a no-op
pub fn init(config: &LoggingConfig) -> Result<()> {
    let builder = tracing_subscriber::fmt().with_env_filter(filter(config));

    match log_file(config) {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log dir {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let _ = builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .try_init();
        }
        None => {
            let _ = builder.with_writer(std::io::stderr).try_init();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_used_without_env() {
        if std::env::var(LOG_FILE_ENV).is_ok() {
            return;
        }
        let config = LoggingConfig { level: "debug".into(), file: Some(PathBuf::from("/tmp/x.log")) };
        assert_eq!(log_file(&config), Some(PathBuf::from("/tmp/x.log")));
        assert_eq!(log_file(&LoggingConfig { file: None, ..config }), None);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            level: "riftdeck_agent=debug".into(),
            file: Some(dir.path().join("logs").join("agent.log")),
        };
        init(&config).unwrap();
        init(&config).unwrap();
    }
}
