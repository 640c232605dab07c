//! Configuration management
//!
//! Handles:
//! - Local client discovery settings (lockfiles, process names)
//! - Endpoint polling table
//! - Monitor / render / store timings
//! - Logging preferences
//!
//! Loaded from TOML at `RIFTDECK_CONFIG` or the OS config directory.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::poller::EndpointConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub client: ClientConfig,
    pub polling: PollingConfig,
    pub monitor: MonitorConfig,
    pub live: LiveConfig,
    pub render: RenderConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub lockfile_paths: Vec<PathBuf>,
    pub process_names: Vec<String>,
    pub validation_path: String,
    pub version_url: String,
    pub fallback_version: String,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub endpoints: Vec<EndpointConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub check_interval_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub max_reconnect_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub base_url: String,
    pub path: String,
    pub poll_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub throttle_interval_ms: u64,
    pub retry_delay_ms: u64,
    pub max_retries: u32,
    pub cleanup_interval_ms: u64,
    pub staleness_window_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: Option<PathBuf>,
    pub autosave_interval_ms: u64,
    pub cache_max_age_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            lockfile_paths: default_lockfile_paths(),
            process_names: vec!["LeagueClientUx".to_string(), "LeagueClientUx.exe".to_string()],
            validation_path: "/riotclient/region-locale".to_string(),
            version_url: "https://ddragon.leagueoflegends.com/api/versions.json".to_string(),
            fallback_version: "14.23.1".to_string(),
            request_timeout_ms: 5_000,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { endpoints: EndpointConfig::defaults() }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 5_000,
            reconnect_base_delay_ms: 2_000,
            max_reconnect_attempts: 5,
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            base_url: "https://127.0.0.1:2999".to_string(),
            path: "/liveclientdata/allgamedata".to_string(),
            poll_interval_ms: 1_000,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            throttle_interval_ms: 250,
            retry_delay_ms: 1_000,
            max_retries: 3,
            cleanup_interval_ms: 60_000,
            staleness_window_ms: 10 * 60_000,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            autosave_interval_ms: 30_000,
            cache_max_age_ms: 5 * 60_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "riftdeck_agent=info".to_string(), file: None }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            polling: PollingConfig::default(),
            monitor: MonitorConfig::default(),
            live: LiveConfig::default(),
            render: RenderConfig::default(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_lockfile_paths() -> Vec<PathBuf> {
    if cfg!(target_os = "windows") {
        vec![PathBuf::from(r"C:\Riot Games\League of Legends\lockfile")]
    } else if cfg!(target_os = "macos") {
        vec![PathBuf::from("/Applications/League of Legends.app/Contents/LoL/lockfile")]
    } else {
        // Wine prefixes have no fixed location; rely on the process scan
        vec![]
    }
}

impl AgentConfig {
    /// Load config from `RIFTDECK_CONFIG` or the OS-specific location.
    /// A missing file yields the defaults; an unreadable or invalid one is an
    /// error the caller logs once logging is up.
    pub async fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?).await
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Cannot read config {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(toml::from_str(content)?)
    }

    pub async fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(config_path, content).await?;
        Ok(())
    }

    /// First run: write the effective config so it can be edited.
    /// Returns true when a file was created.
    pub async fn save_if_missing(&self, config_path: &Path) -> Result<bool> {
        if config_path.exists() {
            return Ok(false);
        }
        self.save_to(config_path).await?;
        info!("Wrote default config to {}", config_path.display());
        Ok(true)
    }

    pub fn config_file_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var("RIFTDECK_CONFIG") {
            return Ok(PathBuf::from(path));
        }
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        path.push("riftdeck");
        path.push("config.toml");
        Ok(path)
    }

    /// State file location; defaults next to the config file
    pub fn state_file_path(&self) -> PathBuf {
        if let Some(path) = &self.store.path {
            return path.clone();
        }
        dirs::data_dir()
            .map(|d| d.join("riftdeck").join("state.json"))
            .unwrap_or_else(|| PathBuf::from("riftdeck-state.json"))
    }
}

impl MonitorConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }
}
