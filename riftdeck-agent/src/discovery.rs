//! Local client discovery
//!
//! This module handles:
//! - Credential lookup, lockfile first then the process command line
//! - Building the authenticated loopback HTTPS handle
//! - One validation request before the handle is handed out
//! - Game version lookup (non-fatal, falls back to a fixed version)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{DiscoveryError, PollError};
use crate::poller::LocalApi;

const LOOPBACK: &str = "127.0.0.1";
const AUTH_USER: &str = "riot";

/// Where a set of credentials came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Lockfile(PathBuf),
    ProcessList,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub port: u16,
    pub password: String,
    pub protocol: String,
    pub pid: Option<u32>,
    pub source: CredentialSource,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("port", &self.port)
            .field("password", &"<redacted>")
            .field("protocol", &self.protocol)
            .field("pid", &self.pid)
            .field("source", &self.source)
            .finish()
    }
}

/// Parse `name:pid:port:password:protocol`
pub fn parse_lockfile(content: &str, path: &Path) -> Result<Credentials, DiscoveryError> {
    let invalid = |reason: &str| DiscoveryError::InvalidLockfile {
        path: path.display().to_string(),
        reason: reason.to_string(),
    };

    let parts: Vec<&str> = content.trim().split(':').collect();
    if parts.len() < 5 {
        return Err(invalid("expected 5 fields"));
    }
    let pid = parts[1].parse::<u32>().ok();
    let port = parts[2].parse::<u16>().map_err(|_| invalid("bad port"))?;
    let password = parts[3].to_string();
    if password.is_empty() {
        return Err(invalid("empty password"));
    }

    Ok(Credentials {
        port,
        password,
        protocol: parts[4].to_string(),
        pid,
        source: CredentialSource::Lockfile(path.to_path_buf()),
    })
}

/// Extract `--app-port=` and `--remoting-auth-token=` from a command line
pub fn parse_process_args(args: &[String]) -> Option<(u16, String)> {
    let mut port = None;
    let mut token = None;
    for arg in args {
        let arg = arg.trim_matches('"');
        if let Some(value) = arg.strip_prefix("--app-port=") {
            port = value.parse::<u16>().ok();
        } else if let Some(value) = arg.strip_prefix("--remoting-auth-token=") {
            if !value.is_empty() {
                token = Some(value.to_string());
            }
        }
    }
    Some((port?, token?))
}

fn is_client_process(name: &str, names: &[String]) -> bool {
    names.iter().any(|n| n.eq_ignore_ascii_case(name))
}

fn scan_process_table(names: &[String]) -> Option<(u32, Vec<String>)> {
    let mut sys = System::new();
    sys.refresh_processes();
    sys.processes()
        .iter()
        .find(|(_, p)| is_client_process(p.name(), names))
        .map(|(pid, p)| (pid.as_u32(), p.cmd().to_vec()))
}

/// Authenticated handle to one client session. Never mutated; a reconnect
/// builds a new one.
pub struct ConnectionHandle {
    pub host: String,
    pub port: u16,
    credential: String,
    pub protocol: String,
    pub discovered_at: DateTime<Utc>,
    pub pid: Option<u32>,
    pub generation: u64,
    pub session_id: Uuid,
    pub game_version: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("credential", &"<redacted>")
            .field("protocol", &self.protocol)
            .field("pid", &self.pid)
            .field("generation", &self.generation)
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl ConnectionHandle {
    pub fn new(
        credentials: &Credentials,
        generation: u64,
        timeout: Duration,
    ) -> Result<Self, DiscoveryError> {
        // self-signed certificate; the handle only ever targets loopback
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            host: LOOPBACK.to_string(),
            port: credentials.port,
            credential: credentials.password.clone(),
            protocol: credentials.protocol.clone(),
            discovered_at: Utc::now(),
            pid: credentials.pid,
            generation,
            session_id: Uuid::new_v4(),
            game_version: String::new(),
            client,
        })
    }

    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

#[async_trait]
impl LocalApi for ConnectionHandle {
    async fn get_json(&self, path: &str) -> Result<Value, PollError> {
        let url = format!("{}{}", self.base_url(), path);
        let response = self
            .client
            .get(&url)
            .basic_auth(AUTH_USER, Some(&self.credential))
            .send()
            .await
            .map_err(|e| PollError::transport(path, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Status { path: path.to_string(), status: status.as_u16() });
        }
        response.json::<Value>().await.map_err(|e| PollError::Decode {
            path: path.to_string(),
            message: e.to_string(),
        })
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// Finds the running client and hands out a validated API handle
#[async_trait]
pub trait ClientDiscovery: Send + Sync {
    /// Liveness probe: pid of the client process if it runs
    async fn client_pid(&self) -> Option<u32>;

    async fn discover(&self, generation: u64) -> Result<Arc<dyn LocalApi>, DiscoveryError>;
}

pub struct LcuDiscoverer {
    config: ClientConfig,
}

impl LcuDiscoverer {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    /// Full process-table refresh, run on the blocking pool
    async fn scan_processes(&self) -> Option<(u32, Vec<String>)> {
        let names = self.config.process_names.clone();
        match tokio::task::spawn_blocking(move || scan_process_table(&names)).await {
            Ok(found) => found,
            Err(e) => {
                warn!("process scan failed: {}", e);
                None
            }
        }
    }

    async fn read_lockfiles(&self) -> Option<Credentials> {
        for path in &self.config.lockfile_paths {
            let content = match tokio::fs::read_to_string(path).await {
                Ok(c) => c,
                Err(e) => {
                    debug!("lockfile {} unreadable: {}", path.display(), e);
                    continue;
                }
            };
            match parse_lockfile(&content, path) {
                Ok(credentials) => return Some(credentials),
                Err(e) => warn!("{}", e),
            }
        }
        None
    }

    /// Lockfile first, then the client command line
    pub async fn find_credentials(&self) -> Result<Credentials, DiscoveryError> {
        let process = self.scan_processes().await;

        if let Some(mut credentials) = self.read_lockfiles().await {
            // the monitor compares against the scanned pid
            if let Some((pid, _)) = &process {
                credentials.pid = Some(*pid);
            }
            info!("credentials from lockfile (port {})", credentials.port);
            return Ok(credentials);
        }

        let (pid, args) = process.ok_or(DiscoveryError::NotRunning)?;
        let (port, password) = parse_process_args(&args).ok_or(DiscoveryError::NotRunning)?;
        info!("credentials from process {} (port {})", pid, port);
        Ok(Credentials {
            port,
            password,
            protocol: "https".to_string(),
            pid: Some(pid),
            source: CredentialSource::ProcessList,
        })
    }

    async fn validate(&self, handle: &ConnectionHandle) -> Result<(), DiscoveryError> {
        handle
            .get_json(&self.config.validation_path)
            .await
            .map(|_| ())
            .map_err(|e| DiscoveryError::ValidationFailed(e.to_string()))
    }

    /// Latest game version from the public metadata endpoint
    pub async fn fetch_game_version(&self) -> String {
        match self.try_fetch_version().await {
            Ok(version) => version,
            Err(e) => {
                warn!("version lookup failed ({}), using {}", e, self.config.fallback_version);
                self.config.fallback_version.clone()
            }
        }
    }

    async fn try_fetch_version(&self) -> anyhow::Result<String> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(self.config.request_timeout_ms))
            .build()?;
        let versions: Vec<String> = client
            .get(&self.config.version_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        versions
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty version list"))
    }
}

#[async_trait]
impl ClientDiscovery for LcuDiscoverer {
    async fn client_pid(&self) -> Option<u32> {
        self.scan_processes().await.map(|(pid, _)| pid)
    }

    async fn discover(&self, generation: u64) -> Result<Arc<dyn LocalApi>, DiscoveryError> {
        let credentials = self.find_credentials().await?;
        let timeout = Duration::from_millis(self.config.request_timeout_ms);
        let mut handle = ConnectionHandle::new(&credentials, generation, timeout)?;

        self.validate(&handle).await?;
        handle.game_version = self.fetch_game_version().await;

        info!(
            "connected to client on port {} (game {}, generation {})",
            handle.port, handle.game_version, generation
        );
        Ok(Arc::new(handle))
    }
}
