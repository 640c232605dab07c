//! Error taxonomy for the agent
//!
//! Every error here is recoverable at the component boundary:
//! - DiscoveryError: the monitor keeps checking and retries
//! - PollError: surfaced as an event (or swallowed for optional endpoints)
//! - RenderError: classified terminal vs transient by the render engine
//! - PersistenceError: logged, the store falls back to in-memory state

/// Failure to locate or validate the local client
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("client not running")]
    NotRunning,
    #[error("validation failed: {0}")]
    ValidationFailed(String),
    #[error("invalid lockfile {path}: {reason}")]
    InvalidLockfile { path: String, reason: String },
    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),
}

impl DiscoveryError {
    /// Short reason string carried on connection events
    pub fn reason(&self) -> &'static str {
        match self {
            DiscoveryError::NotRunning => "not running",
            DiscoveryError::ValidationFailed(_) => "validation failed",
            DiscoveryError::InvalidLockfile { .. } => "invalid lockfile",
            DiscoveryError::Client(_) => "client error",
        }
    }
}

/// Per-endpoint polling failure
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("request to {path} failed: {message}")]
    Transport { path: String, message: String },
    #[error("{path} returned HTTP {status}")]
    Status { path: String, status: u16 },
    #[error("invalid JSON from {path}: {message}")]
    Decode { path: String, message: String },
}

impl PollError {
    pub fn transport(path: &str, err: impl std::fmt::Display) -> Self {
        PollError::Transport { path: path.to_string(), message: err.to_string() }
    }
}

/// Draw call failure reported by the host surface
#[derive(Debug, Clone, thiserror::Error)]
#[error("draw failed: {message}")]
pub struct RenderError {
    pub message: String,
}

/// Error fragments meaning the key or its device is gone for good
const TERMINAL_PATTERNS: &[&str] = &["not alive", "not connected", "no longer", "not found"];

impl RenderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    /// Terminal errors mark the widget dead instead of scheduling a retry
    pub fn is_terminal(&self) -> bool {
        let lower = self.message.to_lowercase();
        TERMINAL_PATTERNS.iter().any(|p| lower.contains(p))
    }
}

/// State file could not be read or written
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
