//! State store - persistance JSON de l'état de l'agent
//!
//! Holds widget state, connection state, preferences and a small TTL cache in
//! a single JSON document:
//!
//! ```json
//! {
//!   "keys": { "dev-1/key-0": { "deviceId": "dev-1", "uid": "key-0", ... } },
//!   "connections": { "client": { "state": "connected", ... } },
//!   "preferences": { "theme": "dark" },
//!   "cache": { "version": { "value": "14.23.1", "storedAt": "...", "ttlMs": 3600000 } },
//!   "metadata": { "version": 1, "created": "...", "lastSave": "..." }
//! }
//! ```
//!
//! Writes go to a temporary file renamed over the target. `save` does nothing
//! unless something changed since the last successful save.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::PersistenceError;
use crate::events::ConnectionState;
use crate::render::{RenderPayload, WidgetId};

pub const STATE_VERSION: u32 = 1;

/// Store cache key of the last payload seen for a logical type
pub fn last_known_key(logical_type: &str) -> String {
    format!("data/{}", logical_type)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetState {
    pub device_id: String,
    pub uid: String,
    pub kind: String,
    pub last_payload: Option<RenderPayload>,
    /// Widget-specific view selection (rank queue for rank widgets)
    #[serde(default)]
    pub view: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub state: ConnectionState,
    pub reason: String,
    #[serde(default)]
    pub phase: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub value: Value,
    pub stored_at: DateTime<Utc>,
    #[serde(default)]
    pub ttl_ms: Option<u64>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_ms {
            Some(ttl) => now >= self.stored_at + chrono::Duration::milliseconds(ttl as i64),
            None => false,
        }
    }

    fn is_older_than(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        now - self.stored_at >= max_age
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub version: u32,
    pub created: DateTime<Utc>,
    pub last_save: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateDocument {
    #[serde(default)]
    pub keys: BTreeMap<String, WidgetState>,
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionRecord>,
    #[serde(default)]
    pub preferences: BTreeMap<String, Value>,
    #[serde(default)]
    pub cache: BTreeMap<String, CacheEntry>,
    pub metadata: Metadata,
}

impl Default for StateDocument {
    fn default() -> Self {
        Self {
            keys: BTreeMap::new(),
            connections: BTreeMap::new(),
            preferences: BTreeMap::new(),
            cache: BTreeMap::new(),
            metadata: Metadata { version: STATE_VERSION, created: Utc::now(), last_save: None },
        }
    }
}

struct StoreInner {
    path: PathBuf,
    doc: StateDocument,
    /// Bumped on every mutation; equal to `saved_revision` when clean
    revision: u64,
    saved_revision: u64,
}

impl StoreInner {
    fn touch(&mut self) {
        self.revision += 1;
    }
}

/// Cheap-to-clone handle to the shared state document
#[derive(Clone)]
pub struct StateStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl StateStore {
    /// Empty in-memory store bound to `path`
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            inner: Arc::new(Mutex::new(StoreInner {
                path: path.into(),
                doc: StateDocument::default(),
                revision: 0,
                saved_revision: 0,
            })),
        }
    }

    /// Store loaded from `path`; an unreadable file leaves it empty
    pub async fn open<P: Into<PathBuf>>(path: P) -> Self {
        let store = Self::new(path);
        match store.load().await {
            Ok(count) => debug!("state store loaded ({} widget entries)", count),
            Err(e) => warn!("state file unusable, starting with empty state: {}", e),
        }
        store
    }

    pub fn path(&self) -> PathBuf {
        self.inner.lock().path.clone()
    }

    /// Replace in-memory state with the file contents.
    /// Returns the number of widget entries; a missing file is not an error.
    pub async fn load(&self) -> Result<usize, PersistenceError> {
        let path = self.path();
        if !path.exists() {
            info!("no state file at {}, starting fresh", path.display());
            return Ok(0);
        }

        let content = tokio::fs::read_to_string(&path).await?;
        let mut doc: StateDocument = serde_json::from_str(&content)?;

        let now = Utc::now();
        let before = doc.cache.len();
        doc.cache.retain(|_, entry| !entry.is_expired(now));
        if doc.cache.len() != before {
            debug!("dropped {} expired cache entries on load", before - doc.cache.len());
        }

        let count = doc.keys.len();
        let mut inner = self.inner.lock();
        inner.doc = doc;
        inner.saved_revision = inner.revision;
        Ok(count)
    }

    /// Write the document if it changed since the last save.
    /// Returns whether a write happened.
    pub async fn save(&self) -> Result<bool, PersistenceError> {
        self.write(false).await
    }

    /// Unconditional save, used on shutdown. Errors are logged only.
    pub async fn force_save(&self) {
        match self.write(true).await {
            Ok(_) => info!("state saved to {}", self.path().display()),
            Err(e) => warn!("final state save failed: {}", e),
        }
    }

    async fn write(&self, force: bool) -> Result<bool, PersistenceError> {
        let (content, revision, path) = {
            let mut inner = self.inner.lock();
            if !force && inner.revision == inner.saved_revision {
                return Ok(false);
            }
            inner.doc.metadata.last_save = Some(Utc::now());
            let content = serde_json::to_string_pretty(&inner.doc)?;
            (content, inner.revision, inner.path.clone())
        };

        write_atomic(&path, &content).await?;

        let mut inner = self.inner.lock();
        if inner.saved_revision < revision {
            inner.saved_revision = revision;
        }
        Ok(true)
    }

    pub fn is_dirty(&self) -> bool {
        let inner = self.inner.lock();
        inner.revision != inner.saved_revision
    }

    // ---- widgets ----

    pub fn widget_state(&self, id: &WidgetId) -> Option<WidgetState> {
        self.inner.lock().doc.keys.get(&id.key()).cloned()
    }

    pub fn widget_payload(&self, id: &WidgetId) -> Option<RenderPayload> {
        self.inner.lock().doc.keys.get(&id.key()).and_then(|s| s.last_payload.clone())
    }

    /// Remember the payload a widget should be showing
    pub fn set_widget_payload(&self, id: &WidgetId, kind: &str, payload: &RenderPayload) {
        let mut inner = self.inner.lock();
        let entry = inner.doc.keys.entry(id.key()).or_insert_with(|| WidgetState {
            device_id: id.device_id.clone(),
            uid: id.uid.clone(),
            kind: kind.to_string(),
            last_payload: None,
            view: None,
            updated_at: Utc::now(),
        });
        if entry.last_payload.as_ref() == Some(payload) && entry.kind == kind {
            return;
        }
        entry.kind = kind.to_string();
        entry.last_payload = Some(payload.clone());
        entry.updated_at = Utc::now();
        inner.touch();
    }

    pub fn set_widget_view(&self, id: &WidgetId, kind: &str, view: Option<String>) {
        let mut inner = self.inner.lock();
        let entry = inner.doc.keys.entry(id.key()).or_insert_with(|| WidgetState {
            device_id: id.device_id.clone(),
            uid: id.uid.clone(),
            kind: kind.to_string(),
            last_payload: None,
            view: None,
            updated_at: Utc::now(),
        });
        if entry.view == view {
            return;
        }
        entry.view = view;
        entry.updated_at = Utc::now();
        inner.touch();
    }

    pub fn remove_widget_state(&self, id: &WidgetId) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.doc.keys.remove(&id.key()).is_some();
        if removed {
            inner.touch();
        }
        removed
    }

    pub fn widget_count(&self) -> usize {
        self.inner.lock().doc.keys.len()
    }

    // ---- connections ----

    pub fn connection(&self, name: &str) -> Option<ConnectionRecord> {
        self.inner.lock().doc.connections.get(name).cloned()
    }

    pub fn set_connection(&self, name: &str, state: ConnectionState, reason: &str) {
        let mut inner = self.inner.lock();
        let phase = inner.doc.connections.get(name).and_then(|c| c.phase.clone());
        inner.doc.connections.insert(
            name.to_string(),
            ConnectionRecord { state, reason: reason.to_string(), phase, updated_at: Utc::now() },
        );
        inner.touch();
    }

    pub fn set_phase(&self, name: &str, phase: &str) {
        let mut inner = self.inner.lock();
        let record = inner.doc.connections.entry(name.to_string()).or_insert_with(|| ConnectionRecord {
            state: ConnectionState::Disconnected,
            reason: String::new(),
            phase: None,
            updated_at: Utc::now(),
        });
        if record.phase.as_deref() == Some(phase) {
            return;
        }
        record.phase = Some(phase.to_string());
        record.updated_at = Utc::now();
        inner.touch();
    }

    // ---- preferences ----

    pub fn preference(&self, name: &str) -> Option<Value> {
        self.inner.lock().doc.preferences.get(name).cloned()
    }

    pub fn set_preference(&self, name: &str, value: Value) {
        let mut inner = self.inner.lock();
        if inner.doc.preferences.get(name) == Some(&value) {
            return;
        }
        inner.doc.preferences.insert(name.to_string(), value);
        inner.touch();
    }

    // ---- cache ----

    /// Cached value, lazily dropping it when its TTL has passed
    pub fn cache_get(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock();
        let expired = inner.doc.cache.get(key)?.is_expired(Utc::now());
        if expired {
            inner.doc.cache.remove(key);
            inner.touch();
            return None;
        }
        inner.doc.cache.get(key).map(|e| e.value.clone())
    }

    pub fn cache_set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let mut inner = self.inner.lock();
        inner.doc.cache.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: Utc::now(),
                ttl_ms: ttl.map(|t| t.as_millis() as u64),
            },
        );
        inner.touch();
    }

    /// Remove expired entries and entries older than `max_age`
    pub fn sweep_cache(&self, max_age: Duration) -> usize {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let before = inner.doc.cache.len();
        inner
            .doc
            .cache
            .retain(|_, entry| !entry.is_expired(now) && !entry.is_older_than(now, max_age));
        let removed = before - inner.doc.cache.len();
        if removed > 0 {
            inner.touch();
        }
        removed
    }

    pub fn metadata(&self) -> Metadata {
        self.inner.lock().doc.metadata.clone()
    }

    /// Periodic save loop; failures are logged and retried on the next tick
    pub fn spawn_autosave(&self, every: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                match store.save().await {
                    Ok(true) => debug!("autosave written"),
                    Ok(false) => {}
                    Err(e) => warn!("autosave failed: {}", e),
                }
            }
        })
    }
}

async fn write_atomic(path: &Path, content: &str) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, content).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
