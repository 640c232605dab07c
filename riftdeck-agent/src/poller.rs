//! Endpoint poller supervisor
//!
//! One independent timed task per endpoint against the current connection.
//! Results land in a shared response cache; changes go out on the event bus.
//! A stop bumps the session epoch so late responses are dropped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::PollError;
use crate::events::{AgentEvent, EventBus};
use crate::{new_state, Shared};

/// One polled data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub path: String,
    pub poll_interval_ms: u64,
    pub logical_type: String,
    /// Expected to be absent most of the time (404 outside champ select, ...)
    #[serde(default)]
    pub suppress_error_reporting: bool,
    /// Payload is the game phase string
    #[serde(default)]
    pub game_phase: bool,
}

impl EndpointConfig {
    pub fn new(path: &str, poll_interval_ms: u64, logical_type: &str) -> Self {
        Self {
            path: path.to_string(),
            poll_interval_ms,
            logical_type: logical_type.to_string(),
            suppress_error_reporting: false,
            game_phase: false,
        }
    }

    pub fn suppressed(mut self) -> Self {
        self.suppress_error_reporting = true;
        self
    }

    pub fn phase_source(mut self) -> Self {
        self.game_phase = true;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("/lol-summoner/v1/current-summoner", 30_000, "summoner"),
            Self::new("/lol-gameflow/v1/gameflow-phase", 2_000, "gameflow").phase_source(),
            Self::new("/lol-champ-select/v1/session", 2_000, "champ-select").suppressed(),
            Self::new("/lol-ranked/v1/current-ranked-stats", 60_000, "ranked"),
            Self::new("/lol-store/v1/wallet", 60_000, "wallet"),
        ]
    }
}

/// Read access to the local client REST API
#[async_trait]
pub trait LocalApi: Send + Sync {
    async fn get_json(&self, path: &str) -> Result<Value, PollError>;

    /// Pid of the client process this handle talks to, when known
    fn pid(&self) -> Option<u32> {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheUpdate {
    Changed { previous: Option<Value> },
    Unchanged,
}

/// Last response per logical type
#[derive(Clone, Default)]
pub struct ResponseCache {
    entries: Shared<HashMap<String, CachedResponse>>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self { entries: new_state(HashMap::new()) }
    }

    pub fn get(&self, logical_type: &str) -> Option<CachedResponse> {
        self.entries.lock().get(logical_type).cloned()
    }

    pub fn payload(&self, logical_type: &str) -> Option<Value> {
        self.entries.lock().get(logical_type).map(|c| c.payload.clone())
    }

    /// Store a payload unless it equals the cached one
    pub fn insert(&self, logical_type: &str, payload: Value) -> CacheUpdate {
        let mut entries = self.entries.lock();
        let previous = entries.get(logical_type).map(|c| c.payload.clone());
        if previous.as_ref() == Some(&payload) {
            return CacheUpdate::Unchanged;
        }
        entries.insert(
            logical_type.to_string(),
            CachedResponse { payload, timestamp: Utc::now() },
        );
        CacheUpdate::Changed { previous }
    }

    pub fn remove(&self, logical_type: &str) -> Option<CachedResponse> {
        self.entries.lock().remove(logical_type)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Sorted copy of every entry
    pub fn snapshot(&self) -> Vec<(String, CachedResponse)> {
        let mut all: Vec<(String, CachedResponse)> = self
            .entries
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Explicit cleanup: drop entries older than `max_age`
    pub fn sweep_older_than(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
        let cutoff = Utc::now() - max_age;
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, c| c.timestamp > cutoff);
        before - entries.len()
    }
}

struct Session {
    epoch: u64,
    generation: u64,
    stop_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

struct SupervisorInner {
    endpoints: Vec<EndpointConfig>,
    events: EventBus,
    cache: ResponseCache,
    epoch: AtomicU64,
    last_phase: Mutex<Option<String>>,
    session: Mutex<Option<Session>>,
}

impl SupervisorInner {
    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn apply(&self, endpoint: &EndpointConfig, payload: Value) {
        if endpoint.game_phase {
            self.observe_phase(&payload);
        }

        match self.cache.insert(&endpoint.logical_type, payload.clone()) {
            CacheUpdate::Changed { previous } => self.events.publish(AgentEvent::DataUpdated {
                logical_type: endpoint.logical_type.clone(),
                payload,
                previous,
                timestamp: Utc::now(),
            }),
            CacheUpdate::Unchanged => debug!("{} unchanged", endpoint.logical_type),
        }
    }

    fn observe_phase(&self, payload: &Value) {
        let Some(phase) = payload.as_str() else {
            debug!("game phase payload is not a string: {}", payload);
            return;
        };
        let previous = self.last_phase.lock().replace(phase.to_string());
        match previous {
            Some(previous_phase) if previous_phase != phase => {
                info!("game phase {} -> {}", previous_phase, phase);
                self.events.publish(AgentEvent::GameStateChanged {
                    phase: phase.to_string(),
                    previous_phase,
                });
            }
            Some(_) => {}
            None => debug!("game phase baseline: {}", phase),
        }
    }

    fn report(&self, endpoint: &EndpointConfig, error: PollError) {
        if endpoint.suppress_error_reporting {
            debug!("{} unavailable: {}", endpoint.logical_type, error);
            return;
        }
        warn!("poll {} failed: {}", endpoint.logical_type, error);
        self.events.publish(AgentEvent::Error { message: error.to_string(), recoverable: true });
    }
}

#[derive(Clone)]
pub struct PollerSupervisor {
    inner: Arc<SupervisorInner>,
}

impl PollerSupervisor {
    pub fn new(endpoints: Vec<EndpointConfig>, events: EventBus, cache: ResponseCache) -> Self {
        Self {
            inner: Arc::new(SupervisorInner {
                endpoints,
                events,
                cache,
                epoch: AtomicU64::new(0),
                last_phase: Mutex::new(None),
                session: Mutex::new(None),
            }),
        }
    }

    pub fn endpoints(&self) -> &[EndpointConfig] {
        &self.inner.endpoints
    }

    pub fn cache(&self) -> ResponseCache {
        self.inner.cache.clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.session.lock().is_some()
    }

    /// Connection generation of the running session
    pub fn generation(&self) -> Option<u64> {
        self.inner.session.lock().as_ref().map(|s| s.generation)
    }

    pub fn last_phase(&self) -> Option<String> {
        self.inner.last_phase.lock().clone()
    }

    /// Start one task per endpoint; tears down any previous session first
    pub fn start(&self, api: Arc<dyn LocalApi>, generation: u64) {
        self.stop();
        self.inner.cache.clear();
        *self.inner.last_phase.lock() = None;

        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (stop_tx, stop_rx) = watch::channel(false);

        let tasks = self
            .inner
            .endpoints
            .iter()
            .cloned()
            .map(|endpoint| {
                let inner = self.inner.clone();
                let api = api.clone();
                let stop_rx = stop_rx.clone();
                tokio::spawn(poll_loop(inner, endpoint, api, epoch, stop_rx))
            })
            .collect();

        info!(
            "polling {} endpoints (generation {})",
            self.inner.endpoints.len(),
            generation
        );
        *self.inner.session.lock() = Some(Session { epoch, generation, stop_tx, tasks });
    }

    /// Halt every poll task; in-flight responses are discarded
    pub fn stop(&self) {
        let Some(session) = self.inner.session.lock().take() else {
            return;
        };
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        let _ = session.stop_tx.send(true);
        // tasks exit on the stop signal; the handles are only kept for shutdown
        drop(session.tasks);
        info!("polling stopped (generation {}, epoch {})", session.generation, session.epoch);
    }

    /// Stop and wait for every task to exit
    pub async fn shutdown(&self) {
        let session = self.inner.session.lock().take();
        if let Some(session) = session {
            self.inner.epoch.fetch_add(1, Ordering::SeqCst);
            let _ = session.stop_tx.send(true);
            for task in session.tasks {
                let _ = task.await;
            }
        }
    }

    /// Re-emit a DataUpdated for every cached entry
    pub fn replay(&self) -> usize {
        let entries = self.inner.cache.snapshot();
        for (logical_type, cached) in &entries {
            self.inner.events.publish(AgentEvent::DataUpdated {
                logical_type: logical_type.clone(),
                payload: cached.payload.clone(),
                previous: None,
                timestamp: Utc::now(),
            });
        }
        debug!("replayed {} cached entries", entries.len());
        entries.len()
    }
}

async fn poll_loop(
    inner: Arc<SupervisorInner>,
    endpoint: EndpointConfig,
    api: Arc<dyn LocalApi>,
    epoch: u64,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(endpoint.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {}
        }

        let result = api.get_json(&endpoint.path).await;
        if !inner.is_current(epoch) {
            debug!("discarding stale {} response", endpoint.logical_type);
            break;
        }

        match result {
            Ok(payload) => inner.apply(&endpoint, payload),
            Err(e) => inner.report(&endpoint, e),
        }
    }
    debug!("poll task {} exited", endpoint.logical_type);
}
