//! In-match live data loop
//!
//! Fast poll of the unauthenticated in-game API, only while a match runs.
//! Results go into the shared response cache under `live`.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::config::LiveConfig;
use crate::error::PollError;
use crate::events::{AgentEvent, EventBus};
use crate::poller::{CacheUpdate, LocalApi, ResponseCache};

pub const LIVE_TYPE: &str = "live";

/// Client for the in-game API (loopback, self-signed, no auth)
pub struct LiveClient {
    base_url: String,
    client: reqwest::Client,
}

impl LiveClient {
    pub fn new(config: &LiveConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(Duration::from_millis(config.poll_interval_ms.max(500)))
            .build()?;
        Ok(Self { base_url: config.base_url.trim_end_matches('/').to_string(), client })
    }
}

#[async_trait]
impl LocalApi for LiveClient {
    async fn get_json(&self, path: &str) -> Result<Value, PollError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
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
}

struct LiveRun {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct LiveInner {
    api: Arc<dyn LocalApi>,
    path: String,
    interval: Duration,
    cache: ResponseCache,
    events: EventBus,
    epoch: AtomicU64,
    run: Mutex<Option<LiveRun>>,
}

#[derive(Clone)]
pub struct LiveDataLoop {
    inner: Arc<LiveInner>,
}

impl LiveDataLoop {
    pub fn new(
        api: Arc<dyn LocalApi>,
        config: &LiveConfig,
        cache: ResponseCache,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(LiveInner {
                api,
                path: config.path.clone(),
                interval: Duration::from_millis(config.poll_interval_ms.max(1)),
                cache,
                events,
                epoch: AtomicU64::new(0),
                run: Mutex::new(None),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.run.lock().is_some()
    }

    /// Start polling; no-op when already running
    pub fn start(&self) {
        let mut run = self.inner.run.lock();
        if run.is_some() {
            return;
        }
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(live_loop(self.inner.clone(), epoch, stop_rx));
        *run = Some(LiveRun { stop_tx, task });
        info!("live data loop started");
    }

    /// Stop polling and forget the last live payload
    pub fn stop(&self) {
        let Some(run) = self.inner.run.lock().take() else {
            return;
        };
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        let _ = run.stop_tx.send(true);
        drop(run.task);
        self.inner.cache.remove(LIVE_TYPE);
        info!("live data loop stopped");
    }
}

async fn live_loop(inner: Arc<LiveInner>, epoch: u64, mut stop_rx: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(inner.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {}
        }

        let result = inner.api.get_json(&inner.path).await;
        if inner.epoch.load(Ordering::SeqCst) != epoch {
            break;
        }

        match result {
            Ok(payload) => {
                if let CacheUpdate::Changed { previous } = inner.cache.insert(LIVE_TYPE, payload.clone()) {
                    inner.events.publish(AgentEvent::DataUpdated {
                        logical_type: LIVE_TYPE.to_string(),
                        payload,
                        previous,
                        timestamp: Utc::now(),
                    });
                }
            }
            // the API answers only once the match has loaded
            Err(e) => debug!("live data unavailable: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct CountingApi {
        calls: AtomicU64,
    }

    #[async_trait]
    impl LocalApi for CountingApi {
        async fn get_json(&self, _path: &str) -> Result<Value, PollError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                return Err(PollError::Status { path: "/live".into(), status: 404 });
            }
            Ok(json!({ "gameData": { "gameTime": n } }))
        }
    }

    fn config() -> LiveConfig {
        LiveConfig { poll_interval_ms: 1_000, ..LiveConfig::default() }
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_stop_lifecycle() {
        let api = Arc::new(CountingApi { calls: AtomicU64::new(0) });
        let cache = ResponseCache::new();
        let events = EventBus::default();
        let mut rx = events.subscribe();
        let live = LiveDataLoop::new(api.clone(), &config(), cache.clone(), events);

        live.start();
        live.start();
        assert!(live.is_running());
        tokio::time::sleep(Duration::from_millis(2_500)).await;

        // first call fails while loading, then two updates
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
        let mut updates = 0;
        while let Ok(event) = rx.try_recv() {
            if let AgentEvent::DataUpdated { logical_type, .. } = event {
                assert_eq!(logical_type, LIVE_TYPE);
                updates += 1;
            }
        }
        assert_eq!(updates, 2);
        assert!(cache.get(LIVE_TYPE).is_some());

        live.stop();
        assert!(!live.is_running());
        assert!(cache.get(LIVE_TYPE).is_none());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
    }
}
