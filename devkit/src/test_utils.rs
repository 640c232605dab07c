/*!
Test Harness pour l'agent RiftDeck

Agent complet câblé sur les mocks:
- surface `MockDeckHost`, client `ScriptedDiscovery` + `ScriptedApi`
- timings courts, compatibles avec `start_paused`
- collecte de tous les événements du bus
- fichier d'état dans un répertoire temporaire supprimé avec le harness
*/

use anyhow::Result;
use parking_lot::Mutex;
use riftdeck_agent::agent::{Agent, AgentTasks};
use riftdeck_agent::config::AgentConfig;
use riftdeck_agent::events::AgentEvent;
use riftdeck_agent::host::HostEvent;
use riftdeck_agent::poller::EndpointConfig;
use riftdeck_agent::render::{WidgetConfig, WidgetId};
use riftdeck_agent::store::StateStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};

use crate::api_stub::{ScriptedApi, ScriptedDiscovery};
use crate::deck_stub::MockDeckHost;

pub struct TestHarness {
    pub agent: Agent,
    pub deck: MockDeckHost,
    pub api: ScriptedApi,
    pub live_api: ScriptedApi,
    pub discovery: Arc<ScriptedDiscovery>,
    host_tx: mpsc::Sender<HostEvent>,
    events: Arc<Mutex<Vec<AgentEvent>>>,
    tasks: Option<AgentTasks>,
    _state_dir: Option<TempDir>,
}

impl TestHarness {
    /// Timings courts: check 1s, throttle 100ms, retry 100ms x3, polls 1s
    pub fn fast_config() -> AgentConfig {
        let mut config = AgentConfig::default();
        config.monitor.check_interval_ms = 1_000;
        config.monitor.reconnect_base_delay_ms = 100;
        config.monitor.max_reconnect_attempts = 3;
        config.render.throttle_interval_ms = 100;
        config.render.retry_delay_ms = 100;
        config.render.max_retries = 3;
        config.render.cleanup_interval_ms = 5_000;
        config.live.poll_interval_ms = 500;
        config.store.autosave_interval_ms = 3_600_000;
        config.polling.endpoints = EndpointConfig::defaults()
            .into_iter()
            .map(|mut e| {
                e.poll_interval_ms = 1_000;
                e
            })
            .collect();
        config
    }

    pub fn new() -> Self {
        Self::with_config(Self::fast_config())
    }

    pub fn with_config(config: AgentConfig) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create harness state dir");
        let store = StateStore::new(dir.path().join("state.json"));
        Self::start(config, store, Some(dir))
    }

    /// Démarre l'agent; à appeler depuis un runtime tokio
    pub fn with_store(config: AgentConfig, store: StateStore) -> Self {
        Self::start(config, store, None)
    }

    fn start(config: AgentConfig, store: StateStore, state_dir: Option<TempDir>) -> Self {
        env_logger::try_init().ok();

        let deck = MockDeckHost::new();
        let api = ScriptedApi::new();
        let live_api = ScriptedApi::new();
        let discovery = Arc::new(ScriptedDiscovery::new(api.clone()));

        let agent = Agent::new(
            config,
            store,
            Arc::new(deck.clone()),
            discovery.clone(),
            Arc::new(live_api.clone()),
        );

        let events = Arc::new(Mutex::new(Vec::new()));
        let mut rx = agent.events().subscribe();
        let sink = events.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => sink.lock().push(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("harness lagged {} events", n)
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let (host_tx, host_rx) = mpsc::channel(64);
        let tasks = agent.start(host_rx);
        log::info!("harness started");

        Self {
            agent,
            deck,
            api,
            live_api,
            discovery,
            host_tx,
            events,
            tasks: Some(tasks),
            _state_dir: state_dir,
        }
    }

    pub async fn send(&self, event: HostEvent) -> Result<()> {
        self.host_tx
            .send(event)
            .await
            .map_err(|e| anyhow::anyhow!("host channel closed: {}", e))
    }

    pub async fn device_status(&self, devices: &[&str]) -> Result<()> {
        self.send(HostEvent::DeviceStatus {
            devices: devices.iter().map(|d| d.to_string()).collect(),
        })
        .await
    }

    /// Enregistre des widgets `(uid, type)`; renvoie leurs ids
    pub async fn register(&self, device: &str, widgets: &[(&str, &str)]) -> Result<Vec<WidgetId>> {
        let configs: Vec<WidgetConfig> = widgets.iter().map(|(uid, kind)| WidgetConfig::new(*uid, *kind)).collect();
        self.register_configs(device, configs).await
    }

    pub async fn register_configs(&self, device: &str, widgets: Vec<WidgetConfig>) -> Result<Vec<WidgetId>> {
        let ids = widgets.iter().map(|w| WidgetId::new(device, w.uid.clone())).collect();
        self.send(HostEvent::WidgetsRegistered { device_id: device.to_string(), widgets }).await?;
        Ok(ids)
    }

    pub async fn remove(&self, device: &str, uids: &[&str]) -> Result<()> {
        self.send(HostEvent::WidgetsRemoved {
            device_id: device.to_string(),
            uids: uids.iter().map(|u| u.to_string()).collect(),
        })
        .await
    }

    pub async fn interact(&self, device: &str, widget: WidgetConfig) -> Result<()> {
        self.send(HostEvent::WidgetInteracted { device_id: device.to_string(), widget }).await
    }

    /// Laisse tourner les tâches (temps virtuel avec `start_paused`)
    pub async fn settle(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().clone()
    }

    pub fn count_events(&self, predicate: impl Fn(&AgentEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| predicate(e)).count()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn state_path(&self) -> PathBuf {
        self.agent.store().path()
    }

    pub async fn shutdown(mut self) {
        if let Some(tasks) = self.tasks.take() {
            self.agent.shutdown(tasks).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_leaves_no_state_behind() {
        let h = TestHarness::new();
        let path = h.state_path();
        let dir = path.parent().map(PathBuf::from).expect("state file has a parent");
        assert!(dir.exists());

        h.shutdown().await;
        assert!(!path.exists());
        assert!(!dir.exists());
    }
}
