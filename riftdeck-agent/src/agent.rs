//! Agent wiring
//!
//! Builds every component, spawns the long-running tasks (router, monitor,
//! cleanup, cache sweep, autosave) and tears them down on shutdown.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::discovery::{ClientDiscovery, LcuDiscoverer};
use crate::events::EventBus;
use crate::host::{self, HostEvent, StdioHost};
use crate::live::{LiveClient, LiveDataLoop};
use crate::monitor::ConnectionMonitor;
use crate::poller::{LocalApi, PollerSupervisor, ResponseCache};
use crate::render::{DeckSurface, RenderEngine, RenderSettings};
use crate::router::EventRouter;
use crate::store::StateStore;

/// Handles of the spawned background tasks
pub struct AgentTasks {
    handles: Vec<JoinHandle<()>>,
}

impl AgentTasks {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

pub struct Agent {
    config: AgentConfig,
    events: EventBus,
    store: StateStore,
    cache: ResponseCache,
    poller: PollerSupervisor,
    engine: RenderEngine,
    router: Arc<EventRouter>,
    monitor: Arc<ConnectionMonitor>,
}

impl Agent {
    /// Wire the components around the given collaborators
    pub fn new(
        config: AgentConfig,
        store: StateStore,
        surface: Arc<dyn DeckSurface>,
        discovery: Arc<dyn ClientDiscovery>,
        live_api: Arc<dyn LocalApi>,
    ) -> Self {
        let events = EventBus::default();
        let cache = ResponseCache::new();

        let poller = PollerSupervisor::new(config.polling.endpoints.clone(), events.clone(), cache.clone());
        let engine = RenderEngine::new(
            surface,
            store.clone(),
            events.clone(),
            RenderSettings::from(&config.render),
        );
        let live = LiveDataLoop::new(live_api, &config.live, cache.clone(), events.clone());
        let monitor = Arc::new(ConnectionMonitor::new(
            discovery,
            poller.clone(),
            events.clone(),
            store.clone(),
            config.monitor.clone(),
        ));
        let router = Arc::new(
            EventRouter::new(engine.clone(), cache.clone(), store.clone(), live)
                .with_upstream(poller.clone(), monitor.subscribe_state()),
        );

        Self { config, events, store, cache, poller, engine, router, monitor }
    }

    /// Production wiring: stdio host, process discovery, live client
    pub async fn from_config(config: AgentConfig) -> Result<Self> {
        let store = StateStore::open(config.state_file_path()).await;
        let live_api = LiveClient::new(&config.live).context("Failed to build live data client")?;
        let discovery = LcuDiscoverer::new(config.client.clone());

        Ok(Self::new(
            config,
            store,
            Arc::new(StdioHost::stdout()),
            Arc::new(discovery),
            Arc::new(live_api),
        ))
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn poller(&self) -> &PollerSupervisor {
        &self.poller
    }

    pub fn engine(&self) -> &RenderEngine {
        &self.engine
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    pub fn monitor(&self) -> &Arc<ConnectionMonitor> {
        &self.monitor
    }

    /// Spawn router, monitor and maintenance loops
    pub fn start(&self, host_events: mpsc::Receiver<HostEvent>) -> AgentTasks {
        // subscribe before anything can publish
        let bus = self.events.subscribe();
        let render = &self.config.render;
        let store_cfg = &self.config.store;

        let mut handles = vec![
            tokio::spawn(self.router.clone().run(bus, host_events)),
            self.monitor.clone().spawn(),
            self.router.clone().spawn_cleanup(Duration::from_millis(render.cleanup_interval_ms.max(1))),
            self.store.spawn_autosave(Duration::from_millis(store_cfg.autosave_interval_ms.max(1))),
        ];

        let store = self.store.clone();
        let max_age = Duration::from_millis(store_cfg.cache_max_age_ms);
        let sweep_every = Duration::from_millis(store_cfg.cache_max_age_ms.max(1_000) / 2);
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_every);
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = store.sweep_cache(max_age);
                if removed > 0 {
                    debug!("cache sweep removed {} entries", removed);
                }
            }
        }));

        info!("agent started ({} tasks)", handles.len());
        AgentTasks { handles }
    }

    /// Stop everything and write the final state
    pub async fn shutdown(&self, tasks: AgentTasks) {
        info!("shutting down");
        for handle in &tasks.handles {
            handle.abort();
        }
        self.poller.shutdown().await;
        self.monitor.disconnect("agent shutdown");
        self.store.force_save().await;
    }

    /// Run until ctrl-c or until the host closes stdin
    pub async fn run(self) -> Result<()> {
        let (host_tx, host_rx) = mpsc::channel(64);
        let reader = host::spawn_stdin_reader(host_tx);
        let tasks = self.start(host_rx);

        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => info!("interrupted"),
                Err(e) => warn!("ctrl-c handler failed: {}", e),
            },
            _ = reader => info!("host went away"),
        }

        self.shutdown(tasks).await;
        Ok(())
    }
}
