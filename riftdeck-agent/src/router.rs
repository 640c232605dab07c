//! Event router
//!
//! Consumes bus events and host lifecycle events, decides what every widget
//! shows and hands the payloads to the render engine.

use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::{AgentEvent, ConnectionState};
use crate::host::HostEvent;
use crate::live::LiveDataLoop;
use crate::monitor::CONNECTION_NAME;
use crate::poller::{PollerSupervisor, ResponseCache};
use crate::render::{RenderEngine, RenderPayload, SweepReport, WidgetConfig, WidgetId};
use crate::store::{last_known_key, StateStore};
use crate::widgets::{available_queues, LogicalType, RankQueueBook, RenderContext, WidgetKind};

pub const IN_GAME_PHASE: &str = "InProgress";

struct RouterState {
    connection: ConnectionState,
    in_game: bool,
    ranks: RankQueueBook,
}

/// Authoritative sources to resync from after missing bus events
struct Upstream {
    poller: PollerSupervisor,
    connection: watch::Receiver<ConnectionState>,
}

pub struct EventRouter {
    engine: RenderEngine,
    cache: ResponseCache,
    store: StateStore,
    live: LiveDataLoop,
    upstream: Option<Upstream>,
    state: Mutex<RouterState>,
}

impl EventRouter {
    pub fn new(engine: RenderEngine, cache: ResponseCache, store: StateStore, live: LiveDataLoop) -> Self {
        Self {
            engine,
            cache,
            store,
            live,
            upstream: None,
            state: Mutex::new(RouterState {
                connection: ConnectionState::Disconnected,
                in_game: false,
                ranks: RankQueueBook::new(),
            }),
        }
    }

    pub fn with_upstream(
        mut self,
        poller: PollerSupervisor,
        connection: watch::Receiver<ConnectionState>,
    ) -> Self {
        self.upstream = Some(Upstream { poller, connection });
        self
    }

    pub fn connection(&self) -> ConnectionState {
        self.state.lock().connection
    }

    pub fn is_in_game(&self) -> bool {
        self.state.lock().in_game
    }

    pub fn rank_queue(&self, id: &WidgetId) -> Option<String> {
        self.state.lock().ranks.current(id).map(str::to_string)
    }

    // ---- bus events ----

    pub fn handle_event(&self, event: &AgentEvent) {
        match event {
            AgentEvent::DataUpdated { logical_type, payload, previous, .. } => {
                self.on_data_updated(logical_type, payload, previous.as_ref())
            }
            AgentEvent::GameStateChanged { phase, previous_phase } => {
                self.on_game_state_changed(phase, previous_phase)
            }
            AgentEvent::ConnectionChanged { state, reason, .. } => {
                self.on_connection_changed(*state, reason)
            }
            AgentEvent::Error { message, recoverable } => {
                debug!("upstream error (recoverable: {}): {}", recoverable, message)
            }
            // render and device events are informational for this layer
            _ => {}
        }
    }

    fn on_data_updated(&self, logical_type: &str, payload: &Value, previous: Option<&Value>) {
        let Ok(logical) = logical_type.parse::<LogicalType>() else {
            warn!("no handler for data type {}", logical_type);
            return;
        };
        debug!("{} updated (had previous: {})", logical_type, previous.is_some());
        if logical != LogicalType::Live {
            // last-known data survives restarts, aged out by the cache sweep
            self.store.cache_set(&last_known_key(logical_type), payload.clone(), None);
        }

        if logical == LogicalType::Gameflow {
            // a session started mid-match never sees a phase transition
            if let Some(phase) = payload.as_str() {
                self.set_in_game(phase == IN_GAME_PHASE);
            }
        }

        self.render_matching(|kind| kind.consumes(logical));
    }

    fn on_game_state_changed(&self, phase: &str, previous_phase: &str) {
        info!("phase {} -> {}", previous_phase, phase);
        self.store.set_phase(CONNECTION_NAME, phase);
        self.set_in_game(phase == IN_GAME_PHASE);
        self.render_matching(WidgetKind::is_phase_dependent);
    }

    /// Returns true when the flag changed
    fn set_in_game(&self, in_game: bool) -> bool {
        {
            let mut state = self.state.lock();
            if state.in_game == in_game {
                return false;
            }
            state.in_game = in_game;
        }

        if in_game {
            info!("match started, starting live data");
            self.live.start();
        } else {
            info!("match over, stopping live data");
            self.live.stop();
        }
        self.render_matching(WidgetKind::is_live);
        true
    }

    fn on_connection_changed(&self, connection: ConnectionState, reason: &str) {
        {
            let mut state = self.state.lock();
            if state.connection == connection {
                return;
            }
            state.connection = connection;
        }
        info!("client {} ({})", connection, reason);

        match connection {
            ConnectionState::Disconnected => {
                self.state.lock().in_game = false;
                self.live.stop();
                self.engine.render_connection_state(connection);
            }
            ConnectionState::Reconnecting => {
                self.engine.render_connection_state(connection);
            }
            ConnectionState::Connected => {
                self.refresh_all();
            }
        }
    }

    // ---- host events ----

    pub fn handle_host_event(&self, event: HostEvent) {
        match event {
            HostEvent::DeviceStatus { devices } => self.device_status(&devices),
            HostEvent::WidgetsRegistered { device_id, widgets } => {
                self.widgets_registered(&device_id, &widgets)
            }
            HostEvent::WidgetsRemoved { device_id, uids } => self.widgets_removed(&device_id, &uids),
            HostEvent::WidgetInteracted { device_id, widget } => {
                self.widget_interacted(&device_id, &widget)
            }
        }
    }

    pub fn device_status(&self, devices: &[String]) {
        self.engine.device_status(devices);
        let engine = &self.engine;
        let mut state = self.state.lock();
        state.ranks.retain(|id| engine.is_device_connected(&id.device_id));
    }

    pub fn widgets_registered(&self, device_id: &str, configs: &[WidgetConfig]) {
        let ids = self.engine.register_widgets(device_id, configs);
        {
            let mut state = self.state.lock();
            for (id, config) in ids.iter().zip(configs) {
                if WidgetKind::from_type(&config.kind) != Some(WidgetKind::Rank) {
                    continue;
                }
                let explicit = config.setting_str("queue");
                let queue = state.ranks.assign(id, explicit);
                debug!("rank widget {} defaults to {}", id, queue);
                if explicit.is_none() {
                    let view = self.store.widget_state(id).and_then(|s| s.view);
                    if let Some(view) = view {
                        debug!("rank widget {} restored to {}", id, view);
                        state.ranks.restore(id, &view);
                    }
                }
            }
        }
        for (id, config) in ids.iter().zip(configs) {
            self.render_widget(id, config);
        }
    }

    pub fn widgets_removed(&self, device_id: &str, uids: &[String]) {
        let removed = self.engine.remove_widgets(device_id, uids);
        let mut state = self.state.lock();
        for id in &removed {
            state.ranks.release(id);
            self.store.remove_widget_state(id);
        }
    }

    pub fn widget_interacted(&self, device_id: &str, config: &WidgetConfig) {
        let id = WidgetId::new(device_id, config.uid.clone());
        if WidgetKind::from_type(&config.kind) == Some(WidgetKind::Rank) {
            let available = self.cache.payload(LogicalType::Ranked.as_str())
                .map(|v| available_queues(&v))
                .unwrap_or_default();
            let queue = self.state.lock().ranks.cycle(&id, &available);
            if let Some(queue) = &queue {
                debug!("rank widget {} now shows {}", id, queue);
            }
            self.store.set_widget_view(&id, &config.kind, queue);
        }
        self.render_widget(&id, config);
    }

    // ---- rendering ----

    /// Re-render every widget from the cache
    pub fn refresh_all(&self) -> usize {
        self.render_matching(|_| true)
    }

    fn render_matching(&self, filter: impl Fn(WidgetKind) -> bool) -> usize {
        let mut count = 0;
        for (id, config) in self.engine.live_widgets() {
            let matches = WidgetKind::from_type(&config.kind).map(&filter).unwrap_or(false);
            if matches {
                self.render_widget(&id, &config);
                count += 1;
            }
        }
        count
    }

    fn render_widget(&self, id: &WidgetId, config: &WidgetConfig) {
        let payload = self.payload_for(id, config);
        self.engine.request_render(id, payload);
    }

    fn payload_for(&self, id: &WidgetId, config: &WidgetConfig) -> RenderPayload {
        let Some(kind) = WidgetKind::from_type(&config.kind) else {
            warn!("unsupported widget type {}", config.kind);
            return RenderPayload::text(config.kind.clone(), vec!["Unsupported".to_string()]);
        };

        let mut state = self.state.lock();
        if state.connection != ConnectionState::Connected {
            return RenderPayload::for_connection(state.connection);
        }

        let rank_queue = if kind == WidgetKind::Rank {
            let available = self
                .cache
                .payload(LogicalType::Ranked.as_str())
                .map(|v| available_queues(&v))
                .unwrap_or_default();
            state.ranks.resolve(id, &available)
        } else {
            None
        };

        let ctx = RenderContext {
            cache: &self.cache,
            in_game: state.in_game,
            rank_queue: rank_queue.as_deref(),
            last_known: Some(&self.store),
        };
        kind.render(&ctx)
    }

    /// Catch up after missed bus events: adopt the monitor's connection
    /// state and replay the cached responses before redrawing
    pub fn resync(&self) {
        let Some(upstream) = &self.upstream else {
            self.refresh_all();
            return;
        };
        let actual = *upstream.connection.borrow();
        if actual != self.connection() {
            self.on_connection_changed(actual, "resync");
        }
        if actual == ConnectionState::Connected {
            upstream.poller.replay();
        }
        self.refresh_all();
    }

    // ---- maintenance ----

    /// Engine sweep plus the bookkeeping the engine does not own
    pub fn cleanup_sweep(&self) -> SweepReport {
        let mut report = self.engine.cleanup_sweep();
        let connected = {
            let mut state = self.state.lock();
            for id in &report.removed {
                state.ranks.release(id);
            }
            state.connection == ConnectionState::Connected
        };
        // while connected unchanged payloads keep their first timestamp
        if !connected {
            report.expired_responses = self.cache.sweep_older_than(self.engine.settings().staleness_window);
            if report.expired_responses > 0 {
                debug!("dropped {} stale responses", report.expired_responses);
            }
        }
        report
    }

    pub fn spawn_cleanup(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                self.cleanup_sweep();
            }
        })
    }

    /// Drive the router from the bus and the host until both close
    pub async fn run(
        self: Arc<Self>,
        mut events: broadcast::Receiver<AgentEvent>,
        mut host: mpsc::Receiver<HostEvent>,
    ) {
        let mut host_open = true;
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => self.handle_event(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("router lagged {} events, resyncing", n);
                        self.resync();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                event = host.recv(), if host_open => match event {
                    Some(event) => self.handle_host_event(event),
                    None => {
                        info!("host channel closed");
                        host_open = false;
                    }
                },
            }
        }
        debug!("router stopped");
    }
}
