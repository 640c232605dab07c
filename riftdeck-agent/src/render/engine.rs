//! Render throttle & retry engine
//!
//! Per widget:
//! - at most one pending render; a new request replaces it (latest wins)
//! - successive successful renders are at least `throttle` apart
//! - transient failures retry with linear backoff, terminal ones mark the key dead
//!
//! Pending renders are plain tokio tasks sleeping until their slot. Each one
//! carries a sequence number; a task whose number no longer matches the
//! pending entry has been superseded and exits without drawing.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::registry::{DeviceRegistry, Lifecycle, WidgetRecord};
use super::{draw_payload, DeckSurface, RenderPayload, WidgetConfig, WidgetId};
use crate::config::RenderConfig;
use crate::error::RenderError;
use crate::events::{AgentEvent, ConnectionState, EventBus};
use crate::store::StateStore;

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub throttle: Duration,
    pub retry_delay: Duration,
    pub max_retries: u32,
    pub staleness_window: Duration,
}

impl From<&RenderConfig> for RenderSettings {
    fn from(config: &RenderConfig) -> Self {
        Self {
            throttle: Duration::from_millis(config.throttle_interval_ms),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            max_retries: config.max_retries,
            staleness_window: Duration::from_millis(config.staleness_window_ms),
        }
    }
}

#[derive(Debug)]
pub struct PendingRenderTask {
    pub payload: RenderPayload,
    pub scheduled_at: Instant,
    seq: u64,
    timer: JoinHandle<()>,
}

/// Result of one cleanup sweep
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: Vec<WidgetId>,
    pub orphaned_tasks: usize,
    pub stale_entries: usize,
    /// Response cache entries aged out while the client was away
    pub expired_responses: usize,
}

#[derive(Default)]
struct EngineState {
    registry: DeviceRegistry,
    pending: HashMap<WidgetId, PendingRenderTask>,
    next_seq: u64,
}

struct EngineInner {
    state: Mutex<EngineState>,
    surface: Arc<dyn DeckSurface>,
    store: StateStore,
    events: EventBus,
    settings: RenderSettings,
}

#[derive(Clone)]
pub struct RenderEngine {
    inner: Arc<EngineInner>,
}

impl RenderEngine {
    pub fn new(
        surface: Arc<dyn DeckSurface>,
        store: StateStore,
        events: EventBus,
        settings: RenderSettings,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                state: Mutex::new(EngineState::default()),
                surface,
                store,
                events,
                settings,
            }),
        }
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.inner.settings
    }

    /// Queue a render; returns immediately
    pub fn request_render(&self, id: &WidgetId, payload: RenderPayload) {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        let Some(record) = state.registry.get(id) else {
            debug!("render request for unknown widget {}", id);
            return;
        };
        if record.lifecycle.is_terminal() {
            debug!("render request for {:?} widget {} ignored", record.lifecycle, id);
            return;
        }

        let delay = self.spacing_delay(record, Instant::now());
        self.inner.store.set_widget_payload(id, &record.config.kind, &payload);
        self.schedule(state, id, payload, delay);
    }

    /// Time left before this widget may render again
    fn spacing_delay(&self, record: &WidgetRecord, now: Instant) -> Duration {
        let throttle = self.inner.settings.throttle;
        if record.in_flight {
            return throttle;
        }
        match record.last_render_at {
            Some(last) => throttle.saturating_sub(now.saturating_duration_since(last)),
            None => Duration::ZERO,
        }
    }

    fn schedule(&self, state: &mut EngineState, id: &WidgetId, payload: RenderPayload, delay: Duration) {
        if let Some(previous) = state.pending.remove(id) {
            previous.timer.abort();
        }
        state.next_seq += 1;
        let seq = state.next_seq;

        let engine = self.clone();
        let widget = id.clone();
        let timer = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            engine.execute(widget, seq).await;
        });

        state.pending.insert(
            id.clone(),
            PendingRenderTask { payload, scheduled_at: Instant::now() + delay, seq, timer },
        );
    }

    async fn execute(&self, id: WidgetId, seq: u64) {
        let payload = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;

            match state.pending.get(&id) {
                Some(task) if task.seq == seq => {}
                _ => return,
            }
            let Some(task) = state.pending.remove(&id) else { return };

            let Some(record) = state.registry.get(&id) else {
                return;
            };
            let wait = self.spacing_delay(record, Instant::now());
            if !wait.is_zero() {
                // another draw finished or started since scheduling
                self.schedule(state, &id, task.payload, wait);
                return;
            }

            if let Some(record) = state.registry.get_mut(&id) {
                record.in_flight = true;
            }
            task.payload
        };

        let result = draw_payload(self.inner.surface.as_ref(), &id, &payload).await;
        self.complete(&id, &payload, result);
    }

    fn complete(&self, id: &WidgetId, payload: &RenderPayload, result: Result<(), RenderError>) {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let settings = &self.inner.settings;

        let Some(record) = state.registry.get_mut(id) else {
            debug!("discarding render outcome for removed widget {}", id);
            return;
        };
        record.in_flight = false;

        let error = match result {
            Ok(()) => {
                record.last_render_at = Some(Instant::now());
                record.consecutive_errors = 0;
                record.lifecycle = Lifecycle::Active;
                self.inner.events.publish(AgentEvent::RenderSucceeded { widget: id.clone() });
                return;
            }
            Err(e) => e,
        };

        record.consecutive_errors += 1;
        let attempt = record.consecutive_errors;
        self.inner.events.publish(AgentEvent::RenderFailed {
            widget: id.clone(),
            message: error.message.clone(),
            attempt,
        });

        if error.is_terminal() {
            warn!("widget {} is gone ({}), marking dead", id, error.message);
            record.lifecycle = Lifecycle::Dead;
            if let Some(task) = state.pending.remove(id) {
                task.timer.abort();
            }
            return;
        }

        if attempt > settings.max_retries {
            warn!("widget {} failed {} times, giving up", id, attempt);
            record.lifecycle = Lifecycle::Failed;
            if let Some(task) = state.pending.remove(id) {
                task.timer.abort();
            }
            self.draw_unavailable(id.clone());
            return;
        }

        if state.pending.contains_key(id) {
            // a newer request is already queued and will redraw
            debug!("render of {} failed, newer request pending", id);
            return;
        }

        let retry_payload = self.inner.store.widget_payload(id).unwrap_or_else(|| payload.clone());
        let delay = settings.retry_delay * attempt;
        debug!("render of {} failed ({}), retry {} in {:?}", id, error.message, attempt, delay);
        self.schedule(state, id, retry_payload, delay);
    }

    /// One best-effort draw of the error placeholder; outcome ignored
    fn draw_unavailable(&self, id: WidgetId) {
        let surface = self.inner.surface.clone();
        tokio::spawn(async move {
            if let Err(e) = draw_payload(surface.as_ref(), &id, &RenderPayload::unavailable()).await {
                debug!("error placeholder for {} not drawn: {}", id, e.message);
            }
        });
    }

    /// Push the connection-state payload to every drawable widget.
    /// Returns the number of widgets touched.
    pub fn render_connection_state(&self, connection: ConnectionState) -> usize {
        let payload = RenderPayload::for_connection(connection);
        let ids = self.live_widgets();
        for (id, _) in &ids {
            self.request_render(id, payload.clone());
        }
        info!("rendered {} state on {} widgets", connection, ids.len());
        ids.len()
    }

    // ---- device & widget lifecycle ----

    pub fn device_status(&self, devices: &[String]) {
        let mut state = self.inner.state.lock();
        let delta = state.registry.apply_device_status(devices);

        for (device, widgets) in delta.disconnected {
            for id in &widgets {
                if let Some(task) = state.pending.remove(id) {
                    task.timer.abort();
                }
            }
            info!("device {} disconnected, dropped {} widgets", device, widgets.len());
            self.inner.events.publish(AgentEvent::DeviceDisconnected { device_id: device });
        }
        for device in delta.connected {
            info!("device {} connected", device);
            self.inner.events.publish(AgentEvent::DeviceConnected { device_id: device });
        }
    }

    /// Register widgets; the host only reports keys of present devices, so an
    /// unknown device is marked connected first.
    pub fn register_widgets(&self, device_id: &str, configs: &[WidgetConfig]) -> Vec<WidgetId> {
        let mut state = self.inner.state.lock();
        if state.registry.connect_device(device_id) {
            debug!("device {} implied by widget registration", device_id);
            self.inner.events.publish(AgentEvent::DeviceConnected { device_id: device_id.to_string() });
        }

        let mut ids = Vec::with_capacity(configs.len());
        for config in configs {
            let id = WidgetId::new(device_id, config.uid.clone());
            if let Some(task) = state.pending.remove(&id) {
                task.timer.abort();
            }
            if let Some(id) = state.registry.register(device_id, config.clone()) {
                ids.push(id);
            }
        }
        debug!("registered {} widgets on {}", ids.len(), device_id);
        ids
    }

    pub fn remove_widgets(&self, device_id: &str, uids: &[String]) -> Vec<WidgetId> {
        let mut state = self.inner.state.lock();
        let mut removed = Vec::new();
        for uid in uids {
            let id = WidgetId::new(device_id, uid.clone());
            if let Some(task) = state.pending.remove(&id) {
                task.timer.abort();
            }
            if state.registry.remove(&id).is_some() {
                removed.push(id);
            }
        }
        removed
    }

    /// Periodic garbage collection
    pub fn cleanup_sweep(&self) -> SweepReport {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        let mut report = SweepReport::default();

        for id in state.registry.drain_terminal() {
            if let Some(task) = state.pending.remove(&id) {
                task.timer.abort();
            }
            self.inner.store.remove_widget_state(&id);
            report.removed.push(id);
        }

        let registry = &state.registry;
        state.pending.retain(|id, task| {
            if registry.contains(id) {
                true
            } else {
                task.timer.abort();
                report.orphaned_tasks += 1;
                false
            }
        });

        let now = Instant::now();
        let window = self.inner.settings.staleness_window;
        for record in state.registry.records_mut() {
            let stale = record
                .last_render_at
                .map(|at| now.saturating_duration_since(at) > window)
                .unwrap_or(false);
            if stale && !record.in_flight && !state.pending.contains_key(&record.id) {
                record.last_render_at = None;
                record.consecutive_errors = 0;
                report.stale_entries += 1;
            }
        }

        if !report.removed.is_empty() {
            info!("cleanup removed {} widgets", report.removed.len());
        }
        report
    }

    // ---- read access ----

    /// Drawable widgets with their config, sorted by id
    pub fn live_widgets(&self) -> Vec<(WidgetId, WidgetConfig)> {
        let state = self.inner.state.lock();
        state
            .registry
            .live_records()
            .into_iter()
            .map(|r| (r.id.clone(), r.config.clone()))
            .collect()
    }

    pub fn record(&self, id: &WidgetId) -> Option<WidgetRecord> {
        self.inner.state.lock().registry.get(id).cloned()
    }

    pub fn lifecycle(&self, id: &WidgetId) -> Option<Lifecycle> {
        self.inner.state.lock().registry.get(id).map(|r| r.lifecycle)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn widget_count(&self) -> usize {
        self.inner.state.lock().registry.len()
    }

    pub fn is_device_connected(&self, device_id: &str) -> bool {
        self.inner.state.lock().registry.is_device_connected(device_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    #[derive(Debug, Clone)]
    struct Draw {
        widget: WidgetId,
        title: String,
        at: Instant,
    }

    /// Surface recording every draw; pops scripted failures first
    #[derive(Default)]
    struct ScriptedSurface {
        draws: parking_lot::Mutex<Vec<Draw>>,
        failures: parking_lot::Mutex<VecDeque<String>>,
        always_fail: parking_lot::Mutex<Option<String>>,
    }

    impl ScriptedSurface {
        fn record(&self, widget: &WidgetId, title: &str) -> Result<(), RenderError> {
            self.draws.lock().push(Draw {
                widget: widget.clone(),
                title: title.to_string(),
                at: Instant::now(),
            });
            if let Some(message) = self.always_fail.lock().clone() {
                if title != "Unavailable" {
                    return Err(RenderError::new(message));
                }
            }
            match self.failures.lock().pop_front() {
                Some(message) => Err(RenderError::new(message)),
                None => Ok(()),
            }
        }

        fn titles(&self) -> Vec<String> {
            self.draws.lock().iter().map(|d| d.title.clone()).collect()
        }
    }

    #[async_trait]
    impl DeckSurface for ScriptedSurface {
        async fn draw_text(&self, widget: &WidgetId, title: &str, _lines: &[String]) -> Result<(), RenderError> {
            self.record(widget, title)
        }

        async fn draw_image(
            &self,
            widget: &WidgetId,
            title: &str,
            _lines: &[String],
            _image_data: &str,
        ) -> Result<(), RenderError> {
            self.record(widget, title)
        }
    }

    fn settings() -> RenderSettings {
        RenderSettings {
            throttle: Duration::from_millis(100),
            retry_delay: Duration::from_millis(50),
            max_retries: 3,
            staleness_window: Duration::from_secs(60),
        }
    }

    fn engine_with(surface: Arc<ScriptedSurface>) -> (RenderEngine, StateStore) {
        let store = StateStore::new("unused-state.json");
        let engine = RenderEngine::new(surface, store.clone(), EventBus::default(), settings());
        (engine, store)
    }

    fn text(title: &str) -> RenderPayload {
        RenderPayload::text(title, vec![])
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_coalesce_latest_wins() {
        let surface = Arc::new(ScriptedSurface::default());
        let (engine, _) = engine_with(surface.clone());
        let ids = engine.register_widgets("dev", &[WidgetConfig::new("k", "wallet")]);
        let id = &ids[0];

        engine.request_render(id, text("A"));
        engine.request_render(id, text("B"));
        settle().await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(surface.titles(), vec!["B".to_string()]);
        assert_eq!(engine.lifecycle(id), Some(Lifecycle::Active));
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_spacing() {
        let surface = Arc::new(ScriptedSurface::default());
        let (engine, _) = engine_with(surface.clone());
        let id = engine.register_widgets("dev", &[WidgetConfig::new("k", "wallet")]).remove(0);

        engine.request_render(&id, text("1"));
        settle().await;
        for i in 2..6 {
            tokio::time::sleep(Duration::from_millis(30)).await;
            engine.request_render(&id, text(&i.to_string()));
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        let draws = surface.draws.lock().clone();
        assert_eq!(draws.first().unwrap().title, "1");
        assert_eq!(draws.last().unwrap().title, "5");
        for pair in draws.windows(2) {
            assert!(pair[1].at.duration_since(pair[0].at) >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retry_then_fail() {
        let surface = Arc::new(ScriptedSurface::default());
        *surface.always_fail.lock() = Some("broken pipe".into());
        let (engine, store) = engine_with(surface.clone());
        let id = engine.register_widgets("dev", &[WidgetConfig::new("k", "rank")]).remove(0);

        engine.request_render(&id, text("Gold"));
        tokio::time::sleep(Duration::from_secs(5)).await;

        let draws = surface.draws.lock().clone();
        let attempts: Vec<&Draw> = draws.iter().filter(|d| d.title == "Gold").collect();
        // first attempt + max_retries retries
        assert_eq!(attempts.len(), 4);
        let gaps: Vec<Duration> = attempts.windows(2).map(|w| w[1].at.duration_since(w[0].at)).collect();
        assert!(gaps.windows(2).all(|g| g[1] > g[0]), "delays not increasing: {:?}", gaps);
        assert_eq!(draws.last().unwrap().title, "Unavailable");
        assert_eq!(engine.lifecycle(&id), Some(Lifecycle::Failed));

        let report = engine.cleanup_sweep();
        assert_eq!(report.removed, vec![id.clone()]);
        assert_eq!(engine.widget_count(), 0);
        assert!(store.widget_state(&id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failure_marks_dead_without_retry() {
        let surface = Arc::new(ScriptedSurface::default());
        surface.failures.lock().push_back("Action is not alive".into());
        let (engine, _) = engine_with(surface.clone());
        let id = engine.register_widgets("dev", &[WidgetConfig::new("k", "rank")]).remove(0);

        engine.request_render(&id, text("Gold"));
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(surface.titles(), vec!["Gold".to_string()]);
        assert_eq!(engine.lifecycle(&id), Some(Lifecycle::Dead));

        // dead widgets take no further renders
        engine.request_render(&id, text("Silver"));
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(surface.titles().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_uses_latest_stored_payload() {
        let surface = Arc::new(ScriptedSurface::default());
        surface.failures.lock().push_back("timeout".into());
        let (engine, _) = engine_with(surface.clone());
        let id = engine.register_widgets("dev", &[WidgetConfig::new("k", "rank")]).remove(0);

        engine.request_render(&id, text("Gold"));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(surface.titles(), vec!["Gold".to_string(), "Gold".to_string()]);
        let record = engine.record(&id).unwrap();
        assert_eq!(record.consecutive_errors, 0);
        assert_eq!(record.lifecycle, Lifecycle::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_connection_render_reaches_every_widget() {
        let surface = Arc::new(ScriptedSurface::default());
        let (engine, _) = engine_with(surface.clone());
        let configs: Vec<WidgetConfig> =
            (0..5).map(|i| WidgetConfig::new(format!("k{}", i), "summoner")).collect();
        let ids = engine.register_widgets("dev", &configs);
        for id in &ids {
            engine.request_render(id, text("Summoner"));
        }
        tokio::time::sleep(Duration::from_millis(10)).await;

        let touched = engine.render_connection_state(ConnectionState::Disconnected);
        assert_eq!(touched, 5);
        tokio::time::sleep(Duration::from_secs(1)).await;

        let draws = surface.draws.lock().clone();
        for id in &ids {
            let last = draws.iter().filter(|d| &d.widget == id).last().unwrap();
            assert_eq!(last.title, "Offline");
        }
        assert_eq!(draws.iter().filter(|d| d.title == "Offline").count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_removal_cancels_pending() {
        let surface = Arc::new(ScriptedSurface::default());
        let (engine, _) = engine_with(surface.clone());
        engine.device_status(&["dev".to_string()]);
        let id = engine.register_widgets("dev", &[WidgetConfig::new("k", "wallet")]).remove(0);

        engine.request_render(&id, text("RP"));
        assert_eq!(engine.pending_count(), 1);
        engine.device_status(&[]);
        assert_eq!(engine.pending_count(), 0);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(surface.titles().is_empty());
        assert!(engine.record(&id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_resets_stale_render_entries() {
        let surface = Arc::new(ScriptedSurface::default());
        let (engine, _) = engine_with(surface.clone());
        let id = engine.register_widgets("dev", &[WidgetConfig::new("k", "wallet")]).remove(0);
        engine.request_render(&id, text("RP"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(engine.record(&id).unwrap().last_render_at.is_some());

        tokio::time::sleep(Duration::from_secs(61)).await;
        let report = engine.cleanup_sweep();
        assert_eq!(report.stale_entries, 1);
        assert!(report.removed.is_empty());
        assert!(engine.record(&id).unwrap().last_render_at.is_none());
    }
}
