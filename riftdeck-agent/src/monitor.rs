//! Process / connection monitor
//!
//! Fixed-interval liveness check of the client process, independent of
//! polling. Owns the single ConnectionState and the current API handle.
//! Every real transition emits one ConnectionChanged; repeats are dropped.

use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::discovery::ClientDiscovery;
use crate::events::{AgentEvent, ConnectionState, EventBus};
use crate::poller::{LocalApi, PollerSupervisor};
use crate::store::StateStore;

/// Name of the connection record in the state file
pub const CONNECTION_NAME: &str = "lcu";

struct MonitorState {
    connection: ConnectionState,
    generation: u64,
    handle: Option<Arc<dyn LocalApi>>,
}

pub struct ConnectionMonitor {
    discovery: Arc<dyn ClientDiscovery>,
    poller: PollerSupervisor,
    events: EventBus,
    store: StateStore,
    config: MonitorConfig,
    state: Mutex<MonitorState>,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionMonitor {
    pub fn new(
        discovery: Arc<dyn ClientDiscovery>,
        poller: PollerSupervisor,
        events: EventBus,
        store: StateStore,
        config: MonitorConfig,
    ) -> Self {
        Self {
            discovery,
            poller,
            events,
            store,
            config,
            state: Mutex::new(MonitorState {
                connection: ConnectionState::Disconnected,
                generation: 0,
                handle: None,
            }),
            state_tx: watch::channel(ConnectionState::Disconnected).0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.lock().connection
    }

    /// Latest state without going through the bus; never lags
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub fn handle(&self) -> Option<Arc<dyn LocalApi>> {
        self.state.lock().handle.clone()
    }

    /// Apply a state; returns false when nothing changed
    fn transition(&self, next: ConnectionState, reason: &str) -> bool {
        {
            let mut state = self.state.lock();
            if state.connection == next {
                return false;
            }
            info!("connection {} -> {} ({})", state.connection, next, reason);
            state.connection = next;
            self.state_tx.send_replace(next);
        }
        self.store.set_connection(CONNECTION_NAME, next, reason);
        self.events.publish(AgentEvent::ConnectionChanged {
            state: next,
            connected: next.is_connected(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
        true
    }

    /// Stop polling and drop the handle; credentials die with the session
    fn teardown(&self) {
        self.poller.stop();
        self.state.lock().handle = None;
    }

    /// One liveness check
    pub async fn check_once(&self) {
        let pid = self.discovery.client_pid().await;
        let (connection, handle_pid) = {
            let state = self.state.lock();
            (state.connection, state.handle.as_ref().and_then(|h| h.pid()))
        };

        match (connection, pid) {
            (ConnectionState::Connected, None) => {
                self.teardown();
                self.transition(ConnectionState::Disconnected, "client process exited");
            }
            (ConnectionState::Connected, Some(pid)) => {
                if matches!(handle_pid, Some(known) if known != pid) {
                    // new process means new port and token
                    info!("client restarted (pid {:?} -> {})", handle_pid, pid);
                    self.teardown();
                    self.transition(ConnectionState::Disconnected, "client restarted");
                    self.reconnect().await;
                }
            }
            (ConnectionState::Disconnected, Some(_)) => self.reconnect().await,
            (ConnectionState::Disconnected, None) => debug!("client not running"),
            (ConnectionState::Reconnecting, _) => debug!("reconnect already in progress"),
        }
    }

    /// Reconnect with linear backoff; always starts from a torn-down state
    pub async fn reconnect(&self) {
        self.teardown();
        self.transition(ConnectionState::Reconnecting, "client detected");

        let max_attempts = self.config.max_reconnect_attempts.max(1);
        let mut last_failure = "no attempt";
        for attempt in 1..=max_attempts {
            if self.discovery.client_pid().await.is_none() {
                self.transition(ConnectionState::Disconnected, "client process exited");
                return;
            }

            let generation = self.generation() + 1;
            match self.discovery.discover(generation).await {
                Ok(api) => {
                    {
                        let mut state = self.state.lock();
                        state.generation = generation;
                        state.handle = Some(api.clone());
                    }
                    self.poller.start(api, generation);
                    self.transition(ConnectionState::Connected, "client connected");
                    return;
                }
                Err(e) => {
                    warn!("reconnect attempt {}/{} failed: {}", attempt, max_attempts, e);
                    last_failure = e.reason();
                    if attempt < max_attempts {
                        tokio::time::sleep(self.config.reconnect_base_delay() * attempt).await;
                    }
                }
            }
        }

        let reason = format!("reconnect attempts exhausted ({})", last_failure);
        self.transition(ConnectionState::Disconnected, &reason);
    }

    /// Explicit disconnect, used on shutdown
    pub fn disconnect(&self, reason: &str) {
        self.teardown();
        self.transition(ConnectionState::Disconnected, reason);
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let every = self.config.check_interval().max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.check_once().await;
            }
        })
    }
}
