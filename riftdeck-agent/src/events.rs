//! In-process event bus
//!
//! Layers talk through a tokio broadcast channel: the poller and the monitor
//! publish, the router (and tests) subscribe. Publishing never blocks and
//! never fails when nobody listens.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

use crate::render::WidgetId;

/// Connection state of the local client, single value per process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Reconnecting,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum AgentEvent {
    DataUpdated {
        logical_type: String,
        payload: Value,
        previous: Option<Value>,
        timestamp: DateTime<Utc>,
    },
    GameStateChanged {
        phase: String,
        previous_phase: String,
    },
    ConnectionChanged {
        state: ConnectionState,
        connected: bool,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
        recoverable: bool,
    },
    RenderSucceeded {
        widget: WidgetId,
    },
    RenderFailed {
        widget: WidgetId,
        message: String,
        attempt: u32,
    },
    DeviceConnected {
        device_id: String,
    },
    DeviceDisconnected {
        device_id: String,
    },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: AgentEvent) {
        trace!(?event, "publish");
        // Err only means there is no subscriber right now
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
