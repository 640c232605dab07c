//! Rendering layer
//!
//! - `WidgetId` / `WidgetConfig`: identity and static config of a key
//! - `RenderPayload`: what a key should show (text, or text + image)
//! - `DeckSurface`: the draw capability implemented by the host bridge
//! - `registry`: devices and widget runtime records
//! - `engine`: throttled, coalescing, retrying render scheduler

pub mod engine;
pub mod registry;

pub use engine::{RenderEngine, RenderSettings, SweepReport};
pub use registry::{DeviceRegistry, Lifecycle, WidgetRecord};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RenderError;
use crate::events::ConnectionState;

/// Identity of a key: (device id, widget uid)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetId {
    pub device_id: String,
    pub uid: String,
}

impl WidgetId {
    pub fn new(device_id: impl Into<String>, uid: impl Into<String>) -> Self {
        Self { device_id: device_id.into(), uid: uid.into() }
    }

    /// Key used in the persisted state document
    pub fn key(&self) -> String {
        format!("{}/{}", self.device_id, self.uid)
    }
}

impl std::fmt::Display for WidgetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.device_id, self.uid)
    }
}

/// Static widget configuration as delivered by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetConfig {
    pub uid: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub settings: Value,
}

impl WidgetConfig {
    pub fn new(uid: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { uid: uid.into(), kind: kind.into(), settings: Value::Null }
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = settings;
        self
    }

    pub fn setting_str(&self, name: &str) -> Option<&str> {
        self.settings.get(name).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RenderPayload {
    Text { title: String, lines: Vec<String> },
    Image { title: String, lines: Vec<String>, image: String },
}

impl RenderPayload {
    pub fn text(title: impl Into<String>, lines: Vec<String>) -> Self {
        RenderPayload::Text { title: title.into(), lines }
    }

    pub fn image(title: impl Into<String>, lines: Vec<String>, image: impl Into<String>) -> Self {
        RenderPayload::Image { title: title.into(), lines, image: image.into() }
    }

    pub fn title(&self) -> &str {
        match self {
            RenderPayload::Text { title, .. } | RenderPayload::Image { title, .. } => title,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, RenderPayload::Image { .. })
    }

    /// Rich placeholder shown while the client is closed
    pub fn offline() -> Self {
        Self::image("Offline", vec!["Client closed".to_string()], "placeholder/offline")
    }

    /// Rich placeholder for live widgets outside of a match
    pub fn not_in_game() -> Self {
        Self::image("Not in game", vec![], "placeholder/not-in-game")
    }

    /// Labelled placeholder for keys that gave up rendering
    pub fn unavailable() -> Self {
        Self::image("Unavailable", vec!["Error".to_string()], "placeholder/error")
    }

    pub fn loading() -> Self {
        Self::text("Loading", vec![])
    }

    /// Payload pushed to every key on a connection transition
    pub fn for_connection(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Disconnected => Self::offline(),
            ConnectionState::Reconnecting => Self::text("Reconnecting", vec![]),
            ConnectionState::Connected => Self::text("Connected", vec![]),
        }
    }
}

/// Draw capability of the host runtime
#[async_trait]
pub trait DeckSurface: Send + Sync {
    async fn draw_text(
        &self,
        widget: &WidgetId,
        title: &str,
        lines: &[String],
    ) -> Result<(), RenderError>;

    async fn draw_image(
        &self,
        widget: &WidgetId,
        title: &str,
        lines: &[String],
        image_data: &str,
    ) -> Result<(), RenderError>;
}

pub async fn draw_payload(
    surface: &dyn DeckSurface,
    widget: &WidgetId,
    payload: &RenderPayload,
) -> Result<(), RenderError> {
    match payload {
        RenderPayload::Text { title, lines } => surface.draw_text(widget, title, lines).await,
        RenderPayload::Image { title, lines, image } => {
            surface.draw_image(widget, title, lines, image).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_widget_config_from_host_json() {
        let config: WidgetConfig = serde_json::from_value(json!({
            "uid": "key-3",
            "type": "rank",
            "settings": { "queue": "RANKED_FLEX_SR" }
        }))
        .unwrap();
        assert_eq!(config.kind, "rank");
        assert_eq!(config.setting_str("queue"), Some("RANKED_FLEX_SR"));

        let bare: WidgetConfig = serde_json::from_value(json!({"uid": "k", "type": "wallet"})).unwrap();
        assert_eq!(bare.settings, Value::Null);
        assert_eq!(bare.setting_str("queue"), None);
    }

    #[test]
    fn test_connection_payloads() {
        assert!(RenderPayload::for_connection(ConnectionState::Disconnected).is_image());
        assert!(!RenderPayload::for_connection(ConnectionState::Reconnecting).is_image());
        assert_eq!(RenderPayload::for_connection(ConnectionState::Reconnecting).title(), "Reconnecting");
    }

    #[test]
    fn test_widget_id_key() {
        let id = WidgetId::new("dev", "uid");
        assert_eq!(id.key(), "dev/uid");
        assert_eq!(id.to_string(), "dev/uid");
    }
}
