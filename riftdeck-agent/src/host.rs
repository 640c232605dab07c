//! Host bridge
//!
//! JSON lines in both directions:
//! - stdin: lifecycle events from the plugin runtime (`HostEvent`)
//! - stdout: one `draw` command per render
//!
//! Logging never goes to stdout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::RenderError;
use crate::render::{DeckSurface, WidgetConfig, WidgetId};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HostEvent {
    DeviceStatus {
        devices: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    WidgetsRegistered {
        device_id: String,
        widgets: Vec<WidgetConfig>,
    },
    #[serde(rename_all = "camelCase")]
    WidgetsRemoved {
        device_id: String,
        uids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    WidgetInteracted {
        device_id: String,
        widget: WidgetConfig,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RenderSpec<'a> {
    title: &'a str,
    lines: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DrawCommand<'a> {
    method: &'static str,
    device_id: &'a str,
    uid: &'a str,
    render: RenderSpec<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    encoding: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_data: Option<&'a str>,
}

/// Draw surface writing JSON lines to the host
pub struct StdioHost {
    out: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl StdioHost {
    pub fn new(out: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self { out: tokio::sync::Mutex::new(out) }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(tokio::io::stdout()))
    }

    async fn send(&self, command: &DrawCommand<'_>) -> Result<(), RenderError> {
        let mut line = serde_json::to_string(command)
            .map_err(|e| RenderError::new(format!("cannot encode draw: {}", e)))?;
        line.push('\n');

        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes())
            .await
            .map_err(|e| RenderError::new(format!("write to host failed: {}", e)))?;
        out.flush()
            .await
            .map_err(|e| RenderError::new(format!("write to host failed: {}", e)))
    }
}

#[async_trait]
impl DeckSurface for StdioHost {
    async fn draw_text(&self, widget: &WidgetId, title: &str, lines: &[String]) -> Result<(), RenderError> {
        self.send(&DrawCommand {
            method: "draw",
            device_id: &widget.device_id,
            uid: &widget.uid,
            render: RenderSpec { title, lines },
            encoding: None,
            image_data: None,
        })
        .await
    }

    async fn draw_image(
        &self,
        widget: &WidgetId,
        title: &str,
        lines: &[String],
        image_data: &str,
    ) -> Result<(), RenderError> {
        self.send(&DrawCommand {
            method: "draw",
            device_id: &widget.device_id,
            uid: &widget.uid,
            render: RenderSpec { title, lines },
            encoding: Some("base64"),
            image_data: Some(image_data),
        })
        .await
    }
}

/// Forward host events read line by line; malformed lines are skipped
pub fn spawn_line_reader<R>(reader: R, tx: mpsc::Sender<HostEvent>) -> JoinHandle<()>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<HostEvent>(line) {
                        Ok(event) => {
                            debug!(?event, "host event");
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("ignoring malformed host line: {}", e),
                    }
                }
                Ok(None) => {
                    info!("host input closed");
                    break;
                }
                Err(e) => {
                    warn!("host input error: {}", e);
                    break;
                }
            }
        }
    })
}

pub fn spawn_stdin_reader(tx: mpsc::Sender<HostEvent>) -> JoinHandle<()> {
    spawn_line_reader(tokio::io::stdin(), tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_host_event_parsing() {
        let event: HostEvent = serde_json::from_value(json!({
            "event": "widgetsRegistered",
            "deviceId": "dev-1",
            "widgets": [{ "uid": "k1", "type": "rank", "settings": { "queue": "RANKED_FLEX_SR" } }]
        }))
        .unwrap();
        match event {
            HostEvent::WidgetsRegistered { device_id, widgets } => {
                assert_eq!(device_id, "dev-1");
                assert_eq!(widgets[0].setting_str("queue"), Some("RANKED_FLEX_SR"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let event: HostEvent =
            serde_json::from_str(r#"{"event":"deviceStatus","devices":["a","b"]}"#).unwrap();
        assert_eq!(event, HostEvent::DeviceStatus { devices: vec!["a".into(), "b".into()] });
    }

    #[tokio::test]
    async fn test_line_reader_skips_malformed() {
        let input: &'static [u8] = b"{\"event\":\"deviceStatus\",\"devices\":[\"d\"]}\nnot json\n\n{\"event\":\"widgetsRemoved\",\"deviceId\":\"d\",\"uids\":[\"k\"]}\n";
        let (tx, mut rx) = mpsc::channel(8);
        spawn_line_reader(input, tx).await.unwrap();

        assert_eq!(rx.recv().await, Some(HostEvent::DeviceStatus { devices: vec!["d".into()] }));
        assert_eq!(
            rx.recv().await,
            Some(HostEvent::WidgetsRemoved { device_id: "d".into(), uids: vec!["k".into()] })
        );
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_draw_commands_are_json_lines() {
        let (writer, mut reader) = tokio::io::duplex(4096);
        let host = StdioHost::new(Box::new(writer));
        let id = WidgetId::new("dev", "k1");

        host.draw_text(&id, "Wallet", &["10 RP".to_string()]).await.unwrap();
        host.draw_image(&id, "Offline", &[], "placeholder/offline").await.unwrap();
        drop(host);

        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();
        let lines: Vec<Value> = out.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["method"], "draw");
        assert_eq!(lines[0]["deviceId"], "dev");
        assert_eq!(lines[0]["render"]["lines"][0], "10 RP");
        assert!(lines[0].get("encoding").is_none());
        assert_eq!(lines[1]["encoding"], "base64");
        assert_eq!(lines[1]["imageData"], "placeholder/offline");
    }
}
