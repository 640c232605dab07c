//! Device and widget registry
//!
//! A widget only exists while its device is connected: dropping a device
//! drops the runtime records of all its widgets.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use tokio::time::Instant;

use super::{WidgetConfig, WidgetId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    /// Registered, not rendered yet
    Inactive,
    /// Last render succeeded
    Active,
    /// Key or device reported gone
    Dead,
    /// Gave up after too many transient failures
    Failed,
}

impl Lifecycle {
    pub fn is_terminal(self) -> bool {
        matches!(self, Lifecycle::Dead | Lifecycle::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct WidgetRecord {
    pub id: WidgetId,
    pub config: WidgetConfig,
    pub lifecycle: Lifecycle,
    pub last_render_at: Option<Instant>,
    pub consecutive_errors: u32,
    pub registered_at: Instant,
    pub in_flight: bool,
}

impl WidgetRecord {
    fn new(id: WidgetId, config: WidgetConfig) -> Self {
        Self {
            id,
            config,
            lifecycle: Lifecycle::Inactive,
            last_render_at: None,
            consecutive_errors: 0,
            registered_at: Instant::now(),
            in_flight: false,
        }
    }
}

/// Outcome of a device status report
#[derive(Debug, Default)]
pub struct DeviceDelta {
    pub connected: Vec<String>,
    /// Disconnected devices with the widgets that were removed with them
    pub disconnected: Vec<(String, Vec<WidgetId>)>,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: BTreeSet<String>,
    widgets: HashMap<WidgetId, WidgetRecord>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile against the full list of currently present devices
    pub fn apply_device_status(&mut self, present: &[String]) -> DeviceDelta {
        let mut delta = DeviceDelta::default();

        let gone: Vec<String> = self
            .devices
            .iter()
            .filter(|d| !present.contains(d))
            .cloned()
            .collect();
        for device in gone {
            let removed = self.disconnect_device(&device);
            delta.disconnected.push((device, removed));
        }

        for device in present {
            if self.devices.insert(device.clone()) {
                delta.connected.push(device.clone());
            }
        }
        delta
    }

    /// Returns true when the device was not known yet
    pub fn connect_device(&mut self, device_id: &str) -> bool {
        self.devices.insert(device_id.to_string())
    }

    fn disconnect_device(&mut self, device_id: &str) -> Vec<WidgetId> {
        self.devices.remove(device_id);
        let ids: Vec<WidgetId> = self
            .widgets
            .keys()
            .filter(|id| id.device_id == device_id)
            .cloned()
            .collect();
        for id in &ids {
            self.widgets.remove(id);
        }
        ids
    }

    pub fn is_device_connected(&self, device_id: &str) -> bool {
        self.devices.contains(device_id)
    }

    pub fn devices(&self) -> Vec<String> {
        self.devices.iter().cloned().collect()
    }

    /// Register (or re-register) a widget on a connected device.
    /// Returns None when the device is not connected.
    pub fn register(&mut self, device_id: &str, config: WidgetConfig) -> Option<WidgetId> {
        if !self.is_device_connected(device_id) {
            return None;
        }
        let id = WidgetId::new(device_id, config.uid.clone());
        self.widgets.insert(id.clone(), WidgetRecord::new(id.clone(), config));
        Some(id)
    }

    pub fn remove(&mut self, id: &WidgetId) -> Option<WidgetRecord> {
        self.widgets.remove(id)
    }

    pub fn get(&self, id: &WidgetId) -> Option<&WidgetRecord> {
        self.widgets.get(id)
    }

    pub fn get_mut(&mut self, id: &WidgetId) -> Option<&mut WidgetRecord> {
        self.widgets.get_mut(id)
    }

    pub fn contains(&self, id: &WidgetId) -> bool {
        self.widgets.contains_key(id)
    }

    /// Widgets that can still be drawn, sorted for stable iteration
    pub fn live_records(&self) -> Vec<&WidgetRecord> {
        let mut records: Vec<&WidgetRecord> = self
            .widgets
            .values()
            .filter(|r| !r.lifecycle.is_terminal())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Remove every dead or failed widget
    pub fn drain_terminal(&mut self) -> Vec<WidgetId> {
        let ids: Vec<WidgetId> = self
            .widgets
            .values()
            .filter(|r| r.lifecycle.is_terminal())
            .map(|r| r.id.clone())
            .collect();
        for id in &ids {
            self.widgets.remove(id);
        }
        ids
    }

    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut WidgetRecord> {
        self.widgets.values_mut()
    }

    pub fn len(&self) -> usize {
        self.widgets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.widgets.is_empty()
    }
}
