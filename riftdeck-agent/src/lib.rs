//! RiftDeck agent - local game-client poller for control-surface keys
//!
//! Pipeline:
//! - discovery: find the local client API (lockfile or process list)
//! - poller / live: timed polling, response cache, change events
//! - monitor: process liveness, connect / reconnect / disconnect
//! - router + widgets: per-datatype handlers deciding what each key shows
//! - render: throttled, coalescing, retrying draw scheduler
//! - store: persisted last-known state
//! - host: JSON-lines bridge to the plugin runtime

pub mod agent;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod host;
pub mod live;
pub mod logging;
pub mod monitor;
pub mod poller;
pub mod render;
pub mod router;
pub mod store;
pub mod widgets;

use parking_lot::Mutex;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}
