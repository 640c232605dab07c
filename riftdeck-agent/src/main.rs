//! RiftDeck agent binary
//!
//! Reads host events on stdin, writes draw commands on stdout, logs to
//! stderr (or `RIFTDECK_LOG_FILE`).

use anyhow::{Context, Result};
use tracing::{info, warn};

use riftdeck_agent::agent::Agent;
use riftdeck_agent::config::AgentConfig;
use riftdeck_agent::logging;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    // config errors are reported once logging is up
    let (config, load_error) = match AgentConfig::load().await {
        Ok(config) => (config, None),
        Err(e) => (AgentConfig::default(), Some(e)),
    };
    logging::init(&config.logging).context("Failed to initialize logging")?;

    info!("RiftDeck agent v{} starting", env!("CARGO_PKG_VERSION"));
    match load_error {
        Some(e) => warn!("{:#}, using defaults", e),
        None => {
            if let Ok(path) = AgentConfig::config_file_path() {
                if let Err(e) = config.save_if_missing(&path).await {
                    warn!("Could not write default config: {:#}", e);
                }
            }
        }
    }

    let agent = Agent::from_config(config)
        .await
        .context("Failed to create agent")?;

    agent.run().await.context("Agent execution failed")?;

    Ok(())
}
