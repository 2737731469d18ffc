//! Queue Relay — rendezvous service for queue-sync rooms.
//!
//! Binds identities and carries channels between peers; holds no room state.
//!
//! Usage: `queue-relay [BIND_ADDR]`. The address may also come from
//! `QUEUE_RELAY_ADDR`, and the identity limit from `QUEUE_RELAY_MAX_PEERS`.

use log::{info, warn};
use queue_sync::server::{RelayConfig, RelayServer};

fn config_from_env() -> RelayConfig {
    let mut config = RelayConfig::default();

    if let Some(addr) = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("QUEUE_RELAY_ADDR").ok())
    {
        config.bind_addr = addr;
    }

    if let Ok(raw) = std::env::var("QUEUE_RELAY_MAX_PEERS") {
        match raw.parse() {
            Ok(max_peers) => config.max_peers = max_peers,
            Err(e) => warn!("Ignoring QUEUE_RELAY_MAX_PEERS={raw:?}: {e}"),
        }
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::init();

    let config = config_from_env();
    info!(
        "Starting Queue Relay on {} (max {} peers)...",
        config.bind_addr, config.max_peers
    );

    RelayServer::new(config).run().await
}
