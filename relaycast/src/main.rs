mod http;
mod server;

use anyhow::Result;
use tracing::info;

use relaycast_core::{logging, metrics, BroadcastRelay, Config, ConnectionRegistry};

use server::RelayServer;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration
    let config = Config::load()?;

    // 2. Validate configuration (fail fast on misconfigurations)
    if let Err(errors) = config.validate() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("relaycast server starting...");
    info!("Listen address: {}", config.listen_address());

    // 4. Wire up the registry and broadcast relay
    let relay_metrics = metrics::METRICS.clone();
    let registry = ConnectionRegistry::new(relay_metrics.clone());
    let relay = BroadcastRelay::new(registry.clone(), relay_metrics, config.relay.echo_to_sender);
    info!(
        echo_to_sender = config.relay.echo_to_sender,
        send_buffer = config.relay.send_buffer,
        "Broadcast relay initialized"
    );

    // 5. Serve until shutdown
    let server = RelayServer::new(config, registry, relay);
    server.start().await
}
