//! wabridge — dev/ops harness.
//!
//! Loads the bridge config, wires the core against the simulated wire
//! client, and runs until Ctrl-C. A real deployment links the library
//! instead and supplies its own `WireClient` implementation plus an HTTP
//! front; this binary exists to exercise the full engine locally.

use std::sync::Arc;

use tracing::{error, info};

use wabridge::{BridgeConfig, Core, Randomness, SimulatedWire, SystemClock};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match BridgeConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("[main] config error: {}", e);
            std::process::exit(1);
        }
    };

    let wire = Arc::new(SimulatedWire::new());
    let core = match Core::new(config, Arc::new(SystemClock), Randomness::from_entropy(), wire) {
        Ok(core) => core,
        Err(e) => {
            error!("[main] startup failed: {}", e);
            std::process::exit(1);
        }
    };

    let fingerprint = core.fingerprint();
    info!(
        "[main] presenting as {} / {} {} (rotation #{})",
        fingerprint.os, fingerprint.product, fingerprint.version, fingerprint.rotation_count
    );

    core.on_message(Arc::new(|message| {
        info!("[main] inbound from {}: {}", message.from, message.text);
    }));

    core.start();
    info!("[main] bridge running — Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("[main] signal handler failed: {}", e);
    }
    core.shutdown().await;
    info!("[main] bye");
}
