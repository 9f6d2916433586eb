//! linkd - Straylight link daemon.
//!
//! Loads the configuration, then accepts and maintains peer links until
//! interrupted.

use linkd::config::Config;
use linkd::state::Matrix;
use linkd::sync::network;
use linkd::telemetry;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Pause between attempts to re-open an autoconnect link.
const RECONNECT_DELAY: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "linkd.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        eprintln!("Failed to load config {}: {}", config_path, e);
        e
    })?;
    telemetry::init(&config.log);

    info!(
        server = %config.server.name,
        network = %config.server.network,
        sid = %config.server.sid,
        "Starting linkd"
    );

    let listen = config.listen.s2s;
    let matrix = Arc::new(Matrix::new(config));
    info!(isupport = %matrix.isupport().join(" "), "Core ready");

    if let Some(addr) = listen {
        let matrix = matrix.clone();
        tokio::spawn(async move {
            if let Err(e) = network::listen(matrix, addr).await {
                error!(%addr, error = %e, "Peer listener stopped");
            }
        });
    }
    network::autoconnect(matrix.clone(), RECONNECT_DELAY).await;

    tokio::signal::ctrl_c().await?;
    info!(links = matrix.sync.link_count(), "Shutting down");
    Ok(())
}
