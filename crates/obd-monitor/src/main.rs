//! OBD Monitor - Main Entry Point

use anyhow::Context;
use obd_monitor::{init_logging, init_metrics, load_config, run};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1);
    let config = load_config(path.as_deref()).context("Failed to load configuration")?;
    init_logging(&config.log)?;

    info!("=== OBD Monitor v{} ===", env!("CARGO_PKG_VERSION"));

    if let Some(addr) = config.metrics_addr {
        init_metrics(addr)?;
    }

    run(config).await
}
