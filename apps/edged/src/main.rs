//! Fireline edge node entry point.

mod config;

use std::sync::Arc;

use fireline_edge::{EdgeServer, ServerConfig};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting Fireline edge node"
    );

    // Load configuration.
    let config = config::Config::load()?;
    tracing::info!(
        name = %config.name,
        port = config.port,
        dedup_ttl_ms = config.dedup_ttl_ms,
        "configuration loaded"
    );

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))?;

    tracing::info!("edge node shut down cleanly");
    Ok(())
}

async fn run(config: config::Config) -> anyhow::Result<()> {
    let server = EdgeServer::new(ServerConfig {
        port: config.port,
        dedup_ttl_ms: config.dedup_ttl_ms,
    });

    let server2 = Arc::clone(&server);
    let handle = tokio::spawn(async move { server2.run().await });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    server.shutdown();

    handle.await??;
    Ok(())
}
