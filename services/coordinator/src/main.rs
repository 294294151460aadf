use std::sync::Arc;

use anyhow::Result;
use secagg_core::{clear_ready, init_metrics, init_tracing, load_config, mark_ready};
use tracing::info;

mod federation;
mod http;

use federation::FederationModule;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("coordinator-service")?;
    init_metrics()?;
    let cfg = load_config("secagg-coordinator")?;
    let federation = Arc::new(FederationModule::new(&cfg).await?);

    let listener = tokio::net::TcpListener::bind(&cfg.listen_addr).await?;
    info!(target: "coordinator-service", addr = %cfg.listen_addr, threshold = cfg.aggregation_threshold, "coordinator listening");
    mark_ready();
    axum::serve(listener, http::router(federation.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    clear_ready();
    federation.shutdown().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "signal handler failed");
    }
    info!(target: "coordinator-service", "shutdown requested");
}
