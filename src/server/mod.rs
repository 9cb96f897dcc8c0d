//! axum HTTP surface over [`Services`].

pub mod error;
mod handlers;
mod router;

use std::net::{IpAddr, SocketAddr};

pub use router::build_router;

use crate::services::Services;

/// Serves the API on `host:port` until ctrl-c.
pub async fn run_http(services: Services, host: &str, port: u16) -> anyhow::Result<()> {
    let ip: IpAddr = host
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid host address: {e}"))?;
    let bind = SocketAddr::new(ip, port);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind HTTP server: {e}"))?;

    tracing::info!(
        diseases = services.catalog.len(),
        data_dir = %services.config.data_dir.display(),
        "Support finder listening on http://{bind}"
    );
    axum::serve(listener, build_router(services))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down…");
        })
        .await?;
    Ok(())
}
