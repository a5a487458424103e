use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::{config::ServerConfig, errors::Error, leases::LeaseManager};

use super::routes::build_router;

/// Serve the HTTP API until `shutdown` resolves.
pub async fn start_api_server<F>(
    config: &ServerConfig,
    leases: Arc<LeaseManager>,
    shutdown: F,
) -> crate::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = config.bind_address().parse().map_err(|e| {
        Error::validation_field(format!("Invalid API address: {}", e), "host")
    })?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::from(e).context(format!("Failed to bind API server on {}", addr)))?;

    info!(address = %addr, "Starting HTTP API server");
    axum::serve(listener, build_router(leases))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::from(e).context("API server error"))?;

    info!("API server shutdown completed");
    Ok(())
}
