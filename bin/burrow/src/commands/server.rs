use anyhow::{Context, Result};
use burrow_tunnel::{RelayServer, TunnelServerConfig};
use tracing::info;

/// Run the relay server until SIGINT or SIGTERM
pub(crate) async fn run_server(config: TunnelServerConfig) -> Result<()> {
    let server = RelayServer::new(config).context("Invalid server configuration")?;
    let bind = server.bind_addr();

    server
        .run_with_shutdown(shutdown_signal())
        .await
        .with_context(|| format!("Relay server on {bind} failed"))?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}
