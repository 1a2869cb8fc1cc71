use anyhow::{Context, Result};
use burrow_tunnel::{TunnelAgent, TunnelClientConfig};
use tracing::info;

/// Relay traffic for `port` until the tunnel closes or Ctrl+C
pub(crate) async fn expose(server: &str, port: u16, local_host: &str) -> Result<()> {
    let config = TunnelClientConfig::new(server, port).with_local_host(local_host);
    let agent = TunnelAgent::new(config).context("Invalid agent configuration")?;

    info!(server = %server, local = %format!("{local_host}:{port}"), "Opening tunnel");

    tokio::select! {
        result = agent.run() => {
            result.context("Tunnel session failed")?;
            info!("Tunnel closed by server");
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            info!("Interrupted, closing tunnel");
        }
    }

    Ok(())
}
