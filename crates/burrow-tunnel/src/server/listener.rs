//! Relay server bootstrap

use std::future::Future;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::info;

use super::router::{build_router, RelayState};
use crate::config::TunnelServerConfig;
use crate::error::{Result, TunnelError};

/// The public relay: HTTP listener plus expiry sweepers
#[derive(Debug)]
pub struct RelayServer {
    config: TunnelServerConfig,
}

impl RelayServer {
    /// Create a new relay server
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::Config`] if the configuration is invalid.
    pub fn new(config: TunnelServerConfig) -> Result<Self> {
        config.validate().map_err(TunnelError::config)?;
        Ok(Self { config })
    }

    /// Get the bind address
    #[must_use]
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind
    }

    /// Run the server until the process ends
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound or serving fails.
    pub async fn run(self) -> Result<()> {
        self.run_with_shutdown(std::future::pending()).await
    }

    /// Bind the configured address and serve until `shutdown` completes
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound or serving fails.
    pub async fn run_with_shutdown(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` completes
    ///
    /// # Errors
    ///
    /// Returns an error if serving fails.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let addr = listener.local_addr()?;
        let retention = self.config.tunnel_retention;
        let sweep_interval = self.config.sweep_interval;

        let state = RelayState::new(self.config);
        let tunnel_sweeper = state.tunnels.spawn_sweeper();
        let store_sweeper = state.statics.spawn_sweeper(sweep_interval, retention);
        let tunnels = state.tunnels.clone();

        info!(
            bind = %addr,
            control_path = %tunnels.config().control_path,
            "Starting relay server"
        );

        let served = axum::serve(listener, build_router(state))
            .with_graceful_shutdown(shutdown)
            .await;

        tunnel_sweeper.abort();
        store_sweeper.abort();
        tunnels.remove_tunnel();

        info!("Relay server shut down");
        served.map_err(TunnelError::from)
    }
}
