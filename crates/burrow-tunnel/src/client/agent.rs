//! Tunnel agent: exposes a local port through the relay server
//!
//! The [`TunnelAgent`] dials the server's tunnel endpoint once, reads the
//! control greeting, then relays every forwarded request to the local service
//! on its own task. Responses share the connection's write half behind an
//! async lock.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio_tungstenite::connect_async_with_config;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use super::proxy::LocalProxy;
use crate::config::TunnelClientConfig;
use crate::error::{Result, TunnelError};
use crate::protocol::{ControlMessage, ForwardedRequest};
use crate::transport::{Connection, FrameSink};

// =============================================================================
// Agent State
// =============================================================================

/// Current state of the tunnel agent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AgentState {
    /// Not connected to the server
    #[default]
    Disconnected,
    /// Dialing the server
    Connecting,
    /// The server accepted the tunnel
    Connected {
        /// Tunnel identifier assigned by the server
        tunnel_id: String,
        /// Public URL now routed to the local port
        public_url: String,
    },
}

// =============================================================================
// Tunnel Agent
// =============================================================================

/// Client side of a tunnel
#[derive(Debug)]
pub struct TunnelAgent {
    config: TunnelClientConfig,
    proxy: Arc<LocalProxy>,
    state: RwLock<AgentState>,
}

impl TunnelAgent {
    /// Create a new agent
    ///
    /// # Errors
    ///
    /// Returns [`TunnelError::Config`] if the configuration is invalid.
    pub fn new(config: TunnelClientConfig) -> Result<Self> {
        config.validate().map_err(TunnelError::config)?;
        let proxy = LocalProxy::new(&config)?;

        Ok(Self {
            config,
            proxy: Arc::new(proxy),
            state: RwLock::new(AgentState::Disconnected),
        })
    }

    /// Agent configuration
    #[must_use]
    pub fn config(&self) -> &TunnelClientConfig {
        &self.config
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> AgentState {
        self.state.read().clone()
    }

    /// Connect to the server and relay until the connection ends
    ///
    /// There is no reconnection: one call is one tunnel session.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the WebSocket connection cannot be established or fails
    /// - the server rejects the tunnel
    /// - the server sends a malformed frame
    ///
    /// A clean close by the server returns `Ok(())`.
    pub async fn run(&self) -> Result<()> {
        *self.state.write() = AgentState::Connecting;

        let url = self.config.control_url().map_err(TunnelError::config)?;
        tracing::debug!(url = %url, "connecting to server");

        // A forwarded request carries the whole body in one frame
        let frame_limit = self.config.frame_limit();
        let ws_config = WebSocketConfig::default()
            .max_message_size(Some(frame_limit))
            .max_frame_size(Some(frame_limit));

        let connected = connect_async_with_config(url.as_str(), Some(ws_config), false)
            .await
            .map_err(TunnelError::from);
        let result = match connected {
            Ok((ws_stream, _response)) => self.serve(Connection::from_websocket(ws_stream)).await,
            Err(e) => Err(e),
        };

        *self.state.write() = AgentState::Disconnected;
        result
    }

    /// Run the tunnel session over an established connection
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run), minus dialing.
    pub async fn serve(&self, connection: Connection) -> Result<()> {
        let Connection { sink, mut stream } = connection;

        let greeting = stream
            .next()
            .await
            .ok_or_else(|| TunnelError::connection_msg("connection closed before greeting"))??;

        match ControlMessage::decode(&greeting)? {
            ControlMessage::Rejected { error } => {
                tracing::error!(reason = %error, "server rejected the tunnel");
                return Err(TunnelError::rejected(error));
            }
            ControlMessage::Ready { id, url } => {
                tracing::info!(
                    tunnel_id = %id,
                    public_url = %url,
                    local = %self.proxy.base_url(),
                    "tunnel established"
                );
                *self.state.write() = AgentState::Connected {
                    tunnel_id: id,
                    public_url: url,
                };
            }
        }

        let sink: Arc<Mutex<FrameSink>> = Arc::new(Mutex::new(sink));

        while let Some(frame) = stream.next().await {
            let request = ForwardedRequest::decode(&frame?)?;
            let proxy = Arc::clone(&self.proxy);
            let sink = Arc::clone(&sink);
            tokio::spawn(relay(proxy, sink, request));
        }

        tracing::info!("server closed the tunnel");
        Ok(())
    }
}

/// Relay one request and write its response back
async fn relay(proxy: Arc<LocalProxy>, sink: Arc<Mutex<FrameSink>>, request: ForwardedRequest) {
    let request_id = request.id.clone();
    let response = proxy.relay(request).await;

    tracing::debug!(
        request_id = %request_id,
        status = response.status_code,
        "writing response"
    );

    let frame = match response.encode() {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(request_id = %request_id, error = %e, "failed to encode response");
            return;
        }
    };

    if let Err(e) = sink.lock().await.send(frame).await {
        tracing::warn!(request_id = %request_id, error = %e, "failed to send response");
    }
}

// =============================================================================
// Tests
// =============================================================================
