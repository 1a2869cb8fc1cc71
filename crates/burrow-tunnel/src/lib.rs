//! Burrow - expose a local HTTP port through a public relay
//!
//! An agent behind NAT dials the relay server over WebSocket and keeps one
//! long-lived tunnel open. Every public HTTP request the server receives is
//! serialized, multiplexed onto that tunnel, replayed by the agent against
//! the local port, and answered with the correlated response.
//!
//! # Architecture
//!
//! - **Server**: [`TunnelManager`] keeps the single active [`Tunnel`]; the
//!   router relays requests through it or serves static uploads
//! - **Tunnel**: owns the WebSocket write half and a [`CorrelationMap`] of
//!   outstanding requests; its read loop delivers responses by id
//! - **Agent**: [`TunnelAgent`] relays forwarded requests with [`LocalProxy`]
//!
//! # Protocol
//!
//! One JSON object per text frame:
//!
//! ```text
//! server -> agent   {"id","url"} | {"error"}
//! server -> agent   {"id","method","path","headers","body"}
//! agent  -> server  {"id","statusCode","headers","body"}
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use burrow_tunnel::{TunnelAgent, TunnelClientConfig};
//!
//! # async fn expose() -> burrow_tunnel::Result<()> {
//! let config = TunnelClientConfig::new("https://relay.example.com", 3000);
//! let agent = TunnelAgent::new(config)?;
//! agent.run().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod content_type;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;

// Re-export main types at crate root
pub use client::{AgentState, LocalProxy, TunnelAgent, UploadFile, Uploader};
pub use config::{TunnelClientConfig, TunnelServerConfig};
pub use error::{Result, TunnelError};
pub use protocol::{ControlMessage, ForwardedRequest, ForwardedResponse, Headers, UploadResponse};
pub use server::{
    build_router, AlreadyActive, CorrelationMap, Delivery, Receptacle, RelayServer, RelayState,
    StaticFileManager, StaticStore, Tunnel, TunnelDriver, TunnelManager, TunnelState,
};
pub use transport::Connection;
