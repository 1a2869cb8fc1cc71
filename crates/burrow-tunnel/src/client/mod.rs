//! Agent-side components
//!
//! The [`TunnelAgent`] holds the tunnel connection and hands each forwarded
//! request to the [`LocalProxy`]. The [`Uploader`] publishes static files
//! through the same server.

pub mod agent;
pub mod proxy;
pub mod upload;

pub use agent::*;
pub use proxy::LocalProxy;
pub use upload::*;
