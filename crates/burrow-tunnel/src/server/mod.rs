//! Relay server components
//!
//! The [`TunnelManager`] owns the single active [`Tunnel`], whose
//! [`CorrelationMap`] pairs relayed requests with agent responses. The
//! [`build_router`] function exposes it all over HTTP and [`RelayServer`]
//! binds it to a socket.

pub mod correlation;
pub mod listener;
pub mod manager;
pub mod router;
pub mod static_files;
pub mod tunnel;

pub use correlation::*;
pub use listener::*;
pub use manager::*;
pub use router::*;
pub use static_files::*;
pub use tunnel::*;
