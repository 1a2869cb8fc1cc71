//! Burrow Observability - structured logging for the relay and the agent
//!
//! # Quick Start
//!
//! ```no_run
//! use burrow_observability::{init_logging, LoggingConfig};
//!
//! let _guard = init_logging(&LoggingConfig::default()).unwrap();
//! tracing::info!("Application started");
//! ```

pub mod config;
pub mod error;
pub mod logging;

pub use config::*;
pub use error::{ObservabilityError, Result};
pub use logging::{init_logging, LogGuard};
