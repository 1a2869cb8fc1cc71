//! Configuration file loading and CLI overrides

use std::net::SocketAddr;
use std::path::Path;

use anyhow::{Context, Result};
use burrow_observability::{LogFormat, LogLevel, LoggingConfig};
use burrow_tunnel::TunnelServerConfig;
use serde::{Deserialize, Serialize};

/// Contents of the server's YAML configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct FileConfig {
    pub(crate) server: TunnelServerConfig,
    pub(crate) logging: LoggingConfig,
}

impl FileConfig {
    /// Read and parse a YAML file
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }

    fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply `--bind` and `--port`; the port wins over the port of any bind address
    pub(crate) fn apply_listen_overrides(&mut self, bind: Option<SocketAddr>, port: Option<u16>) {
        if let Some(bind) = bind {
            self.server.bind = bind;
        }
        if let Some(port) = port {
            self.server.bind.set_port(port);
        }
    }
}

/// Layer `-v` and `--log-format` over a base logging config
pub(crate) fn logging_overrides(
    mut logging: LoggingConfig,
    verbose: u8,
    format: Option<LogFormat>,
) -> LoggingConfig {
    if verbose > 0 {
        logging.level = LogLevel::from_verbosity(verbose);
        logging.filter_directives = None;
    }
    if let Some(format) = format {
        logging.format = format;
    }
    logging
}
