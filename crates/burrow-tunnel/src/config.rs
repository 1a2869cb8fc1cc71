//! Configuration types for the relay server and the agent

use std::net::SocketAddr;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

// =============================================================================
// Default value functions for serde
// =============================================================================

fn default_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_control_path() -> String {
    "/ws/tunnel".to_string()
}

const fn default_forward_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_tunnel_retention() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

const fn default_sweep_interval() -> Duration {
    Duration::from_secs(5 * 60)
}

const fn default_max_body_size() -> usize {
    100 * 1024 * 1024
}

fn default_local_host() -> String {
    "localhost".to_string()
}

const fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Largest WebSocket frame needed to carry a `max_body_size` body
///
/// Bodies travel base64-encoded inside a single JSON frame, plus headroom for
/// the envelope and headers.
#[must_use]
pub const fn frame_limit(max_body_size: usize) -> usize {
    max_body_size / 3 * 4 + 64 * 1024
}

// =============================================================================
// Server Configuration
// =============================================================================

/// Server-side relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelServerConfig {
    /// Address the public HTTP listener binds to
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,

    /// WebSocket path agents connect to
    #[serde(default = "default_control_path")]
    pub control_path: String,

    /// How long a public request waits for the agent's response
    #[serde(default = "default_forward_timeout", with = "humantime_serde")]
    pub forward_timeout: Duration,

    /// Maximum age of a tunnel or static store before the sweep evicts it
    #[serde(default = "default_tunnel_retention", with = "humantime_serde")]
    pub tunnel_retention: Duration,

    /// How often the expiry sweep runs
    #[serde(default = "default_sweep_interval", with = "humantime_serde")]
    pub sweep_interval: Duration,

    /// Largest request or upload body accepted, in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Scheme reported in the public URL (overrides `X-Forwarded-Proto`)
    #[serde(default)]
    pub public_scheme: Option<String>,
}

impl Default for TunnelServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            control_path: default_control_path(),
            forward_timeout: default_forward_timeout(),
            tunnel_retention: default_tunnel_retention(),
            sweep_interval: default_sweep_interval(),
            max_body_size: default_max_body_size(),
            public_scheme: None,
        }
    }
}

impl TunnelServerConfig {
    /// Create a new server config with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// WebSocket frame and message limit for agent connections
    #[must_use]
    pub fn frame_limit(&self) -> usize {
        frame_limit(self.max_body_size)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error string if:
    /// - `control_path` is empty or doesn't start with '/'
    /// - any duration is zero
    /// - `max_body_size` is 0
    /// - `public_scheme` is set to something other than `http` or `https`
    pub fn validate(&self) -> Result<(), String> {
        if self.control_path.is_empty() {
            return Err("control_path cannot be empty".to_string());
        }

        if !self.control_path.starts_with('/') {
            return Err("control_path must start with '/'".to_string());
        }

        if self.forward_timeout.is_zero() {
            return Err("forward_timeout must be > 0".to_string());
        }

        if self.tunnel_retention.is_zero() {
            return Err("tunnel_retention must be > 0".to_string());
        }

        if self.sweep_interval.is_zero() {
            return Err("sweep_interval must be > 0".to_string());
        }

        if self.max_body_size == 0 {
            return Err("max_body_size must be > 0".to_string());
        }

        if let Some(scheme) = &self.public_scheme {
            if scheme != "http" && scheme != "https" {
                return Err(format!(
                    "public_scheme must be http or https, got {scheme}"
                ));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Client Configuration
// =============================================================================

/// Agent-side configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelClientConfig {
    /// Public URL of the relay server (e.g., `https://relay.example.com`)
    pub server_url: String,

    /// Local port that relayed requests are sent to
    pub local_port: u16,

    /// Host the local port is reached on
    #[serde(default = "default_local_host")]
    pub local_host: String,

    /// Timeout for each local HTTP call
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// WebSocket path on the server
    #[serde(default = "default_control_path")]
    pub control_path: String,

    /// Largest request body the server may relay; sizes the read limit
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
}

impl TunnelClientConfig {
    /// Create a new client config
    #[must_use]
    pub fn new(server_url: impl Into<String>, local_port: u16) -> Self {
        Self {
            server_url: server_url.into(),
            local_port,
            local_host: default_local_host(),
            request_timeout: default_request_timeout(),
            control_path: default_control_path(),
            max_body_size: default_max_body_size(),
        }
    }

    /// Set the host the local port is reached on
    #[must_use]
    pub fn with_local_host(mut self, host: impl Into<String>) -> Self {
        self.local_host = host.into();
        self
    }

    /// Set the local call timeout
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the largest body the server relays (match the server's `max_body_size`)
    #[must_use]
    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    /// WebSocket frame and message limit when reading from the server
    #[must_use]
    pub fn frame_limit(&self) -> usize {
        frame_limit(self.max_body_size)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error string if:
    /// - `server_url` is empty or cannot be parsed
    /// - `local_port` is 0
    /// - `local_host` is empty
    /// - `request_timeout` is zero
    /// - `max_body_size` is 0
    pub fn validate(&self) -> Result<(), String> {
        if self.server_url.is_empty() {
            return Err("server_url cannot be empty".to_string());
        }

        self.control_url()?;

        if self.local_port == 0 {
            return Err("local_port cannot be 0".to_string());
        }

        if self.local_host.is_empty() {
            return Err("local_host cannot be empty".to_string());
        }

        if self.request_timeout.is_zero() {
            return Err("request_timeout must be > 0".to_string());
        }

        if self.max_body_size == 0 {
            return Err("max_body_size must be > 0".to_string());
        }

        Ok(())
    }

    /// WebSocket URL of the server's tunnel endpoint
    ///
    /// `http` maps to `ws`, `https` to `wss`, and any other (or missing)
    /// scheme defaults to `wss`. Any path on `server_url` is replaced by
    /// `control_path`.
    ///
    /// # Errors
    ///
    /// Returns an error string if `server_url` cannot be parsed.
    pub fn control_url(&self) -> Result<Url, String> {
        let mut url = parse_server_url(&self.server_url)?;

        let scheme = if url.scheme() == "http" { "ws" } else { "wss" };
        url.set_scheme(scheme)
            .map_err(|()| format!("cannot use {scheme} with {}", self.server_url))?;
        url.set_path(&self.control_path);
        url.set_query(None);
        url.set_fragment(None);

        Ok(url)
    }

    /// HTTP URL of the server's upload endpoint
    ///
    /// # Errors
    ///
    /// Returns an error string if `server_url` cannot be parsed.
    pub fn upload_url(&self) -> Result<Url, String> {
        let mut url = parse_server_url(&self.server_url)?;
        url.set_path("/upload");
        url.set_query(None);
        url.set_fragment(None);
        Ok(url)
    }
}

/// Parse a server URL, treating scheme-less input (`//host`, `host`) as https
fn parse_server_url(raw: &str) -> Result<Url, String> {
    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{}", raw.trim_start_matches('/'))
    };

    let url = Url::parse(&candidate).map_err(|e| format!("invalid server_url {raw}: {e}"))?;
    if url.host_str().is_none() {
        return Err(format!("server_url {raw} has no host"));
    }
    Ok(url)
}

// =============================================================================
// Tests
// =============================================================================
