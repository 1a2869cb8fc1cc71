use std::net::SocketAddr;
use std::path::PathBuf;

use burrow_observability::LogFormat;
use clap::{Parser, Subcommand};

/// Expose a local HTTP port through a burrow relay
#[derive(Parser)]
#[command(name = "burrow")]
#[command(version, about = "Expose a local HTTP port through a burrow relay")]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Enable verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub(crate) verbose: u8,

    /// Console log format (pretty, compact, json)
    #[arg(long, global = true, env = "BURROW_LOG_FORMAT")]
    pub(crate) log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub(crate) command: Commands,
}

/// CLI subcommands
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the relay server
    Server {
        /// YAML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Address to listen on (overrides the config file)
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Port to listen on (overrides the port of the bind address)
        #[arg(short, long, env = "PORT")]
        port: Option<u16>,
    },

    /// Expose a local port through the relay
    Expose {
        /// Local port to expose
        port: u16,

        /// Relay server URL
        #[arg(short, long, env = "BURROW_SERVER")]
        server: String,

        /// Host the local port is reached on
        #[arg(long, default_value = "localhost")]
        local_host: String,
    },

    /// Upload a file or directory and print the URL it is served at
    Serve {
        /// File or directory to upload
        path: PathBuf,

        /// Relay server URL
        #[arg(short, long, env = "BURROW_SERVER")]
        server: String,
    },
}
