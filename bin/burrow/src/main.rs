//! burrow - expose a local HTTP port through a relay server

mod cli;
mod commands;
mod config;

use anyhow::{Context, Result};
use burrow_observability::init_logging;
use clap::Parser;

use crate::cli::{Cli, Commands};
use crate::config::{logging_overrides, FileConfig};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut file_config = match &cli.command {
        Commands::Server {
            config: Some(path), ..
        } => FileConfig::load(path)?,
        _ => FileConfig::default(),
    };

    let logging = logging_overrides(file_config.logging.clone(), cli.verbose, cli.log_format);
    let _guard = init_logging(&logging).context("Failed to initialize logging")?;

    if let Commands::Server { bind, port, .. } = &cli.command {
        file_config.apply_listen_overrides(*bind, *port);
    }

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")?
        .block_on(run(cli, file_config))
}

async fn run(cli: Cli, file_config: FileConfig) -> Result<()> {
    match &cli.command {
        Commands::Server { .. } => commands::server::run_server(file_config.server).await,
        Commands::Expose {
            port,
            server,
            local_host,
        } => commands::expose::expose(server, *port, local_host).await,
        Commands::Serve { path, server } => commands::serve::serve(server, path).await,
    }
}
