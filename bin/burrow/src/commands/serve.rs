use std::path::Path;

use anyhow::{Context, Result};
use burrow_tunnel::{TunnelClientConfig, Uploader};
use tracing::info;

/// Upload `path` and print the URL it is served at
pub(crate) async fn serve(server: &str, path: &Path) -> Result<()> {
    // The local port is unused for uploads
    let config = TunnelClientConfig::new(server, 1);
    let uploader = Uploader::new(&config).context("Invalid server URL")?;

    let uploaded = uploader
        .upload(path)
        .await
        .with_context(|| format!("Failed to upload {}", path.display()))?;

    info!(id = %uploaded.id, "Upload complete");
    println!("{}", uploaded.url);
    Ok(())
}
