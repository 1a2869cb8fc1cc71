//! Static file upload client
//!
//! Sends a file, or every file under a directory, to the server's
//! `POST /upload` endpoint as one multipart form. Directory uploads keep
//! paths relative to the directory so `index.html` fallbacks work.

use std::path::{Path, PathBuf};

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Url};

use crate::config::TunnelClientConfig;
use crate::error::{Result, TunnelError};
use crate::protocol::UploadResponse;

/// Multipart field name every file is sent under
const FILES_FIELD: &str = "files";

/// A file queued for upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    /// Name the server stores the file under (`/`-separated)
    pub name: String,
    /// Location on disk
    pub path: PathBuf,
}

/// Uploads files to a relay server
#[derive(Debug, Clone)]
pub struct Uploader {
    client: Client,
    url: Url,
}

impl Uploader {
    /// Create an uploader for the server named in `config`
    ///
    /// # Errors
    ///
    /// Returns an error if the server URL is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: &TunnelClientConfig) -> Result<Self> {
        let url = config.upload_url().map_err(TunnelError::config)?;
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(TunnelError::connection)?;
        Ok(Self { client, url })
    }

    /// Upload a single file or a whole directory
    ///
    /// # Errors
    ///
    /// Returns an error if files cannot be read, the server cannot be reached,
    /// or it answers with a non-success status.
    pub async fn upload(&self, path: &Path) -> Result<UploadResponse> {
        let files = collect_files(path).await?;
        if files.is_empty() {
            return Err(TunnelError::not_found(format!(
                "files under {}",
                path.display()
            )));
        }

        let mut form = Form::new().percent_encode_noop();
        for file in &files {
            let content = tokio::fs::read(&file.path).await?;
            form = form.part(FILES_FIELD, Part::bytes(content).file_name(file.name.clone()));
        }

        tracing::info!(url = %self.url, files = files.len(), "uploading static files");

        let response = self
            .client
            .post(self.url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(TunnelError::connection)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TunnelError::connection_msg(format!(
                "upload failed with status {status}: {}",
                body.trim()
            )));
        }

        response
            .json::<UploadResponse>()
            .await
            .map_err(|e| TunnelError::protocol(format!("failed to parse upload response: {e}")))
    }
}

/// Files to upload for `path`, sorted by name
///
/// A file uploads under its own file name; a directory is walked recursively
/// and its files upload under their path relative to it.
///
/// # Errors
///
/// Returns an error if `path` or anything beneath it cannot be read.
pub async fn collect_files(path: &Path) -> Result<Vec<UploadFile>> {
    let metadata = tokio::fs::metadata(path).await?;

    if metadata.is_file() {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| TunnelError::config(format!("{} has no file name", path.display())))?;
        return Ok(vec![UploadFile {
            name,
            path: path.to_path_buf(),
        }]);
    }

    let mut files = Vec::new();
    let mut pending = vec![path.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let entry_path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry_path);
            } else if file_type.is_file() {
                files.push(UploadFile {
                    name: relative_name(path, &entry_path),
                    path: entry_path,
                });
            }
        }
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

/// `/`-joined path of `file` relative to `root`
fn relative_name(root: &Path, file: &Path) -> String {
    let relative = file.strip_prefix(root).unwrap_or(file);
    relative
        .components()
        .map(|component| component.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
