//! Ephemeral in-memory static file stores
//!
//! Files uploaded through `POST /upload` land in a [`StaticStore`] addressed
//! by a short identifier: `/<id>/<path>` serves them while no tunnel is
//! active. Stores expire after the tunnel retention period.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::content_type;

/// Served when a store path is empty or names a directory
const INDEX_FILE: &str = "index.html";

const CACHE_CONTROL: &str = "public, max-age=3600";

/// Length of a store identifier
const STORE_ID_LEN: usize = 8;

/// A set of uploaded files served under `/<id>/`
#[derive(Debug)]
pub struct StaticStore {
    id: String,
    created_at: Instant,
    files: RwLock<HashMap<String, Bytes>>,
}

impl StaticStore {
    fn new(id: String) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            files: RwLock::new(HashMap::new()),
        }
    }

    /// Store identifier
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Public path prefix (`/<id>`)
    #[must_use]
    pub fn path(&self) -> String {
        format!("/{}", self.id)
    }

    /// Time since the store was created
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Number of stored files
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.files.read().len()
    }

    /// Add or replace a file; leading slashes are ignored
    pub fn add_file(&self, name: &str, content: impl Into<Bytes>) {
        let name = normalize(name);
        self.files.write().insert(name, content.into());
    }

    /// Look up a file, falling back to `<path>/index.html` for extension-less paths
    #[must_use]
    pub fn get_file(&self, name: &str) -> Option<Bytes> {
        let name = normalize(name);
        let files = self.files.read();

        if let Some(content) = files.get(&name) {
            return Some(content.clone());
        }

        if name.contains('.') {
            return None;
        }

        let index = if name.is_empty() {
            INDEX_FILE.to_string()
        } else {
            format!("{}/{INDEX_FILE}", name.trim_end_matches('/'))
        };
        files.get(&index).cloned()
    }

    /// Serve `path` (relative to the store) as an HTTP response
    #[must_use]
    pub fn serve(&self, path: &str) -> Response {
        let mut path = path.trim_start_matches('/');
        if path.is_empty() {
            path = INDEX_FILE;
        }

        match self.get_file(path) {
            Some(content) => (
                [
                    (header::CONTENT_TYPE, content_type::guess(path)),
                    (header::CACHE_CONTROL, CACHE_CONTROL),
                ],
                content,
            )
                .into_response(),
            None => (StatusCode::NOT_FOUND, "File not found").into_response(),
        }
    }
}

fn normalize(name: &str) -> String {
    name.replace('\\', "/").trim_start_matches('/').to_string()
}

/// Registry of live static stores
#[derive(Debug, Default)]
pub struct StaticFileManager {
    stores: RwLock<HashMap<String, Arc<StaticStore>>>,
}

impl StaticFileManager {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store under a fresh identifier
    pub fn create_store(&self) -> Arc<StaticStore> {
        let mut stores = self.stores.write();
        let id = loop {
            let candidate = generate_store_id();
            if !stores.contains_key(&candidate) {
                break candidate;
            }
        };

        let store = Arc::new(StaticStore::new(id.clone()));
        stores.insert(id, Arc::clone(&store));
        tracing::debug!(store_id = %store.id(), "static store created");
        store
    }

    /// Look up a store
    #[must_use]
    pub fn get_store(&self, id: &str) -> Option<Arc<StaticStore>> {
        self.stores.read().get(id).cloned()
    }

    /// Delete a store; returns whether it existed
    pub fn delete_store(&self, id: &str) -> bool {
        self.stores.write().remove(id).is_some()
    }

    /// Number of live stores
    #[must_use]
    pub fn len(&self) -> usize {
        self.stores.read().len()
    }

    /// Whether no store is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every store older than `retention`; returns how many were removed
    pub fn sweep_expired(&self, retention: Duration) -> usize {
        let mut stores = self.stores.write();
        let before = stores.len();
        stores.retain(|_, store| store.age() <= retention);
        let removed = before - stores.len();

        if removed > 0 {
            tracing::info!(removed, "expired static stores removed");
        }
        removed
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `interval`
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        retention: Duration,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.sweep_expired(retention);
            }
        })
    }
}

fn generate_store_id() -> String {
    let mut id = Uuid::new_v4().to_string();
    id.truncate(STORE_ID_LEN);
    id
}
