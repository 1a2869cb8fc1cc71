//! Single-slot owner of the active tunnel
//!
//! The [`TunnelManager`] enforces that at most one tunnel is active at a
//! time. Creation is an atomic check-and-set on the slot; a refused
//! connection is handed back so the caller can tell the agent why.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::tunnel::Tunnel;
use crate::config::TunnelServerConfig;
use crate::error::TunnelError;
use crate::transport::Connection;

/// Refusal from [`TunnelManager::create_tunnel`], carrying back the connection
#[derive(Debug, thiserror::Error)]
#[error("a tunnel is already active ({active_id})")]
pub struct AlreadyActive {
    /// The connection that was offered
    pub connection: Connection,
    /// Identifier of the tunnel occupying the slot
    pub active_id: Uuid,
}

impl From<AlreadyActive> for TunnelError {
    fn from(_: AlreadyActive) -> Self {
        Self::AlreadyActive
    }
}

/// Owner of the single active-tunnel slot
///
/// Cheap to clone; clones share the slot.
#[derive(Debug, Clone)]
pub struct TunnelManager {
    slot: Arc<Mutex<Option<Arc<Tunnel>>>>,
    config: Arc<TunnelServerConfig>,
}

impl TunnelManager {
    /// Create a manager with an empty slot
    #[must_use]
    pub fn new(config: TunnelServerConfig) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            config: Arc::new(config),
        }
    }

    /// Server configuration
    #[must_use]
    pub fn config(&self) -> &TunnelServerConfig {
        &self.config
    }

    /// Install a tunnel for `connection` if the slot is free
    ///
    /// On success the tunnel's read loop is spawned; when it exits the tunnel
    /// clears the slot, provided it still owns it. A tunnel that is already
    /// shutting down does not block its successor.
    ///
    /// # Errors
    ///
    /// Returns [`AlreadyActive`] with the untouched connection when another
    /// tunnel is active.
    pub fn create_tunnel(
        &self,
        connection: Connection,
        public_url: impl Into<String>,
    ) -> std::result::Result<Arc<Tunnel>, AlreadyActive> {
        let (tunnel, driver) = {
            let mut slot = self.slot.lock();
            if let Some(active) = slot.as_ref().filter(|t| t.is_active()) {
                return Err(AlreadyActive {
                    connection,
                    active_id: active.id(),
                });
            }

            let (tunnel, driver) = Tunnel::open(connection, public_url);
            *slot = Some(Arc::clone(&tunnel));
            (tunnel, driver)
        };

        tracing::info!(
            tunnel_id = %tunnel.id(),
            public_url = %tunnel.public_url(),
            "tunnel created"
        );

        let manager = self.clone();
        let runner = Arc::clone(&tunnel);
        tokio::spawn(async move {
            let id = runner.id();
            runner.run(driver).await;
            manager.remove_if(id);
        });

        Ok(tunnel)
    }

    /// The active tunnel, if any
    #[must_use]
    pub fn get_active_tunnel(&self) -> Option<Arc<Tunnel>> {
        self.slot
            .lock()
            .as_ref()
            .filter(|t| t.is_active())
            .map(Arc::clone)
    }

    /// Close the active tunnel and clear the slot
    ///
    /// Returns the identifier of the removed tunnel; `None` if the slot was
    /// already empty.
    pub fn remove_tunnel(&self) -> Option<Uuid> {
        let removed = self.slot.lock().take()?;
        removed.close();
        tracing::info!(tunnel_id = %removed.id(), "tunnel removed");
        Some(removed.id())
    }

    /// Close and clear the active tunnel if it outlived the retention period
    pub fn sweep_expired(&self) -> Option<Uuid> {
        let expired = {
            let mut slot = self.slot.lock();
            if !slot
                .as_ref()
                .is_some_and(|t| t.is_expired(self.config.tunnel_retention))
            {
                return None;
            }
            slot.take()?
        };

        expired.close();
        tracing::info!(
            tunnel_id = %expired.id(),
            age = ?expired.age(),
            "expired tunnel removed"
        );
        Some(expired.id())
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `sweep_interval`
    pub fn spawn_sweeper(&self) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(manager.config.sweep_interval);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                manager.sweep_expired();
            }
        })
    }

    /// Clear the slot only if `id` still owns it
    fn remove_if(&self, id: Uuid) -> bool {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|t| t.id() == id) {
            *slot = None;
            tracing::debug!(tunnel_id = %id, "tunnel released its slot");
            true
        } else {
            false
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
