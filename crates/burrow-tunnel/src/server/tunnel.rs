//! A single agent connection and the requests multiplexed over it
//!
//! A [`Tunnel`] owns the write half of the connection behind an async lock and
//! a [`CorrelationMap`] of outstanding requests. Its read loop, started with
//! [`Tunnel::run`], matches response frames to waiting callers by identifier.
//!
//! Lifecycle: `Active -> Closing -> Closed`. The first read failure, a clean
//! remote close, or [`Tunnel::close`] moves it to `Closing`; it reaches
//! `Closed` once the read loop has exited and every waiter was released.

use std::sync::Arc;
use std::time::{Duration, Instant as StdInstant};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use uuid::Uuid;

use super::correlation::{CorrelationMap, Delivery};
use crate::error::{Result, TunnelError};
use crate::protocol::{ControlMessage, ForwardedRequest, ForwardedResponse};
use crate::transport::{Connection, FrameSink, FrameStream};

/// Lifecycle state of a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// Accepting and relaying requests
    Active,
    /// Shutting down; new forwards fail
    Closing,
    /// Read loop exited and all waiters released
    Closed,
}

/// An established tunnel to an agent
pub struct Tunnel {
    id: Uuid,
    created_at: StdInstant,
    public_url: String,
    writer: Arc<Mutex<FrameSink>>,
    pending: CorrelationMap,
    state: watch::Sender<TunnelState>,
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("id", &self.id)
            .field("public_url", &self.public_url)
            .field("state", &self.state())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

/// Read half and greeting claim of a freshly opened tunnel
///
/// Hand it to [`Tunnel::run`]; until then the tunnel cannot write anything.
#[must_use = "a tunnel does nothing until it is run"]
pub struct TunnelDriver {
    stream: FrameStream,
    greeting_lock: Option<OwnedMutexGuard<FrameSink>>,
}

impl std::fmt::Debug for TunnelDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelDriver").finish_non_exhaustive()
    }
}

impl Tunnel {
    /// Wrap an accepted connection
    ///
    /// The write lock is claimed here and released only after the greeting has
    /// been written, so a forwarded request can never precede it.
    pub fn open(connection: Connection, public_url: impl Into<String>) -> (Arc<Self>, TunnelDriver) {
        let writer = Arc::new(Mutex::new(connection.sink));
        // A fresh mutex is always free
        let greeting_lock = Arc::clone(&writer).try_lock_owned().ok();
        let (state, _) = watch::channel(TunnelState::Active);

        let tunnel = Arc::new(Self {
            id: Uuid::new_v4(),
            created_at: StdInstant::now(),
            public_url: public_url.into(),
            writer,
            pending: CorrelationMap::new(),
            state,
        });

        let driver = TunnelDriver {
            stream: connection.stream,
            greeting_lock,
        };

        (tunnel, driver)
    }

    /// Tunnel identifier
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Public URL reported to the agent
    #[must_use]
    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    /// Time since the tunnel was opened
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Whether the tunnel has outlived `retention`
    #[must_use]
    pub fn is_expired(&self, retention: Duration) -> bool {
        self.age() > retention
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> TunnelState {
        *self.state.borrow()
    }

    /// Whether new requests are accepted
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == TunnelState::Active
    }

    /// Number of requests waiting for a response
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }

    /// Begin shutting the tunnel down
    ///
    /// Every in-flight [`forward`](Self::forward) resolves with
    /// [`TunnelError::ConnectionClosed`]. The read loop notices, closes the
    /// connection and exits. Idempotent.
    pub fn close(&self) {
        let initiated = self.state.send_if_modified(|state| {
            if *state == TunnelState::Active {
                *state = TunnelState::Closing;
                true
            } else {
                false
            }
        });

        let released = self.pending.close();
        if initiated {
            tracing::debug!(tunnel_id = %self.id, released, "tunnel closing");
        }
    }

    /// Wait until the tunnel reaches [`TunnelState::Closed`]
    pub async fn closed(&self) {
        let mut state = self.state.subscribe();
        let _ = state.wait_for(|s| *s == TunnelState::Closed).await;
    }

    /// Relay a request to the agent and wait for its response until `deadline`
    ///
    /// The request's `id` is replaced by a fresh identifier. Dropping the
    /// returned future abandons the request and releases its slot.
    ///
    /// # Errors
    ///
    /// - [`TunnelError::Timeout`] if `deadline` passes before the response arrives
    /// - [`TunnelError::ConnectionClosed`] if the tunnel is or becomes closed
    pub async fn forward(
        &self,
        mut request: ForwardedRequest,
        deadline: Instant,
    ) -> Result<ForwardedResponse> {
        if !self.is_active() {
            return Err(TunnelError::ConnectionClosed);
        }

        request.id = Uuid::new_v4().to_string();
        let receptacle = self.pending.register(request.id.clone())?;
        let frame = request.encode()?;

        tracing::debug!(
            tunnel_id = %self.id,
            request_id = %request.id,
            method = %request.method,
            path = %request.path,
            "forwarding request"
        );

        let sent = tokio::time::timeout_at(deadline, async {
            let mut writer = self.writer.lock().await;
            writer.send(frame).await
        })
        .await;

        match sent {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(tunnel_id = %self.id, error = %e, "failed to write request frame");
                self.close();
                return Err(TunnelError::ConnectionClosed);
            }
            Err(_) => return Err(TunnelError::Timeout),
        }

        receptacle.wait_until(deadline).await
    }

    /// Greet the agent, then read responses until the connection ends
    ///
    /// On exit the tunnel is `Closed`: pending requests were released and the
    /// connection was closed.
    pub async fn run(self: Arc<Self>, driver: TunnelDriver) {
        let TunnelDriver {
            mut stream,
            greeting_lock,
        } = driver;

        let mut writer = match greeting_lock {
            Some(guard) => guard,
            None => Arc::clone(&self.writer).lock_owned().await,
        };
        if let Err(e) = self.greet(&mut writer).await {
            tracing::warn!(tunnel_id = %self.id, error = %e, "failed to send tunnel greeting");
            self.close();
        }
        drop(writer);

        let mut state = self.state.subscribe();
        loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(frame)) => {
                        if let Err(e) = self.dispatch(&frame) {
                            tracing::warn!(tunnel_id = %self.id, error = %e, "malformed frame from agent");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::info!(tunnel_id = %self.id, error = %e, "tunnel connection failed");
                        break;
                    }
                    None => {
                        tracing::info!(tunnel_id = %self.id, "agent closed the tunnel");
                        break;
                    }
                },
                _ = state.wait_for(|s| *s != TunnelState::Active) => break,
            }
        }

        self.close();
        if let Err(e) = self.writer.lock().await.close().await {
            tracing::debug!(tunnel_id = %self.id, error = %e, "error closing tunnel connection");
        }
        self.state.send_replace(TunnelState::Closed);
        tracing::info!(tunnel_id = %self.id, age = ?self.age(), "tunnel closed");
    }

    async fn greet(&self, writer: &mut FrameSink) -> Result<()> {
        let greeting = ControlMessage::Ready {
            id: self.id.to_string(),
            url: self.public_url.clone(),
        };
        writer.send(greeting.encode()?).await
    }

    fn dispatch(&self, frame: &str) -> Result<()> {
        let response = ForwardedResponse::decode(frame)?;
        let request_id = response.id.clone();

        match self.pending.deliver(response) {
            Delivery::Delivered => {
                tracing::debug!(tunnel_id = %self.id, request_id = %request_id, "response delivered");
            }
            Delivery::Unmatched => {
                tracing::warn!(
                    tunnel_id = %self.id,
                    request_id = %request_id,
                    "dropping response for unknown request"
                );
            }
            Delivery::Dropped => {
                tracing::debug!(
                    tunnel_id = %self.id,
                    request_id = %request_id,
                    "dropping response, caller went away"
                );
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
