//! Text-frame view of a WebSocket connection
//!
//! The server accepts agents through axum's WebSocket upgrade while the agent
//! dials with `tokio-tungstenite`. Both are reduced to a [`Connection`]: a sink
//! and a stream of JSON text frames. A close frame ends the stream.

use std::pin::Pin;

use axum::extract::ws::{Message as AxumMessage, WebSocket};
use futures_util::stream::BoxStream;
use futures_util::{future, Sink, SinkExt, StreamExt, TryStreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{tungstenite::Message as WsMessage, WebSocketStream};

use crate::error::{Result, TunnelError};
use crate::protocol::ControlMessage;

/// Write half of a connection
pub type FrameSink = Pin<Box<dyn Sink<String, Error = TunnelError> + Send>>;

/// Read half of a connection
pub type FrameStream = BoxStream<'static, Result<String>>;

/// A duplex connection carrying text frames
pub struct Connection {
    /// Outbound frames
    pub sink: FrameSink,
    /// Inbound frames; ends on a clean close
    pub stream: FrameStream,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

impl Connection {
    /// Wrap a `tokio-tungstenite` WebSocket (agent side, tests)
    pub fn from_websocket<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, stream) = ws.split();

        // `with` converts every inner error through `From`, however many occur
        let sink =
            sink.with(|text: String| future::ready(Ok::<_, TunnelError>(WsMessage::text(text))));

        let stream = stream
            .map_err(TunnelError::from)
            .try_take_while(|msg| future::ready(Ok(!msg.is_close())))
            .try_filter_map(|msg| {
                future::ready(match msg {
                    WsMessage::Text(text) => Ok(Some(text.as_str().to_owned())),
                    WsMessage::Binary(data) => binary_frame(&data),
                    _ => Ok(None),
                })
            });

        Self {
            sink: Box::pin(sink),
            stream: stream.boxed(),
        }
    }

    /// Wrap an axum WebSocket (server side)
    #[must_use]
    pub fn from_axum(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();

        let sink = sink.with(|text: String| {
            future::ready(Ok::<_, TunnelError>(AxumMessage::Text(text.into())))
        });

        let stream = stream
            .map_err(TunnelError::from)
            .try_take_while(|msg| future::ready(Ok(!matches!(msg, AxumMessage::Close(_)))))
            .try_filter_map(|msg| {
                future::ready(match msg {
                    AxumMessage::Text(text) => Ok(Some(text.as_str().to_owned())),
                    AxumMessage::Binary(data) => binary_frame(&data),
                    _ => Ok(None),
                })
            });

        Self {
            sink: Box::pin(sink),
            stream: stream.boxed(),
        }
    }

    /// Send a refusal control message and close the connection
    pub async fn reject(mut self, reason: &str) {
        let message = ControlMessage::Rejected {
            error: reason.to_string(),
        };
        match message.encode() {
            Ok(frame) => {
                if let Err(e) = self.sink.send(frame).await {
                    tracing::debug!(error = %e, "failed to send rejection");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to encode rejection"),
        }
        let _ = self.sink.close().await;
    }
}

/// Binary frames are accepted when they hold UTF-8 JSON
fn binary_frame(data: &[u8]) -> Result<Option<String>> {
    String::from_utf8(data.to_vec())
        .map(Some)
        .map_err(|_| TunnelError::protocol("binary frame is not UTF-8"))
}
