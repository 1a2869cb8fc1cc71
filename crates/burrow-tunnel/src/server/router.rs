//! Public HTTP entry point
//!
//! Fixed routes (`/health`, `/upload`, the agent WebSocket) are served
//! directly. Everything else goes to the active tunnel, or, when there is
//! none, to a static store, the info page, or a 404.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::extract::multipart::MultipartError;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{DefaultBodyLimit, Multipart, Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::time::Instant;
use tower_http::trace::TraceLayer;

use super::manager::TunnelManager;
use super::static_files::StaticFileManager;
use crate::config::TunnelServerConfig;
use crate::content_type;
use crate::error::TunnelError;
use crate::protocol::{
    append_header, headers_from_map, is_hop_by_hop, ForwardedRequest, ForwardedResponse,
    UploadResponse,
};
use crate::transport::Connection;

const INFO_PAGE: &str = include_str!("info_page.html");

/// Shared state of every route
#[derive(Debug, Clone)]
pub struct RelayState {
    /// Active tunnel slot
    pub tunnels: TunnelManager,
    /// Uploaded static stores
    pub statics: Arc<StaticFileManager>,
}

impl RelayState {
    /// Fresh state with no tunnel and no stores
    #[must_use]
    pub fn new(config: TunnelServerConfig) -> Self {
        Self {
            tunnels: TunnelManager::new(config),
            statics: Arc::new(StaticFileManager::new()),
        }
    }

    fn config(&self) -> &TunnelServerConfig {
        self.tunnels.config()
    }
}

/// Build the public router
pub fn build_router(state: RelayState) -> Router {
    let config = state.config();
    let upload_limit = DefaultBodyLimit::max(config.max_body_size);
    let control_path = config.control_path.clone();

    Router::new()
        .route("/health", get(health))
        .route("/upload", post(upload).layer(upload_limit))
        .route(&control_path, get(tunnel_upgrade))
        .fallback(relay)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "OK"
}

/// Accept an agent connection and try to install it as the active tunnel
async fn tunnel_upgrade(
    State(state): State<RelayState>,
    headers: HeaderMap,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> Response {
    let public_url = public_url(state.config(), &headers, &uri);
    let frame_limit = state.config().frame_limit();

    ws.max_message_size(frame_limit)
        .max_frame_size(frame_limit)
        .on_upgrade(move |socket| async move {
            let connection = Connection::from_axum(socket);
            match state.tunnels.create_tunnel(connection, public_url) {
                Ok(tunnel) => {
                    tracing::debug!(tunnel_id = %tunnel.id(), "agent connected");
                }
                Err(refused) => {
                    tracing::warn!(
                        active_tunnel = %refused.active_id,
                        "rejecting agent, a tunnel is already active"
                    );
                    refused
                        .connection
                        .reject(&TunnelError::AlreadyActive.to_string())
                        .await;
                }
            }
        })
}

/// Store uploaded files in a new static store
async fn upload(
    State(state): State<RelayState>,
    headers: HeaderMap,
    uri: Uri,
    mut multipart: Multipart,
) -> Response {
    let mut files = Vec::new();
    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let Some(name) = field.file_name().map(ToOwned::to_owned) else {
                    continue;
                };
                match field.bytes().await {
                    Ok(content) => files.push((name, content)),
                    Err(e) => return bad_form(&e),
                }
            }
            Ok(None) => break,
            Err(e) => return bad_form(&e),
        }
    }

    let store = state.statics.create_store();
    for (name, content) in files {
        store.add_file(&name, content);
    }

    tracing::info!(
        store_id = %store.id(),
        files = store.file_count(),
        "static files uploaded"
    );

    Json(UploadResponse {
        id: store.id().to_string(),
        url: format!("{}{}", public_url(state.config(), &headers, &uri), store.path()),
    })
    .into_response()
}

fn bad_form(err: &MultipartError) -> Response {
    tracing::warn!(error = %err, "failed to parse upload");
    (StatusCode::BAD_REQUEST, "Failed to parse form").into_response()
}

/// Relay a request through the active tunnel
async fn relay(State(state): State<RelayState>, request: Request) -> Response {
    let Some(tunnel) = state.tunnels.get_active_tunnel() else {
        return serve_without_tunnel(&state, request.uri());
    };

    let deadline = Instant::now() + state.config().forward_timeout;
    let (parts, body) = request.into_parts();

    let body = match to_bytes(body, state.config().max_body_size).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(error = %e, "failed to read request body");
            return (StatusCode::BAD_GATEWAY, "Failed to read request body").into_response();
        }
    };

    let path = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_string(), ToString::to_string);

    let forwarded = ForwardedRequest::new(parts.method.as_str(), path)
        .with_headers(headers_from_map(&parts.headers))
        .with_body(body);

    match tunnel.forward(forwarded, deadline).await {
        Ok(response) => relayed_response(parts.uri.path(), response),
        Err(e) => {
            tracing::warn!(
                tunnel_id = %tunnel.id(),
                method = %parts.method,
                uri = %parts.uri,
                error = %e,
                "relay failed"
            );
            e.into_response()
        }
    }
}

/// Turn the agent's answer into the public response
fn relayed_response(path: &str, response: ForwardedResponse) -> Response {
    let status = StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut headers = HeaderMap::new();
    for (name, values) in &response.headers {
        if is_hop_by_hop(name) {
            continue;
        }
        if name.eq_ignore_ascii_case(header::CONTENT_TYPE.as_str()) {
            if let Some(corrected) = content_type::correct(path, values) {
                headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(corrected));
                continue;
            }
        }
        append_header(&mut headers, name, values);
    }

    let mut relayed = Response::new(Body::from(response.body));
    *relayed.status_mut() = status;
    *relayed.headers_mut() = headers;
    relayed
}

fn serve_without_tunnel(state: &RelayState, uri: &Uri) -> Response {
    let path = uri.path();

    if let Some(rest) = path.strip_prefix('/').filter(|rest| !rest.is_empty()) {
        let (store_id, file) = rest.split_once('/').unwrap_or((rest, ""));
        if let Some(store) = state.statics.get_store(store_id) {
            return store.serve(file);
        }
    }

    if path == "/" {
        return Html(INFO_PAGE).into_response();
    }

    (StatusCode::NOT_FOUND, "No active tunnel").into_response()
}

/// `<scheme>://<host>` as seen by public callers
///
/// The scheme is the configured override, else the first `X-Forwarded-Proto`
/// value, else `http`.
fn public_url(config: &TunnelServerConfig, headers: &HeaderMap, uri: &Uri) -> String {
    let scheme = config.public_scheme.clone().unwrap_or_else(|| {
        headers
            .get("x-forwarded-proto")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or("http")
            .to_string()
    });

    let host = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| uri.authority().map(|authority| authority.as_str()))
        .unwrap_or("localhost");

    format!("{scheme}://{host}")
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ControlMessage, Headers};
    use crate::transport::testing::connection_pair;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tower::ServiceExt;

    async fn body_string(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get(uri: &str) -> Request {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    /// State with a live tunnel whose agent answers through `respond`
    async fn state_with_agent<F>(config: TunnelServerConfig, respond: F) -> RelayState
    where
        F: Fn(ForwardedRequest) -> Option<ForwardedResponse> + Send + 'static,
    {
        let state = RelayState::new(config);
        let (server, mut agent) = connection_pair().await;
        state.tunnels.create_tunnel(server, "http://relay.test").unwrap();

        let greeting = agent.stream.next().await.unwrap().unwrap();
        assert!(matches!(
            ControlMessage::decode(&greeting).unwrap(),
            ControlMessage::Ready { .. }
        ));

        tokio::spawn(async move {
            while let Some(Ok(frame)) = agent.stream.next().await {
                let request = ForwardedRequest::decode(&frame).unwrap();
                match respond(request) {
                    Some(response) => {
                        agent.sink.send(response.encode().unwrap()).await.unwrap();
                    }
                    None => {
                        let _ = agent.sink.close().await;
                        return;
                    }
                }
            }
        });

        state
    }

    #[tokio::test]
    async fn test_health() {
        let app = build_router(RelayState::new(TunnelServerConfig::default()));
        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "OK");
    }

    #[tokio::test]
    async fn test_no_tunnel_is_404() {
        let app = build_router(RelayState::new(TunnelServerConfig::default()));
        let response = app.oneshot(get("/api/users")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "No active tunnel");
    }

    #[tokio::test]
    async fn test_root_shows_info_page_without_tunnel() {
        let app = build_router(RelayState::new(TunnelServerConfig::default()));
        let response = app.oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/html"));
        assert!(body_string(response).await.contains("burrow relay"));
    }

    #[tokio::test]
    async fn test_static_store_served_without_tunnel() {
        let state = RelayState::new(TunnelServerConfig::default());
        let store = state.statics.create_store();
        store.add_file("css/site.css", "body{}");

        let app = build_router(state);
        let response = app
            .oneshot(get(&format!("/{}/css/site.css", store.id())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/css");
        assert_eq!(body_string(response).await, "body{}");
    }

    #[tokio::test]
    async fn test_upload_creates_store() {
        let state = RelayState::new(TunnelServerConfig::default());
        let app = build_router(state.clone());

        let body = "--XBOUNDARY\r\n\
            Content-Disposition: form-data; name=\"files\"; filename=\"index.html\"\r\n\
            Content-Type: application/octet-stream\r\n\r\n\
            <h1>hi</h1>\r\n\
            --XBOUNDARY\r\n\
            Content-Disposition: form-data; name=\"files\"; filename=\"js/app.js\"\r\n\
            Content-Type: application/octet-stream\r\n\r\n\
            run()\r\n\
            --XBOUNDARY--\r\n";
        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .header(header::HOST, "relay.test")
            .header("x-forwarded-proto", "https")
            .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XBOUNDARY")
            .body(Body::from(body))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let uploaded: UploadResponse = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(uploaded.url, format!("https://relay.test/{}", uploaded.id));

        let store = state.statics.get_store(&uploaded.id).unwrap();
        assert_eq!(store.get_file("index.html").unwrap(), "<h1>hi</h1>");
        assert_eq!(store.get_file("js/app.js").unwrap(), "run()");
    }

    #[tokio::test]
    async fn test_upload_rejects_non_multipart() {
        let app = build_router(RelayState::new(TunnelServerConfig::default()));
        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .body(Body::from("plain"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn test_relay_forwards_and_corrects_content_type() {
        let state = state_with_agent(TunnelServerConfig::default(), |request| {
            assert_eq!(request.method, "POST");
            assert_eq!(request.path, "/styles/main.css?v=2");
            assert_eq!(request.headers["x-custom-header"], vec!["test-value"]);
            assert_eq!(request.body, b"payload");

            let mut headers = Headers::new();
            headers.insert("Content-Type".to_string(), vec!["text/plain".to_string()]);
            headers.insert("Connection".to_string(), vec!["keep-alive".to_string()]);
            headers.insert(
                "X-Multi".to_string(),
                vec!["a".to_string(), "b".to_string()],
            );
            Some(
                ForwardedResponse::new(request.id, 201)
                    .with_headers(headers)
                    .with_body(b"body{}".to_vec()),
            )
        })
        .await;

        let app = build_router(state);
        let request = Request::builder()
            .method("POST")
            .uri("/styles/main.css?v=2")
            .header("x-custom-header", "test-value")
            .body(Body::from("payload"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/css");
        assert!(response.headers().get(header::CONNECTION).is_none());
        let multi: Vec<_> = response.headers().get_all("x-multi").iter().collect();
        assert_eq!(multi, ["a", "b"]);
        assert_eq!(body_string(response).await, "body{}");
    }

    #[tokio::test]
    async fn test_relay_keeps_specific_content_type() {
        let state = state_with_agent(TunnelServerConfig::default(), |request| {
            let mut headers = Headers::new();
            headers.insert(
                "content-type".to_string(),
                vec!["application/json".to_string()],
            );
            Some(ForwardedResponse::new(request.id, 200).with_headers(headers))
        })
        .await;

        let response = build_router(state)
            .oneshot(get("/data.css"))
            .await
            .unwrap();
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    }

    #[tokio::test]
    async fn test_relay_timeout_is_504() {
        let config = TunnelServerConfig {
            forward_timeout: Duration::from_millis(100),
            ..TunnelServerConfig::default()
        };
        // Answers a request nobody sent, keeping the connection open
        let state = state_with_agent(config, |_| {
            Some(ForwardedResponse::new("someone-else", 200))
        })
        .await;

        let response = build_router(state).oneshot(get("/slow")).await.unwrap();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body_string(response).await, "Request timeout");
    }

    #[tokio::test]
    async fn test_relay_connection_closed_is_502() {
        let state = state_with_agent(TunnelServerConfig::default(), |_| None).await;

        let response = build_router(state).oneshot(get("/gone")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(body_string(response).await, "Connection closed");
    }

    #[test]
    fn test_public_url() {
        let uri: Uri = "/ws/tunnel".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("relay.example.com"));

        let config = TunnelServerConfig::default();
        assert_eq!(
            public_url(&config, &headers, &uri),
            "http://relay.example.com"
        );

        headers.insert("x-forwarded-proto", HeaderValue::from_static("https, http"));
        assert_eq!(
            public_url(&config, &headers, &uri),
            "https://relay.example.com"
        );

        let config = TunnelServerConfig {
            public_scheme: Some("http".to_string()),
            ..TunnelServerConfig::default()
        };
        assert_eq!(
            public_url(&config, &headers, &uri),
            "http://relay.example.com"
        );
    }
}
