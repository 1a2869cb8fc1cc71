//! Local HTTP proxy for the agent
//!
//! Replays a [`ForwardedRequest`] against the local service and turns the
//! outcome into a [`ForwardedResponse`]. Failures never escape: each stage
//! that can fail maps to a synthesized `text/plain` response carrying the
//! request's id, so the public caller always gets an answer.

use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::redirect::Policy;
use reqwest::{Client, Method, Url};

use crate::config::TunnelClientConfig;
use crate::error::{Result, TunnelError};
use crate::protocol::{
    append_header, headers_from_map, is_hop_by_hop, ForwardedRequest, ForwardedResponse, Headers,
};

/// Headers describing the public hop, replaced before the local call
const FORWARDING_DENYLIST: &[&str] = &[
    "x-forwarded-proto",
    "x-forwarded-ssl",
    "x-forwarded-port",
    "x-forwarded-for",
];

/// Headers the local client derives from the connection itself
const CONNECTION_HEADERS: &[&str] = &["host", "content-length"];

/// Replays relayed requests against `http://<local_host>:<local_port>`
#[derive(Debug, Clone)]
pub struct LocalProxy {
    client: Client,
    base_url: String,
}

impl LocalProxy {
    /// Create a proxy for the local service named in `config`
    ///
    /// Redirects are not followed; the public caller sees them as-is.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &TunnelClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .redirect(Policy::none())
            .no_proxy()
            .build()
            .map_err(TunnelError::connection)?;

        Ok(Self {
            client,
            base_url: format!("http://{}:{}", config.local_host, config.local_port),
        })
    }

    /// Base URL of the local service
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Relay one request to the local service
    pub async fn relay(&self, request: ForwardedRequest) -> ForwardedResponse {
        let ForwardedRequest {
            id,
            method,
            path,
            headers,
            body,
        } = request;

        let Ok(method) = Method::from_bytes(method.as_bytes()) else {
            let err = TunnelError::local_call(format!("invalid method {method:?}"));
            return failure(id, 500, "Failed to create request", &err);
        };

        let url = match self.local_url(&path) {
            Ok(url) => url,
            Err(e) => {
                let err = TunnelError::local_call(format!("invalid path {path:?}: {e}"));
                return failure(id, 500, "Failed to create request", &err);
            }
        };

        tracing::debug!(request_id = %id, method = %method, url = %url, "relaying to local service");

        let response = match self
            .client
            .request(method, url)
            .headers(local_headers(&headers))
            .body(body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let err = TunnelError::local_call(format!("request failed: {e}"));
                return failure(id, 502, "Failed to forward request", &err);
            }
        };

        let status = response.status().as_u16();
        let headers = headers_from_map(response.headers());

        match response.bytes().await {
            Ok(body) => ForwardedResponse::new(id, status)
                .with_headers(headers)
                .with_body(body),
            Err(e) => {
                let err = TunnelError::local_call(format!("reading response failed: {e}"));
                failure(id, 500, "Failed to read response", &err)
            }
        }
    }

    fn local_url(&self, path: &str) -> Result<Url> {
        let url = if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        };
        Url::parse(&url).map_err(|e| TunnelError::protocol(e.to_string()))
    }
}

/// Log a failed local call and answer the public caller with `message`
fn failure(id: String, status: u16, message: &str, err: &TunnelError) -> ForwardedResponse {
    tracing::warn!(request_id = %id, status, error = %err, "local call failed");
    ForwardedResponse::plain_text(id, status, message)
}

/// Headers for the local call: relayed headers minus the public hop's
/// forwarding and connection headers, plus `X-Forwarded-Proto: http`
fn local_headers(headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, values) in headers {
        let lower = name.to_ascii_lowercase();
        if FORWARDING_DENYLIST.contains(&lower.as_str())
            || CONNECTION_HEADERS.contains(&lower.as_str())
            || is_hop_by_hop(&lower)
        {
            continue;
        }
        append_header(&mut map, name, values);
    }
    map.insert("x-forwarded-proto", HeaderValue::from_static("http"));
    map
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::http::{HeaderMap as AxumHeaders, Method as AxumMethod, Uri};
    use axum::response::Redirect;
    use axum::routing::{any, get};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    async fn echo(method: AxumMethod, uri: Uri, headers: AxumHeaders, body: Bytes) -> Json<Value> {
        let headers: serde_json::Map<String, Value> = headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    Value::String(value.to_str().unwrap_or_default().to_string()),
                )
            })
            .collect();
        Json(json!({
            "method": method.as_str(),
            "uri": uri.to_string(),
            "headers": headers,
            "body": String::from_utf8_lossy(&body),
        }))
    }

    /// Local service answering `/echo` and `/redirect`; returns its port
    pub(crate) async fn spawn_local_app() -> u16 {
        let app = Router::new()
            .route("/echo", any(echo))
            .route("/redirect", get(|| async { Redirect::temporary("/elsewhere") }));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    fn proxy_for(port: u16) -> LocalProxy {
        LocalProxy::new(&TunnelClientConfig::new("http://relay.test", port).with_local_host("127.0.0.1"))
            .unwrap()
    }

    fn echoed(response: &ForwardedResponse) -> Value {
        serde_json::from_slice(&response.body).unwrap()
    }

    #[test]
    fn test_local_headers_filtering() {
        let mut headers = Headers::new();
        for (name, value) in [
            ("X-Forwarded-Proto", "https"),
            ("x-forwarded-for", "1.2.3.4"),
            ("x-forwarded-ssl", "on"),
            ("x-forwarded-port", "443"),
            ("host", "relay.example.com"),
            ("content-length", "5"),
            ("connection", "keep-alive"),
            ("authorization", "Bearer token"),
            ("x-custom-header", "test-value"),
        ] {
            headers.insert(name.to_string(), vec![value.to_string()]);
        }

        let map = local_headers(&headers);
        assert_eq!(map.get("x-forwarded-proto").unwrap(), "http");
        assert_eq!(map.get_all("x-forwarded-proto").iter().count(), 1);
        assert_eq!(map.get("authorization").unwrap(), "Bearer token");
        assert_eq!(map.get("x-custom-header").unwrap(), "test-value");
        for dropped in [
            "x-forwarded-for",
            "x-forwarded-ssl",
            "x-forwarded-port",
            "host",
            "content-length",
            "connection",
        ] {
            assert!(map.get(dropped).is_none(), "{dropped} should be dropped");
        }
    }

    #[tokio::test]
    async fn test_relay_reaches_local_service() {
        let proxy = proxy_for(spawn_local_app().await);

        let mut headers = Headers::new();
        headers.insert("x-custom-header".to_string(), vec!["test-value".to_string()]);
        headers.insert("x-forwarded-for".to_string(), vec!["1.2.3.4".to_string()]);
        let request = ForwardedRequest {
            id: "req-1".to_string(),
            ..ForwardedRequest::new("POST", "/echo?x=1")
                .with_headers(headers)
                .with_body(b"hello".to_vec())
        };

        let response = proxy.relay(request).await;
        assert_eq!(response.id, "req-1");
        assert_eq!(response.status_code, 200);
        assert_eq!(
            response.header_values("content-type").unwrap(),
            ["application/json"]
        );

        let echoed = echoed(&response);
        assert_eq!(echoed["method"], "POST");
        assert_eq!(echoed["uri"], "/echo?x=1");
        assert_eq!(echoed["body"], "hello");
        assert_eq!(echoed["headers"]["x-custom-header"], "test-value");
        assert_eq!(echoed["headers"]["x-forwarded-proto"], "http");
        assert!(echoed["headers"].get("x-forwarded-for").is_none());
    }

    #[tokio::test]
    async fn test_redirects_are_not_followed() {
        let proxy = proxy_for(spawn_local_app().await);

        let response = proxy.relay(ForwardedRequest::new("GET", "/redirect")).await;
        assert_eq!(response.status_code, 307);
        assert_eq!(response.header_values("location").unwrap(), ["/elsewhere"]);
    }

    #[tokio::test]
    async fn test_invalid_method_is_500() {
        let proxy = proxy_for(spawn_local_app().await);

        let response = proxy
            .relay(ForwardedRequest::new("BAD METHOD", "/echo"))
            .await;
        assert_eq!(response.status_code, 500);
        assert_eq!(response.body, b"Failed to create request");
        assert_eq!(response.header_values("content-type").unwrap(), ["text/plain"]);
    }

    #[tokio::test]
    async fn test_unreachable_local_service_is_502() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let proxy = proxy_for(port);

        let request = ForwardedRequest {
            id: "req-9".to_string(),
            ..ForwardedRequest::new("GET", "/")
        };
        let response = proxy.relay(request).await;
        assert_eq!(response.id, "req-9");
        assert_eq!(response.status_code, 502);
        assert_eq!(response.body, b"Failed to forward request");
    }

    #[test]
    fn test_failure_answers_with_request_id() {
        let err = TunnelError::local_call("request failed: connection refused");
        assert_eq!(
            err.to_string(),
            "Local call failed: request failed: connection refused"
        );

        let response = failure("req-9".to_string(), 502, "Failed to forward request", &err);
        assert_eq!(response.id, "req-9");
        assert_eq!(response.status_code, 502);
        assert_eq!(response.body, b"Failed to forward request");
    }

    #[test]
    fn test_base_url() {
        let config = TunnelClientConfig::new("https://relay.example.com", 3000);
        assert_eq!(LocalProxy::new(&config).unwrap().base_url(), "http://localhost:3000");
    }
}
