//! JSON message protocol carried over the tunnel WebSocket
//!
//! Every message is one text frame holding one JSON object:
//!
//! ```text
//! server -> agent   {"id","url"} | {"error"}                      (once, first)
//! server -> agent   {"id","method","path","headers","body"}       (forwarded request)
//! agent  -> server  {"id","statusCode","headers","body"}          (forwarded response)
//! ```
//!
//! Header maps carry every value of a header in order. Bodies are base64.

use std::collections::HashMap;

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TunnelError};

/// Header multimap as it travels on the wire
pub type Headers = HashMap<String, Vec<String>>;

/// Headers that describe a single hop and are never copied between connections
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

// =============================================================================
// Control Message
// =============================================================================

/// First message on every tunnel connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlMessage {
    /// The tunnel was created
    Ready {
        /// Tunnel identifier
        id: String,
        /// Public URL now served by the tunnel
        url: String,
    },
    /// The tunnel was refused; the server closes the connection next
    Rejected {
        /// Why the tunnel was refused
        error: String,
    },
}

// =============================================================================
// Forwarded Request / Response
// =============================================================================

/// One public HTTP request relayed to the agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardedRequest {
    /// Correlation identifier, assigned by the tunnel when forwarding
    #[serde(default)]
    pub id: String,
    /// HTTP method
    pub method: String,
    /// Path including the query string
    pub path: String,
    /// Request headers
    #[serde(default, deserialize_with = "null_as_default")]
    pub headers: Headers,
    /// Raw request body
    #[serde(default, with = "base64_body")]
    pub body: Vec<u8>,
}

impl ForwardedRequest {
    /// Create a request without headers or body
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            method: method.into(),
            path: path.into(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Replace the headers (builder pattern)
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Replace the body (builder pattern)
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Encode as a text frame
    ///
    /// # Errors
    ///
    /// Returns a protocol error if serialization fails.
    pub fn encode(&self) -> Result<String> {
        encode(self)
    }

    /// Decode from a text frame
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the frame is not a valid request.
    pub fn decode(frame: &str) -> Result<Self> {
        decode(frame)
    }
}

/// The agent's answer to a [`ForwardedRequest`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardedResponse {
    /// Identifier of the request being answered
    pub id: String,
    /// HTTP status code
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    /// Response headers
    #[serde(default, deserialize_with = "null_as_default")]
    pub headers: Headers,
    /// Raw response body
    #[serde(default, with = "base64_body")]
    pub body: Vec<u8>,
}

impl ForwardedResponse {
    /// Create a response without headers or body
    #[must_use]
    pub fn new(id: impl Into<String>, status_code: u16) -> Self {
        Self {
            id: id.into(),
            status_code,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    /// Plain-text response synthesized when the local call fails
    #[must_use]
    pub fn plain_text(id: impl Into<String>, status_code: u16, message: &str) -> Self {
        let mut headers = Headers::new();
        headers.insert("Content-Type".to_string(), vec!["text/plain".to_string()]);
        Self {
            id: id.into(),
            status_code,
            headers,
            body: message.as_bytes().to_vec(),
        }
    }

    /// Replace the headers (builder pattern)
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Replace the body (builder pattern)
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Values of a header, matched case-insensitively
    #[must_use]
    pub fn header_values(&self, name: &str) -> Option<&[String]> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
    }

    /// Encode as a text frame
    ///
    /// # Errors
    ///
    /// Returns a protocol error if serialization fails.
    pub fn encode(&self) -> Result<String> {
        encode(self)
    }

    /// Decode from a text frame
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the frame is not a valid response.
    pub fn decode(frame: &str) -> Result<Self> {
        decode(frame)
    }
}

/// Body of a successful `POST /upload`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    /// Static store identifier
    pub id: String,
    /// Public URL the files are served under
    pub url: String,
}

impl ControlMessage {
    /// Encode as a text frame
    ///
    /// # Errors
    ///
    /// Returns a protocol error if serialization fails.
    pub fn encode(&self) -> Result<String> {
        encode(self)
    }

    /// Decode from a text frame
    ///
    /// # Errors
    ///
    /// Returns a protocol error if the frame is not a control message.
    pub fn decode(frame: &str) -> Result<Self> {
        decode(frame)
    }
}

fn encode<T: Serialize>(message: &T) -> Result<String> {
    serde_json::to_string(message).map_err(|e| TunnelError::protocol(e.to_string()))
}

fn decode<T: DeserializeOwned>(frame: &str) -> Result<T> {
    serde_json::from_str(frame).map_err(|e| TunnelError::protocol(e.to_string()))
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Bodies travel as standard base64; `null` decodes as empty
mod base64_body {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD
                .decode(encoded.as_bytes())
                .map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

// =============================================================================
// Header conversion
// =============================================================================

/// Collect an [`HeaderMap`] into the wire multimap, preserving value order
///
/// Values that are not valid UTF-8 are carried lossily.
#[must_use]
pub fn headers_from_map(map: &HeaderMap) -> Headers {
    let mut headers = Headers::new();
    for (name, value) in map {
        headers
            .entry(name.as_str().to_string())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    headers
}

/// Append one wire header to an [`HeaderMap`], skipping names or values HTTP cannot carry
pub fn append_header(map: &mut HeaderMap, name: &str, values: &[String]) {
    let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
        tracing::debug!(header = %name, "skipping invalid header name");
        return;
    };
    for value in values {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                map.append(name.clone(), value);
            }
            Err(_) => {
                tracing::debug!(header = %name, "skipping invalid header value");
            }
        }
    }
}

/// Whether a header only describes the current hop
#[must_use]
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|hop| hop.eq_ignore_ascii_case(name))
}

// =============================================================================
// Tests
// =============================================================================
