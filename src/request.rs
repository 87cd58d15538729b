//! Normalized upgrade request record and preconnect types.
//!
//! The accept side never hands the raw HTTP upgrade request to application
//! code. It hands a [`RequestInfo`] instead, which is what the preconnect
//! hook authorizes against.

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Cow;
use std::fmt;
use std::net::SocketAddr;

use rustc_hash::FxHashMap;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request};
use tokio_tungstenite::tungstenite::http::StatusCode;
use url::form_urlencoded;

// ============================================================================
// Headers
// ============================================================================

/// Case-insensitive header mapping.
///
/// Keys are stored lower-cased. A header that appears several times is
/// stored once, with its values joined by `,` in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    map: FxHashMap<String, String>,
}

impl Headers {
    /// Builds a mapping from `(name, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut headers = Self::default();
        for (name, value) in pairs {
            headers.append(name.as_ref(), value.as_ref());
        }
        headers
    }

    /// Adds a value, joining it onto any existing value with `,`.
    pub fn append(&mut self, name: &str, value: &str) {
        self.map
            .entry(name.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push(',');
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_owned());
    }

    /// Looks up a header by name, ignoring case.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.map.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Returns `true` if the header is present.
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of distinct header names.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if there are no headers.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates `(lower-cased name, joined value)` pairs in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

// ============================================================================
// RequestInfo
// ============================================================================

/// Normalized view of an incoming upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    /// Local port the request arrived on.
    pub server_port: u16,
    /// Host name from the `Host` header, or the local IP if absent.
    pub server_name: String,
    /// Address of the peer.
    pub remote_addr: SocketAddr,
    /// Request path, e.g. `/chat`.
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query_string: Option<String>,
    /// Request scheme. Always `http` for a plain TCP upgrade.
    pub scheme: String,
    /// Request method, normally `GET`.
    pub method: String,
    /// Request headers.
    pub headers: Headers,
}

impl RequestInfo {
    /// Normalizes a handshake request.
    pub(crate) fn from_handshake(
        request: &Request,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
    ) -> Self {
        let headers = Headers::from_pairs(request.headers().iter().map(|(name, value)| {
            (name.as_str(), String::from_utf8_lossy(value.as_bytes()))
        }));

        let server_name = headers
            .get("host")
            .map(strip_port)
            .filter(|host| !host.is_empty())
            .map_or_else(|| local_addr.ip().to_string(), str::to_owned);

        Self {
            server_port: local_addr.port(),
            server_name,
            remote_addr,
            path: request.uri().path().to_owned(),
            query_string: request.uri().query().map(str::to_owned),
            scheme: "http".to_owned(),
            method: request.method().as_str().to_owned(),
            headers,
        }
    }

    /// Decodes the query string into `(name, value)` pairs.
    #[must_use]
    pub fn query_params(&self) -> Vec<(String, String)> {
        self.query_string
            .as_deref()
            .map(|query| {
                form_urlencoded::parse(query.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the first decoded value of query parameter `name`.
    #[must_use]
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query_string.as_deref()?;
        form_urlencoded::parse(query.as_bytes())
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

/// Removes a trailing `:port` from a `Host` value, keeping IPv6 brackets.
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    host.split_once(':').map_or(host, |(name, _)| name)
}

// ============================================================================
// Rejection
// ============================================================================

/// Refusal returned by a preconnect hook.
///
/// Becomes the HTTP response to the upgrade request. No session, adapter or
/// connection result is created for a rejected request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    status: StatusCode,
    reason: Cow<'static, str>,
}

impl Rejection {
    /// Rejects with `403 Forbidden`.
    #[must_use]
    pub fn forbidden() -> Self {
        Self::with_status(StatusCode::FORBIDDEN)
    }

    /// Rejects with `401 Unauthorized`.
    #[must_use]
    pub fn unauthorized() -> Self {
        Self::with_status(StatusCode::UNAUTHORIZED)
    }

    /// Rejects with an arbitrary status code.
    #[must_use]
    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status,
            reason: Cow::Borrowed(status.canonical_reason().unwrap_or("Rejected")),
        }
    }

    /// Replaces the response body.
    #[must_use]
    pub fn reason(mut self, reason: impl Into<Cow<'static, str>>) -> Self {
        self.reason = reason.into();
        self
    }

    /// HTTP status sent to the peer.
    #[inline]
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Converts into the handshake's error response.
    pub(crate) fn into_response(self) -> ErrorResponse {
        let mut response = ErrorResponse::new(Some(self.reason.into_owned()));
        *response.status_mut() = self.status;
        response
    }
}

impl Default for Rejection {
    fn default() -> Self {
        Self::forbidden()
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.status.as_u16(), self.reason)
    }
}

// ============================================================================
// Tests
// ============================================================================
