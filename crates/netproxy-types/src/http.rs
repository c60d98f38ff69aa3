//! HTTP request/response records for the proxied HTTP server.

use serde::{Deserialize, Serialize};

/// Connection endpoints of the socket that carried a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSocketInfo {
    pub local_address: Option<String>,
    pub local_port: Option<u16>,
    pub remote_address: Option<String>,
    pub remote_port: Option<u16>,
}

/// A fully buffered inbound HTTP request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    /// Request method (`GET`, `POST`, ...).
    pub method: String,
    /// Request target as sent by the client (path and query).
    pub url: String,
    /// `"1.0"`, `"1.1"` or `"2.0"`.
    pub http_version: String,
    /// Header pairs in wire order, names lowercased.
    pub headers: Vec<(String, String)>,
    /// Body decoded as UTF-8 (lossy).
    pub body: String,
    pub socket: HttpSocketInfo,
}

impl HttpRequest {
    /// First value of a header, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// The reply the caller side supplies for a parked request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status_code: u16,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<String>,
}

impl HttpResponse {
    /// A response with a status and a text body.
    pub fn text(status_code: u16, body: impl Into<String>) -> Self {
        Self {
            status_code,
            headers: vec![("content-type".to_string(), "text/plain".to_string())],
            body: Some(body.into()),
        }
    }
}
