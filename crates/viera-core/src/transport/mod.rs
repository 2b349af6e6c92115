//! Transport layer for talking HTTP to Viera televisions.
//!
//! The set's embedded web server speaks a small subset of HTTP/1.1 and
//! expects UPnP verbs (`SUBSCRIBE`, `UNSUBSCRIBE`) alongside `GET` and
//! `POST`. [`HttpTransport`] implements exactly that subset over a raw TCP
//! stream. The [`Transport`] trait lets tests and embedders substitute their
//! own implementation.

pub mod http;

pub use http::HttpTransport;

use std::fmt;

use async_trait::async_trait;

use crate::error::Error;

/// A single HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method, e.g. `POST` or `SUBSCRIBE`.
    pub method: String,
    /// Absolute path, always starting with `/`.
    pub path: String,
    /// Extra headers in send order. `Host`, `Content-Length` and
    /// `Connection` are added by the transport.
    pub headers: Vec<(String, String)>,
    /// Request body, possibly empty.
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Creates a request with no headers or body.
    pub fn new(method: impl Into<String>, path: impl AsRef<str>) -> Self {
        let path = path.as_ref();
        Self {
            method: method.into(),
            path: if path.starts_with('/') {
                path.to_string()
            } else {
                format!("/{path}")
            },
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Creates a `GET` request.
    pub fn get(path: impl AsRef<str>) -> Self {
        Self::new("GET", path)
    }

    /// Creates a `POST` request carrying `body`.
    pub fn post(path: impl AsRef<str>, body: impl Into<Vec<u8>>) -> Self {
        Self::new("POST", path).with_body(body)
    }

    /// Appends a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replaces the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Request line plus body, for error diagnostics.
    pub fn summary(&self) -> String {
        if self.body.is_empty() {
            format!("{} {}", self.method, self.path)
        } else {
            format!(
                "{} {}\n{}",
                self.method,
                self.path,
                String::from_utf8_lossy(&self.body)
            )
        }
    }
}

/// A received HTTP response.
#[derive(Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code from the status line.
    pub status: u16,
    /// Headers in receive order, names as sent by the server.
    pub headers: Vec<(String, String)>,
    /// Decoded body (chunked transfer encoding already removed).
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Returns `true` for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Looks up a header case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Sends HTTP requests to one television.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Sends `request` and returns whatever response arrives.
    ///
    /// Non-2xx statuses are *not* errors at this layer. Failing to connect,
    /// write, or read is reported as an [`Error::ApiCall`] without a status
    /// (see [`Error::is_send_failure`]).
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse, Error>;

    /// Returns the device host.
    fn host(&self) -> &str;

    /// Returns the device port.
    fn port(&self) -> u16;
}
