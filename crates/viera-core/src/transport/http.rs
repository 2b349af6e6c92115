//! HTTP/1.1 over a raw TCP stream.
//!
//! One connection per request, closed by the server after the response
//! (`Connection: close`). Bodies are delimited by `Content-Length`, chunked
//! transfer encoding, or end of stream, in that order of preference.

use std::time::Duration;

use async_trait::async_trait;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tracing::{debug, trace};

use super::{HttpRequest, HttpResponse, Transport};
use crate::error::Error;

/// HTTP transport for one television.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use viera_core::transport::{HttpRequest, HttpTransport, Transport};
///
/// #[tokio::main]
/// async fn main() -> Result<(), viera_core::Error> {
///     let transport = HttpTransport::new("192.168.1.50", 55000, Duration::from_secs(5));
///     let response = transport.request(HttpRequest::get("nrc/ddd.xml")).await?;
///     println!("{}", response.text());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct HttpTransport {
    host: String,
    port: u16,
    timeout: Duration,
}

impl HttpTransport {
    /// Creates a transport. No connection is made until the first request.
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
        }
    }

    fn encode(&self, request: &HttpRequest) -> Vec<u8> {
        let mut head = format!(
            "{} {} HTTP/1.1\r\nHost: {}:{}\r\n",
            request.method, request.path, self.host, self.port
        );
        for (name, value) in &request.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        if !request.body.is_empty() || request.method == "POST" {
            head.push_str(&format!("Content-Length: {}\r\n", request.body.len()));
        }
        head.push_str("Connection: close\r\n\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&request.body);
        bytes
    }

    async fn exchange(&self, request: &HttpRequest) -> Result<Vec<u8>, String> {
        let addr = format!("{}:{}", self.host, self.port);
        let mut stream = timeout(self.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| "Connection timed out".to_string())?
            .map_err(|e| format!("Connection failed: {e}"))?;

        timeout(self.timeout, stream.write_all(&self.encode(request)))
            .await
            .map_err(|_| "Write timed out".to_string())?
            .map_err(|e| format!("Write failed: {e}"))?;

        let mut response = Vec::with_capacity(2048);
        let mut buf = [0u8; 4096];

        loop {
            let n = timeout(self.timeout, stream.read(&mut buf))
                .await
                .map_err(|_| "Read timed out".to_string())?
                .map_err(|e| format!("Read failed: {e}"))?;

            if n == 0 {
                break;
            }
            response.extend_from_slice(&buf[..n]);

            if is_complete(&response) {
                break;
            }
        }

        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse, Error> {
        debug!(
            host = %self.host,
            port = self.port,
            method = %request.method,
            path = %request.path,
            body_len = request.body.len(),
            "Sending HTTP request"
        );

        let raw = self
            .exchange(&request)
            .await
            .map_err(|e| Error::send_failed(e, request.summary()))?;

        let Some(response) = parse_response(&raw) else {
            debug!(
                host = %self.host,
                len = raw.len(),
                head = %hex::encode(&raw[..raw.len().min(64)]),
                "Unparseable HTTP response"
            );
            return Err(Error::send_failed("Invalid HTTP response", request.summary()));
        };

        debug!(
            host = %self.host,
            status = response.status,
            body_len = response.body.len(),
            "Received HTTP response"
        );
        trace!(body = %response.text(), "Response body");

        Ok(response)
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn port(&self) -> u16 {
        self.port
    }
}

/// Finds the position of `\r\n\r\n` (end of headers).
pub(crate) fn find_header_end(data: &[u8]) -> Option<usize> {
    data.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parses the status code from an HTTP status line.
fn parse_status_code(status_line: &str) -> Option<u16> {
    let mut parts = status_line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

/// Splits header lines into `(name, value)` pairs.
pub(crate) fn parse_headers(head: &str) -> Vec<(String, String)> {
    head.lines()
        .skip(1)
        .filter_map(|line| {
            let (name, value) = line.split_once(':')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

pub(crate) fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

pub(crate) fn is_chunked(headers: &[(String, String)]) -> bool {
    header(headers, "transfer-encoding")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
}

/// Whether `data` already holds a full response, so reading can stop
/// before the server closes the stream.
fn is_complete(data: &[u8]) -> bool {
    let Some(end) = find_header_end(data) else {
        return false;
    };
    let headers = parse_headers(&String::from_utf8_lossy(&data[..end]));
    let body = &data[end + 4..];

    if let Some(len) = header(&headers, "content-length").and_then(|v| v.parse::<usize>().ok()) {
        return body.len() >= len;
    }
    if is_chunked(&headers) {
        return decode_chunked(body).is_some();
    }
    false
}

/// Decodes a chunked body. Returns `None` until the terminating chunk is seen.
pub(crate) fn decode_chunked(mut data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let line_end = data.windows(2).position(|w| w == b"\r\n")?;
        let size_str = std::str::from_utf8(&data[..line_end]).ok()?;
        let size_str = size_str.split(';').next()?.trim();
        let size = usize::from_str_radix(size_str, 16).ok()?;
        data = &data[line_end + 2..];

        if size == 0 {
            return Some(out);
        }
        if data.len() < size + 2 {
            return None;
        }
        out.extend_from_slice(&data[..size]);
        data = &data[size + 2..];
    }
}

/// Parses a complete raw response.
fn parse_response(raw: &[u8]) -> Option<HttpResponse> {
    let end = find_header_end(raw)?;
    let head = String::from_utf8_lossy(&raw[..end]);
    let status = parse_status_code(head.lines().next()?)?;
    let headers = parse_headers(&head);
    let body = &raw[end + 4..];

    let body = if let Some(len) =
        header(&headers, "content-length").and_then(|v| v.parse::<usize>().ok())
    {
        body[..len.min(body.len())].to_vec()
    } else if is_chunked(&headers) {
        decode_chunked(body).unwrap_or_else(|| body.to_vec())
    } else {
        body.to_vec()
    };

    Some(HttpResponse {
        status,
        headers,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_status_code() {
        assert_eq!(parse_status_code("HTTP/1.1 200 OK"), Some(200));
        assert_eq!(parse_status_code("HTTP/1.0 500 Internal Server Error"), Some(500));
        assert_eq!(parse_status_code("garbage"), None);
        assert_eq!(parse_status_code("HTTP/1.1"), None);
    }

    #[test]
    fn test_parse_response_with_content_length() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nSID: uuid:1\r\n\r\nhelloEXTRA";
        let resp = parse_response(raw).unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"hello");
        assert_eq!(resp.header("sid"), Some("uuid:1"));
    }

    #[test]
    fn test_parse_response_chunked() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        assert!(is_complete(raw));
        let resp = parse_response(raw).unwrap();
        assert_eq!(resp.body, b"Wikipedia");
    }

    #[test]
    fn test_incomplete_chunked_body() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWi";
        assert!(!is_complete(raw));
    }

    #[test]
    fn test_parse_response_until_eof() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/xml\r\n\r\n<a/>";
        assert!(!is_complete(raw));
        assert_eq!(parse_response(raw).unwrap().body, b"<a/>");
    }

    #[test]
    fn test_encode_includes_headers_and_length() {
        let transport = HttpTransport::new("10.0.0.2", 55000, Duration::from_secs(1));
        let req = HttpRequest::post("nrc/control_0", "<x/>")
            .with_header("SOAPACTION", "\"urn:a#b\"");
        let encoded = String::from_utf8(transport.encode(&req)).unwrap();
        assert!(encoded.starts_with("POST /nrc/control_0 HTTP/1.1\r\nHost: 10.0.0.2:55000\r\n"));
        assert!(encoded.contains("SOAPACTION: \"urn:a#b\"\r\n"));
        assert!(encoded.contains("Content-Length: 4\r\n"));
        assert!(encoded.ends_with("\r\n\r\n<x/>"));
    }

    #[test]
    fn test_encode_get_has_no_content_length() {
        let transport = HttpTransport::new("tv", 55000, Duration::from_secs(1));
        let encoded = String::from_utf8(transport.encode(&HttpRequest::get("nrc/ddd.xml"))).unwrap();
        assert!(!encoded.contains("Content-Length"));
    }

    #[tokio::test]
    async fn test_request_against_local_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let req = String::from_utf8_lossy(&buf[..n]).to_string();
            assert!(req.starts_with("SUBSCRIBE /nrc/event_0 HTTP/1.1"));
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nSID: uuid:42\r\nContent-Length: 0\r\n\r\n")
                .await
                .unwrap();
        });

        let transport = HttpTransport::new("127.0.0.1", port, Duration::from_secs(2));
        let resp = transport
            .request(HttpRequest::new("SUBSCRIBE", "nrc/event_0"))
            .await
            .unwrap();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.header("SID"), Some("uuid:42"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_send_failure() {
        // Bind then drop to get a port with nothing listening.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport = HttpTransport::new("127.0.0.1", port, Duration::from_secs(1));
        let err = transport.request(HttpRequest::get("nrc/ddd.xml")).await.unwrap_err();
        assert!(err.is_send_failure());
    }
}
