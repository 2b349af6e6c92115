//! Error types for viera-core.
//!
//! Every fallible operation in the crate returns [`Error`], the single
//! umbrella type surfaced to callers.

use std::fmt;

use thiserror::Error;

/// Error type for viera-core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A caller-supplied value was rejected before anything was sent.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation needs state the client does not have (e.g. a session).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Sealing a payload failed.
    #[error("encryption failed: {0}")]
    Encrypt(String),

    /// Opening a payload failed, including signature mismatches.
    #[error("decryption failed: {0}")]
    Decrypt(String),

    /// A call to the television failed or returned something unusable.
    ///
    /// [`CallDiagnostics::status`] is `None` when the request never got a
    /// response (see [`Error::is_send_failure`]).
    #[error("television API call failed: {message}")]
    ApiCall {
        /// Human-readable summary.
        message: String,
        /// Request and response captured for diagnostics.
        diagnostics: Box<CallDiagnostics>,
    },

    /// Operation timed out.
    #[error("timeout: {0}")]
    Timeout(String),

    /// I/O error outside of a television call (sockets, listeners).
    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Builds an [`Error::ApiCall`] for a request that never got a response.
    pub(crate) fn send_failed(message: impl Into<String>, request: impl Into<String>) -> Self {
        Error::ApiCall {
            message: message.into(),
            diagnostics: Box::new(CallDiagnostics {
                request: request.into(),
                status: None,
                response: None,
            }),
        }
    }

    /// Builds an [`Error::ApiCall`] for a response that arrived but was not valid.
    pub(crate) fn invalid_response(
        message: impl Into<String>,
        request: impl Into<String>,
        status: u16,
        response: impl Into<String>,
    ) -> Self {
        Error::ApiCall {
            message: message.into(),
            diagnostics: Box::new(CallDiagnostics {
                request: request.into(),
                status: Some(status),
                response: Some(response.into()),
            }),
        }
    }

    /// Returns `true` when the television was never reached.
    pub fn is_send_failure(&self) -> bool {
        matches!(self, Error::ApiCall { diagnostics, .. } if diagnostics.status.is_none())
    }

    /// Returns `true` for integrity or decryption failures.
    pub fn is_decrypt(&self) -> bool {
        matches!(self, Error::Decrypt(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

/// What was sent and, if anything, what came back.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CallDiagnostics {
    /// Request line plus body, e.g. `POST /nrc/control_0 X_SendKey`.
    pub request: String,
    /// HTTP status of the response, if one was received.
    pub status: Option<u16>,
    /// Raw response body, if one was received.
    pub response: Option<String>,
}

impl fmt::Debug for CallDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Bodies can be long SOAP envelopes; keep the summary readable.
        f.debug_struct("CallDiagnostics")
            .field("request", &truncate(&self.request, 256))
            .field("status", &self.status)
            .field("response", &self.response.as_deref().map(|r| truncate(r, 256)))
            .finish()
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_failure_has_no_status() {
        let err = Error::send_failed("connection refused", "POST /nrc/control_0");
        assert!(err.is_send_failure());
    }

    #[test]
    fn test_invalid_response_is_not_send_failure() {
        let err = Error::invalid_response("response not valid", "GET /nrc/ddd.xml", 200, "<x/>");
        assert!(!err.is_send_failure());
        match err {
            Error::ApiCall { diagnostics, .. } => {
                assert_eq!(diagnostics.status, Some(200));
                assert_eq!(diagnostics.response.as_deref(), Some("<x/>"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let err: Error = std::io::Error::other("boom").into();
        assert!(matches!(err, Error::Io(ref m) if m == "boom"));
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let s = "é".repeat(200);
        let t = truncate(&s, 255);
        assert!(t.len() <= 255);
        assert!(s.starts_with(t));
    }
}
