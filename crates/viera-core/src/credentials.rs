//! Pairing credentials for encrypted Viera televisions.
//!
//! Sets running the 2019+ firmware only accept protected commands from a
//! paired application. Pairing (see
//! [`Television::authorize_pin_code`](crate::Television::authorize_pin_code))
//! yields an application id plus a base64 encryption key; both must be
//! persisted by the caller and supplied on every later connection.
//!
//! # Security
//!
//! The encryption key is stored using [`SecretString`] from the `secrecy`
//! crate so it never shows up in logs or `Debug` output. Use
//! [`PairingCredentials::expose_encryption_key()`] when the raw value is
//! needed.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};

/// Application id and encryption key obtained by pairing.
///
/// # Example
///
/// ```
/// use viera_core::PairingCredentials;
///
/// let creds = PairingCredentials::new("AbCdEf123456", "vdj1PiHp9lJ3OhhzSbqNRw==");
/// assert_eq!(creds.app_id, "AbCdEf123456");
/// assert_eq!(creds.expose_encryption_key(), "vdj1PiHp9lJ3OhhzSbqNRw==");
/// ```
#[derive(Clone)]
pub struct PairingCredentials {
    /// Application id assigned by the television.
    pub app_id: String,
    /// Base64 pairing key (protected from accidental logging).
    encryption_key: SecretString,
}

impl PairingCredentials {
    /// Creates credentials from an application id and base64 key.
    pub fn new(app_id: impl Into<String>, encryption_key: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            encryption_key: SecretString::from(encryption_key.into()),
        }
    }

    /// Exposes the base64 encryption key.
    ///
    /// Never log or display the returned value.
    pub fn expose_encryption_key(&self) -> &str {
        self.encryption_key.expose_secret()
    }
}

impl PartialEq for PairingCredentials {
    fn eq(&self, other: &Self) -> bool {
        self.app_id == other.app_id
            && self.encryption_key.expose_secret() == other.encryption_key.expose_secret()
    }
}

impl Eq for PairingCredentials {}

impl fmt::Debug for PairingCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingCredentials")
            .field("app_id", &self.app_id)
            .field("encryption_key", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_new() {
        let creds = PairingCredentials::new("app", "key==");
        assert_eq!(creds.app_id, "app");
        assert_eq!(creds.expose_encryption_key(), "key==");
    }

    #[test]
    fn test_credentials_equality() {
        let a = PairingCredentials::new("app", "key");
        let b = PairingCredentials::new("app", "key");
        let c = PairingCredentials::new("app", "other");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_credentials_debug_redacts_key() {
        let creds = PairingCredentials::new("my-app", "c2VjcmV0");
        let debug = format!("{:?}", creds);
        assert!(debug.contains("my-app"));
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("c2VjcmV0"));
    }
}
