//! Connection parameters supplied by the embedding application.
//!
//! [`DeviceIdentity`] says *which* television to talk to and how it is
//! paired; [`ClientConfig`] tunes timeouts and timers. Neither is persisted
//! by this crate.

use std::fmt;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::{DEFAULT_PORT, credentials::PairingCredentials, error::Error};

/// Default timeout for HTTP requests to the television.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default time [`Television::is_on`](crate::Television::is_on) waits for a
/// first event.
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(3);

/// Default delay before a failed host may be connected to again.
pub const DEFAULT_RECONNECT_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Name shown on the television while pairing.
pub const DEFAULT_DEVICE_NAME: &str = "viera-rs";

/// Environment variable holding the paired application id.
pub const ENV_APP_ID: &str = "VIERA_APP_ID";

/// Environment variable holding the base64 pairing key.
pub const ENV_ENCRYPTION_KEY: &str = "VIERA_ENCRYPTION_KEY";

/// Environment variable holding the television MAC address.
pub const ENV_MAC_ADDRESS: &str = "VIERA_MAC_ADDRESS";

/// Whether protected commands are wrapped in the encrypted envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMode {
    /// Neither an application id nor a key was given.
    Open,
    /// Both an application id and a key were given.
    Encrypted,
}

/// Which television to talk to and, optionally, how it is paired.
///
/// # Example
///
/// ```
/// use viera_core::{DeviceIdentity, PairingCredentials};
///
/// let identity = DeviceIdentity::new("living-room", "192.168.1.50")
///     .with_pairing(PairingCredentials::new("AbCdEf", "vdj1PiHp9lJ3OhhzSbqNRw=="))
///     .with_mac_address("AA:BB:CC:DD:EE:FF");
///
/// assert_eq!(identity.port, viera_core::DEFAULT_PORT);
/// ```
#[derive(Clone)]
pub struct DeviceIdentity {
    /// Caller-chosen identifier, used as the registry key.
    pub id: String,
    /// Hostname or IP address.
    pub host: String,
    /// HTTP control port.
    pub port: u16,
    /// Application id from a previous pairing.
    pub app_id: Option<String>,
    /// Base64 pairing key from a previous pairing.
    pub encryption_key: Option<SecretString>,
    /// MAC address used for wake-on-LAN.
    pub mac_address: Option<String>,
}

impl DeviceIdentity {
    /// Creates an open-mode identity on the default port.
    pub fn new(id: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port: DEFAULT_PORT,
            app_id: None,
            encryption_key: None,
            mac_address: None,
        }
    }

    /// Builds an identity from `VIERA_APP_ID`, `VIERA_ENCRYPTION_KEY` and
    /// `VIERA_MAC_ADDRESS`.
    ///
    /// Unset or empty variables are left as `None`. Setting only one of the
    /// two pairing variables yields an identity that
    /// [`Television::connect`](crate::Television::connect) rejects.
    pub fn from_env(id: impl Into<String>, host: impl Into<String>) -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());

        let mut identity = Self::new(id, host);
        identity.app_id = read(ENV_APP_ID);
        identity.encryption_key = read(ENV_ENCRYPTION_KEY).map(SecretString::from);
        identity.mac_address = read(ENV_MAC_ADDRESS);
        identity
    }

    /// Sets the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the application id and key from a previous pairing.
    pub fn with_pairing(mut self, credentials: PairingCredentials) -> Self {
        self.encryption_key = Some(SecretString::from(
            credentials.expose_encryption_key().to_string(),
        ));
        self.app_id = Some(credentials.app_id);
        self
    }

    /// Sets the MAC address used by [`Television::power_on`](crate::Television::power_on).
    pub fn with_mac_address(mut self, mac: impl Into<String>) -> Self {
        self.mac_address = Some(mac.into());
        self
    }

    /// Returns the encryption mode, rejecting a half-configured pairing.
    pub fn mode(&self) -> Result<EncryptionMode, Error> {
        match (&self.app_id, &self.encryption_key) {
            (Some(_), Some(_)) => Ok(EncryptionMode::Encrypted),
            (None, None) => Ok(EncryptionMode::Open),
            _ => Err(Error::InvalidArgument(format!(
                "device {}: app id and encryption key must be given together",
                self.id
            ))),
        }
    }

    /// Returns the pairing credentials when the identity is encrypted-mode.
    pub fn credentials(&self) -> Result<Option<PairingCredentials>, Error> {
        match self.mode()? {
            EncryptionMode::Open => Ok(None),
            EncryptionMode::Encrypted => Ok(self
                .app_id
                .as_ref()
                .zip(self.encryption_key.as_ref())
                .map(|(app, key)| PairingCredentials::new(app.clone(), key.expose_secret()))),
        }
    }
}

impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("app_id", &self.app_id)
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("mac_address", &self.mac_address)
            .finish()
    }
}

/// Timeouts and timers shared by every operation on a television.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connect, write and read timeout for each HTTP request.
    pub timeout: Duration,
    /// How long [`Television::is_on`](crate::Television::is_on) waits for an event.
    pub event_timeout: Duration,
    /// How long the registry refuses to reconnect to a failed host.
    pub reconnect_cooldown: Duration,
    /// Name displayed on the television during pairing.
    pub device_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            event_timeout: DEFAULT_EVENT_TIMEOUT,
            reconnect_cooldown: DEFAULT_RECONNECT_COOLDOWN,
            device_name: DEFAULT_DEVICE_NAME.to_string(),
        }
    }
}

impl ClientConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the event wait used by `is_on`.
    pub fn with_event_timeout(mut self, timeout: Duration) -> Self {
        self.event_timeout = timeout;
        self
    }

    /// Sets the registry reconnect cooldown.
    pub fn with_reconnect_cooldown(mut self, cooldown: Duration) -> Self {
        self.reconnect_cooldown = cooldown;
        self
    }

    /// Sets the name shown on the television while pairing.
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_defaults_to_open_mode() {
        let identity = DeviceIdentity::new("tv", "10.0.0.2");
        assert_eq!(identity.port, DEFAULT_PORT);
        assert_eq!(identity.mode().unwrap(), EncryptionMode::Open);
        assert!(identity.credentials().unwrap().is_none());
    }

    #[test]
    fn test_identity_with_pairing_is_encrypted() {
        let identity = DeviceIdentity::new("tv", "10.0.0.2")
            .with_port(8080)
            .with_pairing(PairingCredentials::new("app", "a2V5"));
        assert_eq!(identity.port, 8080);
        assert_eq!(identity.mode().unwrap(), EncryptionMode::Encrypted);
        assert_eq!(
            identity.credentials().unwrap(),
            Some(PairingCredentials::new("app", "a2V5"))
        );
    }

    #[test]
    fn test_identity_mixed_mode_is_rejected() {
        let mut identity = DeviceIdentity::new("tv", "10.0.0.2");
        identity.app_id = Some("app".into());
        assert!(matches!(identity.mode(), Err(Error::InvalidArgument(_))));

        let mut identity = DeviceIdentity::new("tv", "10.0.0.2");
        identity.encryption_key = Some(SecretString::from("a2V5".to_string()));
        assert!(matches!(identity.credentials(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_identity_debug_redacts_key() {
        let identity = DeviceIdentity::new("tv", "10.0.0.2")
            .with_pairing(PairingCredentials::new("app", "c2VjcmV0"));
        let debug = format!("{identity:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("c2VjcmV0"));
    }

    #[test]
    fn test_config_builder() {
        let config = ClientConfig::new()
            .with_timeout(Duration::from_secs(1))
            .with_event_timeout(Duration::from_millis(200))
            .with_reconnect_cooldown(Duration::from_secs(30))
            .with_device_name("kitchen");
        assert_eq!(config.timeout, Duration::from_secs(1));
        assert_eq!(config.event_timeout, Duration::from_millis(200));
        assert_eq!(config.reconnect_cooldown, Duration::from_secs(30));
        assert_eq!(config.device_name, "kitchen");
    }

    #[test]
    fn test_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.reconnect_cooldown, Duration::from_secs(300));
        assert_eq!(config.device_name, DEFAULT_DEVICE_NAME);
    }
}
