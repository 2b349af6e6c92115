//! Registry of connected televisions keyed by device id.
//!
//! Hosts that fail to connect are put on a cooldown so a television that
//! is unplugged does not stall every caller for a full timeout.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, warn};

use crate::{
    config::{ClientConfig, DeviceIdentity},
    device::Television,
    error::Error,
    session::SessionState,
};

/// Owns one [`Television`] handle per device id.
#[derive(Debug)]
pub struct DeviceRegistry {
    config: ClientConfig,
    devices: Mutex<HashMap<String, Arc<Television>>>,
    failed_hosts: Mutex<HashMap<String, Instant>>,
}

impl DeviceRegistry {
    /// Creates an empty registry whose connections use `config`.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            devices: Mutex::new(HashMap::new()),
            failed_hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the handle for `identity.id`, connecting if needed.
    ///
    /// A handle whose session was disconnected is replaced. Fails with
    /// [`Error::InvalidState`] while the host is cooling down after a failed
    /// connect.
    pub async fn get_or_connect(&self, identity: DeviceIdentity) -> Result<Arc<Television>, Error> {
        if let Some(tv) = self.live_handle(&identity.id).await {
            return Ok(tv);
        }

        self.check_cooldown(&identity.host).await?;

        let id = identity.id.clone();
        let host = identity.host.clone();
        match Television::connect(identity, self.config.clone()).await {
            Ok(tv) => {
                self.failed_hosts.lock().await.remove(&host);
                if let Some(existing) = self.live_handle(&id).await {
                    debug!(%id, "Handle connected concurrently, keeping the first");
                    tv.disconnect().await;
                    return Ok(existing);
                }
                let tv = Arc::new(tv);
                self.devices.lock().await.insert(id, tv.clone());
                Ok(tv)
            }
            Err(e) => {
                warn!(%host, error = %e, "Connect failed, starting cooldown");
                self.failed_hosts.lock().await.insert(host, Instant::now());
                Err(e)
            }
        }
    }

    /// Registered handle for `id` unless its session was disconnected.
    ///
    /// The map lock is released before the handle's state is read.
    async fn live_handle(&self, id: &str) -> Option<Arc<Television>> {
        let tv = self.devices.lock().await.get(id).cloned()?;
        if tv.session_state().await == Some(SessionState::Disconnected) {
            debug!(%id, "Replacing disconnected handle");
            return None;
        }
        Some(tv)
    }

    async fn check_cooldown(&self, host: &str) -> Result<(), Error> {
        let mut failed = self.failed_hosts.lock().await;
        let Some(since) = failed.get(host) else {
            return Ok(());
        };
        let elapsed = since.elapsed();
        if elapsed >= self.config.reconnect_cooldown {
            failed.remove(host);
            return Ok(());
        }
        let left = self.config.reconnect_cooldown - elapsed;
        Err(Error::InvalidState(format!(
            "{host} failed recently; retry in {}s",
            left.as_secs().max(1)
        )))
    }

    /// Returns the handle for `id` without connecting.
    pub async fn get(&self, id: &str) -> Option<Arc<Television>> {
        self.devices.lock().await.get(id).cloned()
    }

    /// Disconnects and forgets `id`. Returns whether it was registered.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.devices.lock().await.remove(id);
        match removed {
            Some(tv) => {
                tv.disconnect().await;
                true
            }
            None => false,
        }
    }

    /// Disconnects and forgets every device concurrently.
    pub async fn disconnect_all(&self) {
        let devices: Vec<_> = self.devices.lock().await.drain().map(|(_, tv)| tv).collect();
        debug!(count = devices.len(), "Disconnecting all devices");
        futures::future::join_all(devices.iter().map(|tv| tv.disconnect())).await;
    }

    /// Registered device ids.
    pub async fn ids(&self) -> Vec<String> {
        self.devices.lock().await.keys().cloned().collect()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::PairingCredentials;
    use crate::session::tests::PAIRING_KEY;
    use std::time::Duration;
    use tokio::net::TcpListener;

    fn unreachable_identity() -> DeviceIdentity {
        // Port 1 on loopback refuses immediately.
        DeviceIdentity::new("bedroom", "127.0.0.1")
            .with_port(1)
            .with_pairing(PairingCredentials::new("app", PAIRING_KEY))
    }

    fn quick_config() -> ClientConfig {
        ClientConfig::new().with_timeout(Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_same_handle_returned() {
        let registry = DeviceRegistry::default();
        let identity = DeviceIdentity::new("living-room", "192.0.2.10");

        let a = registry.get_or_connect(identity.clone()).await.unwrap();
        let b = registry.get_or_connect(identity).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.ids().await, vec!["living-room".to_string()]);
    }

    #[tokio::test]
    async fn test_remove() {
        let registry = DeviceRegistry::default();
        registry
            .get_or_connect(DeviceIdentity::new("living-room", "192.0.2.10"))
            .await
            .unwrap();

        assert!(registry.remove("living-room").await);
        assert!(!registry.remove("living-room").await);
        assert!(registry.get("living-room").await.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_all() {
        let registry = DeviceRegistry::default();
        for id in ["a", "b"] {
            registry
                .get_or_connect(DeviceIdentity::new(id, "192.0.2.10"))
                .await
                .unwrap();
        }
        registry.disconnect_all().await;
        assert!(registry.ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_connect_starts_cooldown() {
        let registry = DeviceRegistry::new(quick_config());

        let first = registry.get_or_connect(unreachable_identity()).await.unwrap_err();
        assert!(first.is_send_failure());

        let second = registry.get_or_connect(unreachable_identity()).await.unwrap_err();
        assert!(matches!(second, Error::InvalidState(_)));
        assert!(registry.get("bedroom").await.is_none());
    }

    #[tokio::test]
    async fn test_cooldown_expires() {
        let registry = DeviceRegistry::new(quick_config().with_reconnect_cooldown(Duration::ZERO));

        let first = registry.get_or_connect(unreachable_identity()).await.unwrap_err();
        let second = registry.get_or_connect(unreachable_identity()).await.unwrap_err();
        assert!(first.is_send_failure());
        assert!(second.is_send_failure());
    }

    #[tokio::test]
    async fn test_slow_connect_does_not_block_other_devices() {
        // Accepts and holds connections without ever answering.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let registry = Arc::new(DeviceRegistry::new(
            ClientConfig::new().with_timeout(Duration::from_secs(2)),
        ));
        let slow = {
            let registry = registry.clone();
            let identity = DeviceIdentity::new("slow", "127.0.0.1")
                .with_port(port)
                .with_pairing(PairingCredentials::new("app", PAIRING_KEY));
            tokio::spawn(async move { registry.get_or_connect(identity).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        registry
            .get_or_connect(DeviceIdentity::new("fast", "192.0.2.10"))
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));

        assert!(slow.await.unwrap().is_err());
        assert_eq!(registry.ids().await, vec!["fast".to_string()]);
    }
}
