//! High-level handle to one television.
//!
//! [`Television`] ties a [`ProtocolClient`] and an [`EventSubscriber`] to a
//! [`DeviceIdentity`] and exposes the everyday operations: volume, mute,
//! keys, applications, power, and pairing.
//!
//! # Example
//!
//! ```no_run
//! use viera_core::{ClientConfig, DeviceIdentity, Key, Television};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), viera_core::Error> {
//!     let identity = DeviceIdentity::from_env("living-room", "192.168.1.50");
//!     let tv = Television::connect(identity, ClientConfig::default()).await?;
//!
//!     println!("volume: {}", tv.volume().await?);
//!     tv.send_key(&Key::Mute).await?;
//!     Ok(())
//! }
//! ```

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use quick_xml::escape::escape;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use crate::{
    client::ProtocolClient,
    config::{ClientConfig, DeviceIdentity, EncryptionMode},
    credentials::PairingCredentials,
    error::Error,
    events::{EventSubscriber, RENEWAL_INTERVAL},
    remote::Key,
    response::{ApplicationEntry, DeviceSpecs, TvEvent},
    session::{PairingState, SessionState},
    soap::{self, DMR_CONTROL_PATH, NRC_CONTROL_PATH, NRC_URN, RENDERING_URN},
    transport::{HttpTransport, Transport},
    wol,
};

const MASTER_CHANNEL: &str = "<InstanceID>0</InstanceID><Channel>Master</Channel>";

/// Product ids are 16 characters; anything else is launched by resource id.
const PRODUCT_ID_LEN: usize = 16;

/// A connected television.
pub struct Television {
    identity: DeviceIdentity,
    config: ClientConfig,
    client: ProtocolClient,
    events: Arc<EventSubscriber>,
    pairing_name: StdMutex<String>,
}

impl Television {
    /// Connects to the television described by `identity`.
    ///
    /// In encrypted mode this derives the session keys and requests a
    /// session id before returning. Open mode makes no network calls.
    pub async fn connect(identity: DeviceIdentity, config: ClientConfig) -> Result<Self, Error> {
        identity.mode()?;
        let transport = Arc::new(HttpTransport::new(
            identity.host.clone(),
            identity.port,
            config.timeout,
        ));
        Self::with_transport(identity, config, transport).await
    }

    /// Like [`connect`](Self::connect), over a caller-supplied transport.
    pub async fn with_transport(
        identity: DeviceIdentity,
        config: ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, Error> {
        let credentials = identity.credentials()?;
        let client = ProtocolClient::new(transport.clone());
        if let Some(credentials) = credentials {
            client.start_session(&credentials).await?;
            debug!(id = %identity.id, host = %identity.host, "Encrypted session established");
        }

        Ok(Self {
            pairing_name: StdMutex::new(config.device_name.clone()),
            events: Arc::new(EventSubscriber::new(transport)),
            client,
            identity,
            config,
        })
    }

    /// The identity this handle was created from.
    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// The caller-chosen device id.
    pub fn id(&self) -> &str {
        &self.identity.id
    }

    /// The configuration in use.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Whether protected commands are encrypted.
    pub async fn mode(&self) -> EncryptionMode {
        if self.client.is_encrypted().await {
            EncryptionMode::Encrypted
        } else {
            EncryptionMode::Open
        }
    }

    /// Session state, `None` in open mode.
    pub async fn session_state(&self) -> Option<SessionState> {
        self.client.session_state().await
    }

    /// Reads the device description.
    pub async fn specs(&self) -> Result<DeviceSpecs, Error> {
        self.client.device_specs().await
    }

    /// Current master volume, 0 to 100.
    pub async fn volume(&self) -> Result<u8, Error> {
        let xml = self.rendering("GetVolume", MASTER_CHANNEL).await?;
        let value = required(&xml, "GetVolume", "CurrentVolume")?;
        value.trim().parse().map_err(|_| {
            Error::invalid_response(
                format!("response not valid: CurrentVolume {value:?}"),
                "GetVolume",
                200,
                xml.clone(),
            )
        })
    }

    /// Sets the master volume.
    pub async fn set_volume(&self, volume: u8) -> Result<(), Error> {
        if volume > 100 {
            return Err(Error::InvalidArgument(format!(
                "volume must be between 0 and 100, got {volume}"
            )));
        }
        let args = format!("{MASTER_CHANNEL}<DesiredVolume>{volume}</DesiredVolume>");
        self.rendering("SetVolume", &args).await.map(drop)
    }

    /// Whether the master channel is muted.
    pub async fn is_muted(&self) -> Result<bool, Error> {
        let xml = self.rendering("GetMute", MASTER_CHANNEL).await?;
        let value = required(&xml, "GetMute", "CurrentMute")?;
        Ok(value.trim() == "1")
    }

    /// Mutes or unmutes the master channel.
    pub async fn set_mute(&self, mute: bool) -> Result<(), Error> {
        let args = format!(
            "{MASTER_CHANNEL}<DesiredMute>{}</DesiredMute>",
            if mute { "1" } else { "0" }
        );
        self.rendering("SetMute", &args).await.map(drop)
    }

    /// Presses a remote key.
    pub async fn send_key(&self, key: &Key) -> Result<(), Error> {
        let args = format!("<X_KeyEvent>{}</X_KeyEvent>", escape(key.code()));
        self.network("X_SendKey", &args).await.map(drop)
    }

    /// Launches an application by product id.
    pub async fn launch_app(&self, app_id: &str) -> Result<(), Error> {
        if app_id.is_empty() {
            return Err(Error::InvalidArgument("application id must not be empty".into()));
        }
        let keyword = if app_id.len() == PRODUCT_ID_LEN {
            "product_id"
        } else {
            "resource_id"
        };
        let args = format!(
            "<X_AppType>vc_app</X_AppType><X_LaunchKeyword>{keyword}={}</X_LaunchKeyword>",
            escape(app_id)
        );
        self.network("X_LaunchApp", &args).await.map(drop)
    }

    /// Installed applications.
    pub async fn apps(&self) -> Result<Vec<ApplicationEntry>, Error> {
        let xml = self.network("X_GetAppList", "").await?;
        let list = required(&xml, "X_GetAppList", "X_AppList")?;
        Ok(soap::parse_app_list(&list)
            .into_iter()
            .map(|(id, name)| ApplicationEntry { id, name })
            .collect())
    }

    /// Raw `X_GetVectorInfo` response.
    pub async fn vector_info(&self) -> Result<String, Error> {
        self.network("X_GetVectorInfo", "").await
    }

    /// Turns the television on.
    ///
    /// Uses Wake-on-LAN when a MAC address is configured, otherwise the
    /// power key, which only works while the set is still reachable.
    pub async fn power_on(&self) -> Result<(), Error> {
        match self.identity.mac_address.as_deref() {
            Some(mac) => wol::send_magic_packet(mac).await,
            None => self.send_key(&Key::Power).await,
        }
    }

    /// Turns the television off.
    pub async fn power_off(&self) -> Result<(), Error> {
        self.send_key(&Key::Power).await
    }

    /// Whether the screen is on, judged from the first event within `wait`.
    ///
    /// No event, or no subscription at all, counts as off. A subscription
    /// opened by this call is closed again before returning.
    pub async fn is_on(&self, wait: Duration) -> bool {
        let mut rx = self.events.events();
        let created = !self.events.is_subscribed().await;
        if !self.events.subscribe().await {
            return false;
        }

        let state = tokio::time::timeout(wait, first_screen_state(&mut rx))
            .await
            .ok()
            .flatten()
            .unwrap_or(false);

        if created {
            self.events.unsubscribe().await;
        }
        state
    }

    /// Asks the television to show a PIN, displaying `name` as the
    /// requesting device. Returns the challenge key.
    pub async fn request_pin_code(&self, name: Option<&str>) -> Result<String, Error> {
        let name = match name {
            Some(name) => {
                self.set_pairing_name(name);
                name.to_string()
            }
            None => self.pairing_name(),
        };
        self.client.request_pin_code(&name).await
    }

    /// Completes pairing with the PIN shown on screen.
    ///
    /// On success the new session is installed immediately, so protected
    /// commands work without reconnecting. The returned credentials should
    /// be stored by the caller for future [`connect`](Self::connect) calls.
    pub async fn authorize_pin_code(&self, pin: &str) -> Result<PairingCredentials, Error> {
        let credentials = self
            .client
            .authorize_pin_code(pin, &self.pairing_name())
            .await?;
        self.client.start_session(&credentials).await?;
        Ok(credentials)
    }

    /// Current pairing state.
    pub async fn pairing_state(&self) -> PairingState {
        self.client.pairing_state().await
    }

    /// Subscribes to events and keeps the lease renewed.
    ///
    /// Returns `false` if the subscription could not be set up.
    pub async fn watch_events(&self) -> bool {
        self.events.subscribe_with_renewal(RENEWAL_INTERVAL).await
    }

    /// Receiver for events published from now on.
    pub fn events(&self) -> broadcast::Receiver<TvEvent> {
        self.events.events()
    }

    /// Stops watching events.
    pub async fn stop_events(&self) {
        self.events.unsubscribe().await;
    }

    /// Tears down events and discards the session.
    ///
    /// Later protected calls fail with [`Error::InvalidState`].
    pub async fn disconnect(&self) {
        self.stop_events().await;
        self.client.disconnect().await;
        debug!(id = %self.identity.id, "Disconnected");
    }

    async fn rendering(&self, action: &str, args: &str) -> Result<String, Error> {
        self.client
            .invoke(DMR_CONTROL_PATH, RENDERING_URN, action, args, true)
            .await
    }

    async fn network(&self, action: &str, args: &str) -> Result<String, Error> {
        self.client
            .invoke(NRC_CONTROL_PATH, NRC_URN, action, args, true)
            .await
    }

    fn pairing_name(&self) -> String {
        match self.pairing_name.lock() {
            Ok(name) => name.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn set_pairing_name(&self, name: &str) {
        match self.pairing_name.lock() {
            Ok(mut current) => *current = name.to_string(),
            Err(poisoned) => *poisoned.into_inner() = name.to_string(),
        }
    }
}

impl std::fmt::Debug for Television {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Television")
            .field("identity", &self.identity)
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

async fn first_screen_state(rx: &mut broadcast::Receiver<TvEvent>) -> Option<bool> {
    loop {
        match rx.recv().await {
            Ok(TvEvent {
                screen_state: Some(on),
                ..
            }) => return Some(on),
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return None,
        }
    }
}

fn required(xml: &str, action: &str, element: &str) -> Result<String, Error> {
    soap::element_text(xml, element).ok_or_else(|| {
        Error::invalid_response(
            format!("response not valid: missing {element}"),
            action,
            200,
            xml,
        )
    })
}
