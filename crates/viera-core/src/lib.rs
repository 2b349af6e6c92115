//! Core library for controlling Panasonic Viera televisions over the network.
//!
//! Viera sets expose a UPnP-style SOAP interface on TCP port 55000. Older
//! models accept plain SOAP; newer ones require commands to be wrapped in an
//! AES-CBC + HMAC-SHA-256 envelope whose keys come from a one-time PIN
//! pairing.
//!
//! # Overview
//!
//! - [`Television`] is the handle most callers want: volume, mute, keys,
//!   applications, power, pairing, and events.
//! - [`discovery`] finds televisions with SSDP.
//! - [`DeviceRegistry`] keeps one handle per device and throttles
//!   reconnects to hosts that recently failed.
//! - [`blocking`] wraps the async API for synchronous callers.
//!
//! # Example
//!
//! ```no_run
//! use viera_core::{ClientConfig, DeviceIdentity, Key, Television};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), viera_core::Error> {
//!     let tv = Television::connect(
//!         DeviceIdentity::new("living-room", "192.168.1.50"),
//!         ClientConfig::default(),
//!     )
//!     .await?;
//!
//!     tv.set_volume(12).await?;
//!     tv.send_key(&Key::Home).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Pairing
//!
//! Encrypted sets need an application id and key. Request a PIN, read it off
//! the screen, and authorize:
//!
//! ```no_run
//! # async fn pair(tv: &viera_core::Television) -> Result<(), viera_core::Error> {
//! tv.request_pin_code(None).await?;
//! let credentials = tv.authorize_pin_code("1234").await?;
//! println!("VIERA_APP_ID={}", credentials.app_id);
//! # Ok(())
//! # }
//! ```
//!
//! The library never installs a `tracing` subscriber; wire activity is
//! logged at `debug`.

use std::time::Duration;

pub mod blocking;
pub mod client;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod device;
pub mod discovery;
pub mod error;
pub mod events;
pub mod registry;
pub mod remote;
pub mod response;
pub mod session;
pub mod soap;
pub mod transport;
pub mod wol;

pub use config::{ClientConfig, DeviceIdentity, EncryptionMode};
pub use credentials::PairingCredentials;
pub use device::Television;
pub use discovery::{DiscoveredDevice, DiscoveredTelevision, DiscoveryHandle};
pub use error::Error;
pub use registry::DeviceRegistry;
pub use remote::Key;
pub use response::{ApplicationEntry, DeviceSpecs, TvEvent};

/// The version of the viera-core library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default HTTP port of the television's control interface.
pub const DEFAULT_PORT: u16 = 55000;

/// Default discovery timeout.
///
/// How long to collect SSDP replies before probing.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(3);
