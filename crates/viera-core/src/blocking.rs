//! Synchronous wrapper around [`Television`](crate::Television).
//!
//! Each [`Television`] owns a small private runtime and drives the async
//! client on it, so retries, encryption and parsing behave exactly as in
//! async code. Do not call these methods from inside another tokio runtime.
//!
//! ```no_run
//! use viera_core::{ClientConfig, DeviceIdentity, blocking::Television};
//!
//! let tv = Television::connect(DeviceIdentity::new("tv", "192.168.1.50"), ClientConfig::default())?;
//! tv.set_volume(15)?;
//! # Ok::<(), viera_core::Error>(())
//! ```

use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tokio::sync::broadcast;

use crate::{
    config::{ClientConfig, DeviceIdentity},
    credentials::PairingCredentials,
    device,
    discovery::{self, DiscoveredTelevision},
    error::Error,
    remote::Key,
    response::{ApplicationEntry, DeviceSpecs, TvEvent},
};

fn runtime() -> Result<Runtime, Error> {
    Builder::new_multi_thread()
        .worker_threads(1)
        .thread_name("viera-blocking")
        .enable_all()
        .build()
        .map_err(Error::from)
}

/// Blocking handle to one television.
#[derive(Debug)]
pub struct Television {
    inner: device::Television,
    runtime: Runtime,
}

impl Television {
    /// Blocking [`connect`](device::Television::connect).
    pub fn connect(identity: DeviceIdentity, config: ClientConfig) -> Result<Self, Error> {
        let runtime = runtime()?;
        let inner = runtime.block_on(device::Television::connect(identity, config))?;
        Ok(Self { inner, runtime })
    }

    /// The async handle, for use with [`block_on`](Self::block_on).
    pub fn inner(&self) -> &device::Television {
        &self.inner
    }

    /// Runs any future on this handle's runtime.
    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    /// Blocking [`specs`](device::Television::specs).
    pub fn specs(&self) -> Result<DeviceSpecs, Error> {
        self.block_on(self.inner.specs())
    }

    /// Current volume, 0 to 100.
    pub fn volume(&self) -> Result<u8, Error> {
        self.block_on(self.inner.volume())
    }

    /// Sets the volume; values above 100 are rejected.
    pub fn set_volume(&self, volume: u8) -> Result<(), Error> {
        self.block_on(self.inner.set_volume(volume))
    }

    /// Whether audio is muted.
    pub fn is_muted(&self) -> Result<bool, Error> {
        self.block_on(self.inner.is_muted())
    }

    /// Mutes or unmutes.
    pub fn set_mute(&self, mute: bool) -> Result<(), Error> {
        self.block_on(self.inner.set_mute(mute))
    }

    /// Presses one remote key.
    pub fn send_key(&self, key: &Key) -> Result<(), Error> {
        self.block_on(self.inner.send_key(key))
    }

    /// Launches the application with `app_id`.
    pub fn launch_app(&self, app_id: &str) -> Result<(), Error> {
        self.block_on(self.inner.launch_app(app_id))
    }

    /// Installed applications.
    pub fn apps(&self) -> Result<Vec<ApplicationEntry>, Error> {
        self.block_on(self.inner.apps())
    }

    /// Raw `X_GetVectorInfo` reply.
    pub fn vector_info(&self) -> Result<String, Error> {
        self.block_on(self.inner.vector_info())
    }

    /// Blocking [`power_on`](device::Television::power_on).
    pub fn power_on(&self) -> Result<(), Error> {
        self.block_on(self.inner.power_on())
    }

    /// Sends the power key.
    pub fn power_off(&self) -> Result<(), Error> {
        self.block_on(self.inner.power_off())
    }

    /// Whether the screen reports on within `wait`.
    pub fn is_on(&self, wait: Duration) -> bool {
        self.block_on(self.inner.is_on(wait))
    }

    /// Shows a PIN on screen and returns the challenge key.
    pub fn request_pin_code(&self, name: Option<&str>) -> Result<String, Error> {
        self.block_on(self.inner.request_pin_code(name))
    }

    /// Completes pairing with the PIN shown on screen.
    pub fn authorize_pin_code(&self, pin: &str) -> Result<PairingCredentials, Error> {
        self.block_on(self.inner.authorize_pin_code(pin))
    }

    /// Starts watching events; the renewal task runs on this handle's runtime.
    pub fn watch_events(&self) -> bool {
        self.block_on(self.inner.watch_events())
    }

    /// Receiver for events; use `blocking_recv` to wait on it.
    pub fn events(&self) -> broadcast::Receiver<TvEvent> {
        self.inner.events()
    }

    /// Stops watching events.
    pub fn stop_events(&self) {
        self.block_on(self.inner.stop_events())
    }

    /// Drops the session and event subscription.
    pub fn disconnect(&self) {
        self.block_on(self.inner.disconnect())
    }
}

/// Blocking [`discover`](crate::discovery::discover).
pub fn discover(wait: Duration) -> Result<Vec<DiscoveredTelevision>, Error> {
    runtime()?.block_on(discovery::discover(wait))
}
