//! SSDP discovery of Viera televisions.
//!
//! An `M-SEARCH` for the network-control service is multicast to
//! 239.255.255.250:1900 and unicast replies are collected until the
//! timeout. Each distinct `(host, id)` is liveness-probed with a short TCP
//! connect, then enriched with its [`DeviceSpecs`] and, when the set is
//! unencrypted and powered on, its application list. Enrichment is best
//! effort: failures are logged and the television is still reported.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), viera_core::Error> {
//!     for tv in viera_core::discovery::discover(Duration::from_secs(3)).await? {
//!         println!("{} at {}:{}", tv.device.id, tv.device.host, tv.device.port);
//!     }
//!     Ok(())
//! }
//! ```

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::{
    net::{TcpStream, UdpSocket},
    sync::mpsc,
    task::{JoinHandle, JoinSet},
    time::timeout,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    DEFAULT_PORT,
    config::{ClientConfig, DeviceIdentity},
    device::Television,
    error::Error,
    response::{ApplicationEntry, DeviceSpecs},
};

/// SSDP multicast group and port.
pub const SSDP_ADDR: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(239, 255, 255, 250), 1900);

/// Search target for Viera remote-control services.
pub const SEARCH_TARGET: &str = "urn:panasonic-com:service:p00NetworkControl:1";

/// How long a candidate has to accept a TCP connection.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(1500);

static LOCATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^location:\s*(\S+)\s*$").expect("valid location pattern"));

static USN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?im)^usn:\s*(.*?)\s*$").expect("valid usn pattern"));

static UUID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)uuid:([0-9a-f]{8}-[0-9a-f-]+)").expect("valid uuid pattern"));

/// A television that answered the search.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Device UUID, or the description URL when no UUID was advertised.
    pub id: String,
    /// Host from the `LOCATION` URL.
    pub host: String,
    /// Port from the `LOCATION` URL.
    pub port: u16,
}

impl DiscoveredDevice {
    /// An open-mode identity for connecting to this device.
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.id.clone(), self.host.clone()).with_port(self.port)
    }
}

/// A discovered television with whatever details could be read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredTelevision {
    /// Where it was found.
    pub device: DiscoveredDevice,
    /// Device description, if it could be read.
    pub specs: Option<DeviceSpecs>,
    /// Installed applications; empty when encrypted, off, or unreadable.
    pub apps: Vec<ApplicationEntry>,
}

/// Aborts a running discovery.
///
/// Dropping the handle lets the run finish on its own.
#[derive(Debug)]
pub struct DiscoveryHandle {
    task: JoinHandle<()>,
}

impl DiscoveryHandle {
    /// Stops the search and any in-flight probes, releasing the socket.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Whether the run has completed or been aborted.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// The `M-SEARCH` datagram.
pub fn msearch_request() -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {SSDP_ADDR}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: 1\r\n\
         ST: {SEARCH_TARGET}\r\n\
         \r\n"
    )
}

/// Extracts the device from an SSDP reply.
pub fn parse_ssdp_response(text: &str) -> Option<DiscoveredDevice> {
    let location = LOCATION.captures(text)?[1].to_string();
    let url = Url::parse(&location).ok()?;
    let host = url.host_str()?.to_string();
    let port = url.port_or_known_default().unwrap_or(DEFAULT_PORT);

    let id = USN
        .captures(text)
        .and_then(|usn| UUID.captures(&usn[1]).map(|c| c[1].to_string()))
        .or_else(|| UUID.captures(&location).map(|c| c[1].to_string()))
        .unwrap_or(location);

    Some(DiscoveredDevice { id, host, port })
}

/// Parses a reply and returns it only the first time its `(host, id)` is seen.
fn accept_response(
    seen: &mut HashSet<(String, String)>,
    text: &str,
) -> Option<DiscoveredDevice> {
    let device = parse_ssdp_response(text)?;
    seen.insert((device.host.clone(), device.id.clone()))
        .then_some(device)
}

/// Whether `host:port` accepts a TCP connection within `wait`.
pub async fn probe(host: &str, port: u16, wait: Duration) -> bool {
    matches!(
        timeout(wait, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

fn ssdp_socket() -> Result<UdpSocket, Error> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)).into())?;
    socket.set_multicast_ttl_v4(2)?;
    socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(socket.into())?)
}

/// Discovers televisions until `wait` elapses and returns them all.
pub async fn discover(wait: Duration) -> Result<Vec<DiscoveredTelevision>, Error> {
    let (mut rx, _handle) = discover_stream(wait).await?;
    let mut found = Vec::new();
    while let Some(tv) = rx.recv().await {
        found.push(tv);
    }
    info!(count = found.len(), "Discovery finished");
    Ok(found)
}

/// Starts discovery and streams televisions as they are enriched.
///
/// The channel closes once the search window has elapsed and every probe
/// has finished, or when the handle is aborted.
pub async fn discover_stream(
    wait: Duration,
) -> Result<(mpsc::Receiver<DiscoveredTelevision>, DiscoveryHandle), Error> {
    discover_stream_with_config(wait, ClientConfig::default()).await
}

/// [`discover_stream`] with explicit timeouts for enrichment.
pub async fn discover_stream_with_config(
    wait: Duration,
    config: ClientConfig,
) -> Result<(mpsc::Receiver<DiscoveredTelevision>, DiscoveryHandle), Error> {
    let socket = ssdp_socket()?;
    let query = msearch_request();
    debug!(target = %SSDP_ADDR, "Sending M-SEARCH");
    socket.send_to(query.as_bytes(), SocketAddr::V4(SSDP_ADDR)).await?;

    let (tx, rx) = mpsc::channel(16);
    let task = tokio::spawn(run_discovery(socket, wait, config, tx));
    Ok((rx, DiscoveryHandle { task }))
}

async fn run_discovery(
    socket: UdpSocket,
    wait: Duration,
    config: ClientConfig,
    tx: mpsc::Sender<DiscoveredTelevision>,
) {
    let mut seen = HashSet::new();
    let mut probes = JoinSet::new();
    let mut buf = [0u8; 2048];
    let deadline = tokio::time::Instant::now() + wait;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            debug!("Discovery timeout reached");
            break;
        }

        match timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok((n, addr))) => {
                let text = String::from_utf8_lossy(&buf[..n]);
                let Some(device) = accept_response(&mut seen, &text) else {
                    continue;
                };
                debug!(%addr, id = %device.id, host = %device.host, "SSDP reply");
                probes.spawn(probe_and_enrich(device, config.clone(), tx.clone()));
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Error receiving SSDP reply");
                break;
            }
            Err(_) => continue,
        }
    }
    drop(socket);

    while probes.join_next().await.is_some() {}
}

async fn probe_and_enrich(
    device: DiscoveredDevice,
    config: ClientConfig,
    tx: mpsc::Sender<DiscoveredTelevision>,
) {
    if !probe(&device.host, device.port, PROBE_TIMEOUT).await {
        debug!(host = %device.host, port = device.port, "Dropping unreachable device");
        return;
    }
    let tv = enrich(device, config).await;
    // Receiver gone means the caller lost interest.
    let _ = tx.send(tv).await;
}

async fn enrich(device: DiscoveredDevice, config: ClientConfig) -> DiscoveredTelevision {
    let event_timeout = config.event_timeout;
    let mut result = DiscoveredTelevision {
        device,
        specs: None,
        apps: Vec::new(),
    };

    let tv = match Television::connect(result.device.identity(), config).await {
        Ok(tv) => tv,
        Err(e) => {
            warn!(host = %result.device.host, error = %e, "Could not connect to discovered device");
            return result;
        }
    };

    match tv.specs().await {
        Ok(specs) => result.specs = Some(specs),
        Err(e) => {
            warn!(host = %result.device.host, error = %e, "Could not read device specs");
            return result;
        }
    }

    let encrypted = result.specs.as_ref().is_some_and(|s| s.requires_encryption);
    if !encrypted && tv.is_on(event_timeout).await {
        match tv.apps().await {
            Ok(apps) => result.apps = apps,
            Err(e) => warn!(host = %result.device.host, error = %e, "Could not list applications"),
        }
    }
    result
}
