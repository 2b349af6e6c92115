//! UPnP GENA event subscription.
//!
//! The television pushes state changes (screen on/off, input mode) by
//! making HTTP `NOTIFY` requests to a callback URL registered with
//! `SUBSCRIBE`. [`EventSubscriber`] runs that callback server on an
//! ephemeral port and republishes each notification as a [`TvEvent`] on a
//! broadcast channel.
//!
//! Leases last 10 seconds. Callers either [`renew`](EventSubscriber::renew)
//! themselves or use [`subscribe_with_renewal`](EventSubscriber::subscribe_with_renewal).

use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, UdpSocket},
    sync::{Mutex, broadcast},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, trace, warn};

use crate::{
    error::Error,
    response::TvEvent,
    soap::NRC_EVENT_PATH,
    transport::{
        HttpRequest, Transport,
        http::{decode_chunked, find_header_end, header, is_chunked, parse_headers},
    },
};

/// Requested lease length.
pub const SUBSCRIPTION_TIMEOUT: &str = "Second-10";

/// Renewal period used by [`EventSubscriber::subscribe_with_renewal`] callers.
pub const RENEWAL_INTERVAL: Duration = Duration::from_secs(8);

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// How long an inbound NOTIFY may take to arrive in full.
const NOTIFY_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest NOTIFY request accepted, headers included.
const MAX_NOTIFY_BYTES: usize = 64 * 1024;

const NOTIFY_REPLY: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

struct Subscription {
    sid: String,
    callback: SocketAddr,
    listener: JoinHandle<()>,
    renewal: Option<JoinHandle<()>>,
}

impl Subscription {
    fn close(self) {
        if let Some(renewal) = self.renewal {
            renewal.abort();
        }
        self.listener.abort();
    }
}

/// Subscribes to television events and republishes them.
pub struct EventSubscriber {
    transport: Arc<dyn Transport>,
    sender: broadcast::Sender<TvEvent>,
    subscription: Mutex<Option<Subscription>>,
}

impl EventSubscriber {
    /// Creates an idle subscriber.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            transport,
            sender,
            subscription: Mutex::new(None),
        }
    }

    /// Returns a receiver for events published from now on.
    pub fn events(&self) -> broadcast::Receiver<TvEvent> {
        self.sender.subscribe()
    }

    /// Whether a subscription is active.
    pub async fn is_subscribed(&self) -> bool {
        self.subscription.lock().await.is_some()
    }

    /// Callback address registered with the television.
    pub async fn callback_addr(&self) -> Option<SocketAddr> {
        self.subscription.lock().await.as_ref().map(|s| s.callback)
    }

    /// Starts the callback listener and subscribes.
    ///
    /// Failure is not fatal: a warning is logged, the listener is closed,
    /// and `false` is returned so the caller can fall back to polling.
    /// Returns `true` immediately if already subscribed.
    pub async fn subscribe(&self) -> bool {
        let mut guard = self.subscription.lock().await;
        if guard.is_some() {
            return true;
        }
        match self.open_subscription().await {
            Ok(subscription) => {
                debug!(
                    host = self.transport.host(),
                    callback = %subscription.callback,
                    "Subscribed to events"
                );
                *guard = Some(subscription);
                true
            }
            Err(e) => {
                warn!(host = self.transport.host(), error = %e, "Event subscription failed");
                false
            }
        }
    }

    /// Subscribes and keeps the lease alive every `interval` until
    /// [`unsubscribe`](Self::unsubscribe).
    pub async fn subscribe_with_renewal(self: &Arc<Self>, interval: Duration) -> bool {
        if !self.subscribe().await {
            return false;
        }
        let mut guard = self.subscription.lock().await;
        if let Some(subscription) = guard.as_mut() {
            if subscription.renewal.is_none() {
                subscription.renewal = Some(spawn_renewal(Arc::downgrade(self), interval));
            }
        }
        true
    }

    async fn open_subscription(&self) -> Result<Subscription, Error> {
        let local_ip = local_ip_towards(self.transport.host(), self.transport.port()).await?;
        let listener = TcpListener::bind((IpAddr::from([0, 0, 0, 0]), 0)).await?;
        let callback = SocketAddr::new(local_ip, listener.local_addr()?.port());
        let task = tokio::spawn(serve_notifications(listener, self.sender.clone()));

        let request = HttpRequest::new("SUBSCRIBE", NRC_EVENT_PATH)
            .with_header("CALLBACK", format!("<http://{callback}>"))
            .with_header("NT", "upnp:event")
            .with_header("TIMEOUT", SUBSCRIPTION_TIMEOUT);

        let result = self.send_subscribe(request).await;
        match result {
            Ok(sid) => Ok(Subscription {
                sid,
                callback,
                listener: task,
                renewal: None,
            }),
            Err(e) => {
                task.abort();
                Err(e)
            }
        }
    }

    async fn send_subscribe(&self, request: HttpRequest) -> Result<String, Error> {
        let summary = request.summary();
        let response = self.transport.request(request).await?;
        let sid = response
            .header("SID")
            .map(str::to_string)
            .filter(|_| response.is_success());
        sid.ok_or_else(|| {
            Error::invalid_response(
                "response not valid: subscription refused",
                summary,
                response.status,
                response.text(),
            )
        })
    }

    /// Extends the current lease.
    ///
    /// The subscription lock is not held while the request is in flight.
    pub async fn renew(&self) -> Result<(), Error> {
        let sid = self
            .subscription
            .lock()
            .await
            .as_ref()
            .map(|s| s.sid.clone())
            .ok_or_else(|| Error::InvalidState("not subscribed to events".into()))?;

        let request = HttpRequest::new("SUBSCRIBE", NRC_EVENT_PATH)
            .with_header("SID", sid.clone())
            .with_header("TIMEOUT", SUBSCRIPTION_TIMEOUT);
        let renewed = self.send_subscribe(request).await?;

        let mut guard = self.subscription.lock().await;
        match guard.as_mut() {
            Some(subscription) if subscription.sid == sid => {
                trace!(host = self.transport.host(), "Renewed event subscription");
                subscription.sid = renewed;
            }
            _ => debug!("Subscription replaced during renewal"),
        }
        Ok(())
    }

    /// Replaces a lapsed subscription with a fresh one on a new callback.
    ///
    /// Only called from the renewal task, whose handle moves to the new
    /// subscription. Returns `false` and leaves the subscriber idle when
    /// the television refuses.
    async fn resubscribe(&self) -> bool {
        let mut guard = self.subscription.lock().await;
        let Some(lapsed) = guard.take() else {
            return false;
        };
        let renewal = lapsed.renewal;
        lapsed.listener.abort();

        match self.open_subscription().await {
            Ok(mut subscription) => {
                debug!(
                    host = self.transport.host(),
                    callback = %subscription.callback,
                    "Subscribed to events again"
                );
                subscription.renewal = renewal;
                *guard = Some(subscription);
                true
            }
            Err(e) => {
                warn!(host = self.transport.host(), error = %e, "Event subscription lost");
                false
            }
        }
    }

    /// Closes the listener and cancels the subscription.
    ///
    /// The listener is closed before `UNSUBSCRIBE` is sent, so it is gone
    /// even if that request fails, times out, or is cancelled.
    pub async fn unsubscribe(&self) {
        let Some(subscription) = self.subscription.lock().await.take() else {
            return;
        };

        let sid = subscription.sid.clone();
        subscription.close();

        let request = HttpRequest::new("UNSUBSCRIBE", NRC_EVENT_PATH).with_header("SID", sid);
        match self.transport.request(request).await {
            Ok(response) if response.is_success() => {
                debug!(host = self.transport.host(), "Unsubscribed from events");
            }
            Ok(response) => {
                debug!(status = response.status, "Unsubscribe rejected");
            }
            Err(e) => debug!(error = %e, "Unsubscribe failed"),
        }
    }
}

impl Drop for EventSubscriber {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.get_mut().take() {
            subscription.close();
        }
    }
}

impl std::fmt::Debug for EventSubscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSubscriber")
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

fn spawn_renewal(subscriber: Weak<EventSubscriber>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let Some(subscriber) = subscriber.upgrade() else {
                return;
            };
            if let Err(e) = subscriber.renew().await {
                warn!(host = subscriber.transport.host(), error = %e, "Event renewal failed");
                if !subscriber.resubscribe().await {
                    return;
                }
            }
        }
    })
}

/// Local interface address that routes to `host`.
async fn local_ip_towards(host: &str, port: u16) -> Result<IpAddr, Error> {
    let socket = UdpSocket::bind((IpAddr::from([0, 0, 0, 0]), 0)).await?;
    socket.connect(format!("{host}:{port}")).await?;
    Ok(socket.local_addr()?.ip())
}

async fn serve_notifications(listener: TcpListener, sender: broadcast::Sender<TvEvent>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let sender = sender.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_notification(stream, &sender).await {
                        debug!(%peer, error = %e, "Bad event notification");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "Event listener accept failed");
                return;
            }
        }
    }
}

async fn handle_notification(
    mut stream: TcpStream,
    sender: &broadcast::Sender<TvEvent>,
) -> Result<(), Error> {
    let body = timeout(NOTIFY_READ_TIMEOUT, read_request(&mut stream))
        .await
        .map_err(|_| Error::Timeout("reading event notification".into()))??;

    if let Some(event) = TvEvent::from_notification(&String::from_utf8_lossy(&body)) {
        debug!(?event, "Received event");
        // No receivers is fine.
        let _ = sender.send(event);
    }

    stream.write_all(NOTIFY_REPLY).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Reads one request and returns its body.
async fn read_request(stream: &mut TcpStream) -> Result<Vec<u8>, Error> {
    let mut data = Vec::with_capacity(1024);
    let mut buf = [0u8; 2048];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            let body = find_header_end(&data).map(|end| data[end + 4..].to_vec());
            return Ok(body.unwrap_or_default());
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_NOTIFY_BYTES {
            return Err(Error::Io(format!(
                "event notification exceeds {MAX_NOTIFY_BYTES} bytes"
            )));
        }

        if let Some(body) = complete_body(&data) {
            return Ok(body);
        }
    }
}

/// The body of `data` once the request is complete.
fn complete_body(data: &[u8]) -> Option<Vec<u8>> {
    let end = find_header_end(data)?;
    let headers = parse_headers(&String::from_utf8_lossy(&data[..end]));
    let body = &data[end + 4..];
    if is_chunked(&headers) {
        return decode_chunked(body);
    }
    let expected = header(&headers, "content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    (body.len() >= expected).then(|| body[..expected].to_vec())
}
