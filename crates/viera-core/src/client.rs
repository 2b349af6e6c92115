//! SOAP protocol client.
//!
//! [`ProtocolClient`] turns `(path, service, action, arguments)` into an
//! HTTP POST, wrapping the action in the encrypted envelope when a session
//! is installed, and hands back the response XML with namespace prefixes
//! stripped. It also owns the PIN pairing exchange.
//!
//! All protected requests against one television go through a single
//! [`tokio::sync::Mutex`] held for the whole request, so sequence numbers
//! reach the television in order.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::{
    credentials::PairingCredentials,
    error::Error,
    response::DeviceSpecs,
    session::{PairingChallenge, PairingState, Session, SessionState},
    soap::{self, NRC_CONTROL_PATH, NRC_URN},
    transport::{HttpRequest, HttpResponse, Transport},
};

/// Requests a session id.
pub const ACTION_GET_SESSION_ID: &str = "X_GetEncryptSessionId";
/// Asks the television to show a PIN.
pub const ACTION_DISPLAY_PIN: &str = "X_DisplayPinCode";
/// Sends the PIN back.
pub const ACTION_REQUEST_AUTH: &str = "X_RequestAuth";
/// Carries an encrypted action.
pub const ACTION_ENCRYPTED: &str = "X_EncryptedCommand";

/// Actions that are never wrapped, even when a session exists.
const HANDSHAKE_ACTIONS: [&str; 3] = [ACTION_GET_SESSION_ID, ACTION_DISPLAY_PIN, ACTION_REQUEST_AUTH];

struct Pairing {
    state: PairingState,
    challenge: Option<PairingChallenge>,
}

/// Issues SOAP actions to one television.
pub struct ProtocolClient {
    transport: Arc<dyn Transport>,
    session: Mutex<Option<Session>>,
    pairing: Mutex<Pairing>,
}

impl ProtocolClient {
    /// Creates an open-mode client.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            session: Mutex::new(None),
            pairing: Mutex::new(Pairing {
                state: PairingState::Unpaired,
                challenge: None,
            }),
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Installs a session derived from `credentials` and acquires a session id.
    pub async fn start_session(&self, credentials: &PairingCredentials) -> Result<(), Error> {
        let mut session = Session::new(credentials)?;
        self.acquire_session_id(&mut session).await?;
        *self.session.lock().await = Some(session);
        Ok(())
    }

    /// Requests a fresh session id for the installed session.
    pub async fn request_session_id(&self) -> Result<(), Error> {
        let mut guard = self.session.lock().await;
        let session = guard
            .as_mut()
            .ok_or_else(|| Error::InvalidState("no pairing key installed".into()))?;
        if session.state() == SessionState::Disconnected {
            return Err(Error::InvalidState("session has been disconnected".into()));
        }
        self.acquire_session_id(session).await
    }

    /// Whether protected commands are currently encrypted.
    pub async fn is_encrypted(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Current session state, `None` in open mode.
    pub async fn session_state(&self) -> Option<SessionState> {
        self.session.lock().await.as_ref().map(Session::state)
    }

    /// Discards session keys. Later protected calls fail with
    /// [`Error::InvalidState`].
    pub async fn disconnect(&self) {
        if let Some(session) = self.session.lock().await.as_mut() {
            session.disconnect();
        }
    }

    /// Invokes a SOAP action and returns the response XML.
    ///
    /// With `protected` set and a session installed, the action is sent as
    /// an `X_EncryptedCommand` and the decrypted inner XML is returned. A
    /// non-2xx reply to an encrypted command triggers one session id
    /// refresh and one retry.
    pub async fn invoke(
        &self,
        path: &str,
        urn: &str,
        action: &str,
        args: &str,
        protected: bool,
    ) -> Result<String, Error> {
        if protected && !HANDSHAKE_ACTIONS.contains(&action) {
            let mut guard = self.session.lock().await;
            if let Some(session) = guard.as_mut() {
                return self.invoke_encrypted(session, urn, action, args).await;
            }
        }
        self.invoke_plain(path, urn, action, args).await
    }

    async fn invoke_plain(
        &self,
        path: &str,
        urn: &str,
        action: &str,
        args: &str,
    ) -> Result<String, Error> {
        let (request, response) = self.post(path, urn, action, args).await?;
        check_response(&request, &response)?;
        Ok(soap::strip_namespaces(&response.text()).into_owned())
    }

    async fn invoke_encrypted(
        &self,
        session: &mut Session,
        urn: &str,
        action: &str,
        args: &str,
    ) -> Result<String, Error> {
        if session.state() == SessionState::Disconnected {
            return Err(Error::InvalidState("session has been disconnected".into()));
        }
        if !session.is_usable() {
            self.acquire_session_id(session).await?;
        }

        let wrapped = session.wrap_command(urn, action, args)?;
        let (request, response) = self
            .post(NRC_CONTROL_PATH, NRC_URN, ACTION_ENCRYPTED, &wrapped)
            .await?;

        let (request, response) = if response.is_success() {
            (request, response)
        } else {
            debug!(
                action,
                status = response.status,
                "Encrypted command rejected, refreshing session id"
            );
            session.expire();
            self.acquire_session_id(session).await?;

            let wrapped = session.wrap_command(urn, action, args)?;
            let (request, retry) = self
                .post(NRC_CONTROL_PATH, NRC_URN, ACTION_ENCRYPTED, &wrapped)
                .await?;
            check_response(&request, &retry)?;
            (request, retry)
        };

        let sealed = required_element(&request, &response, &response.text(), "X_EncResult")?;
        let inner = session.open(&sealed)?;
        Ok(soap::strip_namespaces(&inner).into_owned())
    }

    async fn acquire_session_id(&self, session: &mut Session) -> Result<(), Error> {
        let args = session.session_id_request()?;
        let (request, response) = self
            .post(NRC_CONTROL_PATH, NRC_URN, ACTION_GET_SESSION_ID, &args)
            .await?;
        check_response(&request, &response)?;

        let sealed = required_element(&request, &response, &response.text(), "X_EncResult")?;
        let inner = session.open(&sealed)?;
        let session_id = required_element(&request, &response, &inner, "X_SessionId")?;
        session.assign_session_id(session_id);
        Ok(())
    }

    async fn post(
        &self,
        path: &str,
        urn: &str,
        action: &str,
        args: &str,
    ) -> Result<(HttpRequest, HttpResponse), Error> {
        debug!(
            host = self.transport.host(),
            path,
            action,
            "Invoking SOAP action"
        );
        let body = soap::envelope(&soap::action_xml(urn, action, args));
        let request = HttpRequest::post(path, body)
            .with_header("Content-Type", "text/xml; charset=\"utf-8\"")
            .with_header("SOAPACTION", soap::soap_action_header(urn, action))
            .with_header("Cache-Control", "no-cache")
            .with_header("Pragma", "no-cache")
            .with_header("Accept", "text/xml");
        let response = self.transport.request(request.clone()).await?;
        Ok((request, response))
    }

    /// Fetches a document with GET and returns its body.
    pub async fn fetch(&self, path: &str) -> Result<String, Error> {
        let request = HttpRequest::get(path);
        let response = self.transport.request(request.clone()).await?;
        check_response(&request, &response)?;
        Ok(response.text())
    }

    /// Whether the television advertises `X_GetEncryptSessionId`.
    pub async fn requires_encryption(&self) -> Result<bool, Error> {
        let sdd = self.fetch(soap::SERVICE_DESCRIPTION_PATH).await?;
        Ok(sdd.contains(ACTION_GET_SESSION_ID))
    }

    /// Reads the device description.
    pub async fn device_specs(&self) -> Result<DeviceSpecs, Error> {
        let requires_encryption = self.requires_encryption().await?;
        let request = HttpRequest::get(soap::DEVICE_DESCRIPTION_PATH);
        let response = self.transport.request(request.clone()).await?;
        check_response(&request, &response)?;
        let text = response.text();
        DeviceSpecs::from_description(&text, requires_encryption).map_err(|e| {
            Error::invalid_response(
                format!("response not valid: {e}"),
                request.summary(),
                response.status,
                text.clone(),
            )
        })
    }

    /// Asks the television to display a PIN and returns the challenge key.
    pub async fn request_pin_code(&self, device_name: &str) -> Result<String, Error> {
        let mut pairing = self.pairing.lock().await;
        let challenge = self.fetch_challenge(device_name).await;
        match challenge {
            Ok(challenge) => {
                let key = challenge.challenge_key().to_string();
                pairing.challenge = Some(challenge);
                pairing.state = PairingState::ChallengeRequested;
                Ok(key)
            }
            Err(e) => {
                pairing.challenge = None;
                pairing.state = PairingState::Failed;
                Err(e)
            }
        }
    }

    async fn fetch_challenge(&self, device_name: &str) -> Result<PairingChallenge, Error> {
        let args = PairingChallenge::display_pin_request(device_name);
        let (request, response) = self
            .post(NRC_CONTROL_PATH, NRC_URN, ACTION_DISPLAY_PIN, &args)
            .await?;
        check_response(&request, &response)?;
        let text = response.text();
        PairingChallenge::from_response(&text).map_err(|e| {
            Error::invalid_response(
                format!("response not valid: {e}"),
                request.summary(),
                response.status,
                text.clone(),
            )
        })
    }

    /// Sends `pin` for the outstanding challenge and returns the pairing
    /// credentials.
    ///
    /// The challenge is consumed by every attempt. When the television's
    /// reply fails to decrypt (usually a wrong PIN), a fresh challenge is
    /// requested with `device_name` before the error is returned, so the
    /// caller can retry with the newly displayed PIN.
    pub async fn authorize_pin_code(
        &self,
        pin: &str,
        device_name: &str,
    ) -> Result<PairingCredentials, Error> {
        let mut pairing = self.pairing.lock().await;
        let challenge = pairing.challenge.take().ok_or_else(|| {
            Error::InvalidState("no PIN challenge outstanding; request a PIN first".into())
        })?;
        pairing.state = PairingState::AuthRequested;

        let result = self.send_auth(&challenge, pin).await;
        match result {
            Ok(credentials) => {
                pairing.state = PairingState::Authorized;
                Ok(credentials)
            }
            Err(e) => {
                pairing.state = PairingState::Failed;
                if e.is_decrypt() {
                    debug!("Authorization failed to decrypt, requesting a new challenge");
                    match self.fetch_challenge(device_name).await {
                        Ok(fresh) => {
                            pairing.challenge = Some(fresh);
                            pairing.state = PairingState::ChallengeRequested;
                        }
                        Err(err) => warn!(error = %err, "Could not request a new PIN challenge"),
                    }
                }
                Err(e)
            }
        }
    }

    async fn send_auth(
        &self,
        challenge: &PairingChallenge,
        pin: &str,
    ) -> Result<PairingCredentials, Error> {
        let args = challenge.auth_request(pin)?;
        let (request, response) = self
            .post(NRC_CONTROL_PATH, NRC_URN, ACTION_REQUEST_AUTH, &args)
            .await?;
        check_response(&request, &response)?;

        let sealed = required_element(&request, &response, &response.text(), "X_AuthResult")?;
        let inner = challenge.open(&sealed)?;
        let app_id = required_element(&request, &response, &inner, "X_ApplicationId")?;
        let encryption_key = required_element(&request, &response, &inner, "X_Keyword")?;
        Ok(PairingCredentials::new(app_id, encryption_key))
    }

    /// Current pairing state.
    pub async fn pairing_state(&self) -> PairingState {
        self.pairing.lock().await.state
    }
}

impl std::fmt::Debug for ProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("transport", &self.transport)
            .field("session", &"[REDACTED]")
            .finish()
    }
}

/// Text of element `name` in `xml`, or [`Error::ApiCall`] naming the missing
/// element. `xml` may be the response body or the plaintext opened from it.
fn required_element(
    request: &HttpRequest,
    response: &HttpResponse,
    xml: &str,
    name: &str,
) -> Result<String, Error> {
    soap::element_text(&soap::strip_namespaces(xml), name)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or_else(|| {
            Error::invalid_response(
                format!("response not valid: missing {name}"),
                request.summary(),
                response.status,
                response.text(),
            )
        })
}

/// Turns a non-2xx response into [`Error::ApiCall`], surfacing any UPnP fault.
fn check_response(request: &HttpRequest, response: &HttpResponse) -> Result<(), Error> {
    if response.is_success() {
        return Ok(());
    }
    let body = response.text();
    let message = match soap::parse_fault(&body) {
        Some(fault) => format!("response not valid: {fault}"),
        None => format!("response not valid: HTTP {}", response.status),
    };
    Err(Error::invalid_response(
        message,
        request.summary(),
        response.status,
        body,
    ))
}
