//! Session and pairing state for encrypted televisions.
//!
//! A [`Session`] holds the working keys derived from a pairing key, the
//! session id the television hands out, and the per-session sequence
//! counter. A [`PairingChallenge`] holds the one-shot keys derived from the
//! challenge shown alongside the on-screen PIN.
//!
//! Both types are pure state machines: they build and consume XML argument
//! strings but never touch the network.

use quick_xml::escape::escape;
use tracing::debug;

use crate::{
    credentials::PairingCredentials,
    crypto::keys::{self, SessionKeys},
    error::Error,
    soap::{self, element_text},
};

/// Highest sequence number that still renders as eight digits.
const MAX_SEQUENCE: u32 = 99_999_999;

/// Lifecycle of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Keys derived, no session id yet.
    SessionDerived,
    /// Session id assigned; protected commands can be sent.
    SessionIdAssigned,
    /// Keys discarded. Terminal.
    Disconnected,
}

/// Encrypted-command context for one television.
pub struct Session {
    app_id: String,
    keys: Option<SessionKeys>,
    session_id: Option<String>,
    sequence_number: u32,
    state: SessionState,
}

impl Session {
    /// Derives session keys from paired credentials.
    ///
    /// Fails with [`Error::InvalidArgument`] if the key is not 16 bytes of
    /// base64.
    pub fn new(credentials: &PairingCredentials) -> Result<Self, Error> {
        let iv = keys::decode_iv(credentials.expose_encryption_key())?;
        Ok(Self {
            app_id: credentials.app_id.clone(),
            keys: Some(keys::derive_session_keys(&iv)),
            session_id: None,
            sequence_number: 0,
            state: SessionState::SessionDerived,
        })
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Paired application id.
    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// Whether protected commands can be wrapped right now.
    pub fn is_usable(&self) -> bool {
        self.state == SessionState::SessionIdAssigned
            && self.keys.is_some()
            && self.session_id.is_some()
    }

    /// Last sequence number issued.
    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    fn keys(&self) -> Result<&SessionKeys, Error> {
        self.keys
            .as_ref()
            .ok_or_else(|| Error::InvalidState("session has been disconnected".into()))
    }

    /// Arguments for `X_GetEncryptSessionId`.
    pub fn session_id_request(&self) -> Result<String, Error> {
        let app_id = escape(self.app_id.as_str());
        let enc_info = self
            .keys()?
            .seal(&format!("<X_ApplicationId>{app_id}</X_ApplicationId>"))?;
        Ok(format!(
            "<X_ApplicationId>{app_id}</X_ApplicationId><X_EncInfo>{enc_info}</X_EncInfo>"
        ))
    }

    /// Stores the session id handed out by `X_GetEncryptSessionId`.
    ///
    /// The sequence counter restarts so the next protected command carries
    /// number 1.
    pub fn assign_session_id(&mut self, session_id: impl Into<String>) {
        debug!(app_id = %self.app_id, "session id assigned");
        self.session_id = Some(session_id.into());
        self.sequence_number = 0;
        self.state = SessionState::SessionIdAssigned;
    }

    /// Bumps and returns the sequence number.
    pub fn next_sequence(&mut self) -> u32 {
        self.sequence_number = if self.sequence_number >= MAX_SEQUENCE {
            1
        } else {
            self.sequence_number + 1
        };
        self.sequence_number
    }

    /// Wraps an action in an `X_EncryptedCommand` argument block.
    ///
    /// The sequence number is incremented before the payload is built.
    pub fn wrap_command(&mut self, urn: &str, action: &str, args: &str) -> Result<String, Error> {
        if !self.is_usable() {
            return Err(Error::InvalidState(
                "no session id has been assigned".into(),
            ));
        }
        let sequence = self.next_sequence();
        let session_id = self.session_id.as_deref().unwrap_or_default();
        let payload = format!(
            "<X_SessionId>{session_id}</X_SessionId>\
             <X_SequenceNumber>{sequence:08}</X_SequenceNumber>\
             <X_OriginalCommand>{}</X_OriginalCommand>",
            soap::action_xml(urn, action, args)
        );
        let enc_info = self.keys()?.seal(&payload)?;
        Ok(format!(
            "<X_ApplicationId>{}</X_ApplicationId><X_EncInfo>{enc_info}</X_EncInfo>",
            escape(self.app_id.as_str())
        ))
    }

    /// Opens a sealed `X_EncResult` value.
    ///
    /// Fails with [`Error::Decrypt`] on a bad signature or cipher text.
    pub fn open(&self, sealed: &str) -> Result<String, Error> {
        self.keys()?.open(sealed.trim())
    }

    /// Forgets the session id so the next protected request re-acquires one.
    pub fn expire(&mut self) {
        if self.state == SessionState::SessionIdAssigned {
            self.session_id = None;
            self.state = SessionState::SessionDerived;
        }
    }

    /// Discards the keys. No protected command can be sent afterwards.
    pub fn disconnect(&mut self) {
        self.keys = None;
        self.session_id = None;
        self.state = SessionState::Disconnected;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("app_id", &self.app_id)
            .field("keys", &"[REDACTED]")
            .field("session_id", &self.session_id.as_ref().map(|_| "[REDACTED]"))
            .field("sequence_number", &self.sequence_number)
            .field("state", &self.state)
            .finish()
    }
}

/// Pairing progress for one television.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairingState {
    /// No challenge outstanding.
    #[default]
    Unpaired,
    /// The television is showing a PIN.
    ChallengeRequested,
    /// The PIN has been sent.
    AuthRequested,
    /// Credentials were obtained.
    Authorized,
    /// The last attempt failed.
    Failed,
}

/// Challenge returned by `X_DisplayPinCode`.
pub struct PairingChallenge {
    challenge_key: String,
    keys: SessionKeys,
}

impl PairingChallenge {
    /// Arguments for `X_DisplayPinCode`.
    pub fn display_pin_request(device_name: &str) -> String {
        format!(
            "<X_DeviceName>{}</X_DeviceName>",
            escape(device_name)
        )
    }

    /// Reads `X_ChallengeKey` from a `X_DisplayPinCode` response.
    pub fn from_response(response_xml: &str) -> Result<Self, String> {
        let key = element_text(&soap::strip_namespaces(response_xml), "X_ChallengeKey")
            .ok_or_else(|| "response has no X_ChallengeKey".to_string())?;
        Self::new(key.trim()).map_err(|e| e.to_string())
    }

    /// Derives the one-shot keys for a base64 challenge.
    pub fn new(challenge_key: &str) -> Result<Self, Error> {
        let iv = keys::decode_iv(challenge_key)?;
        Ok(Self {
            challenge_key: challenge_key.to_string(),
            keys: keys::derive_challenge_keys(&iv),
        })
    }

    /// The base64 challenge as sent by the television.
    pub fn challenge_key(&self) -> &str {
        &self.challenge_key
    }

    /// Arguments for `X_RequestAuth` carrying the sealed PIN.
    pub fn auth_request(&self, pin: &str) -> Result<String, Error> {
        let pin = pin.trim();
        if pin.is_empty() || !pin.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::InvalidArgument(format!(
                "PIN must be digits, got {pin:?}"
            )));
        }
        let auth_info = self.keys.seal(&format!("<X_PinCode>{pin}</X_PinCode>"))?;
        Ok(format!("<X_AuthInfo>{auth_info}</X_AuthInfo>"))
    }

    /// Opens a sealed `X_AuthResult` value.
    ///
    /// A wrong PIN surfaces as [`Error::Decrypt`].
    pub fn open(&self, sealed: &str) -> Result<String, Error> {
        self.keys.open(sealed.trim())
    }
}

impl std::fmt::Debug for PairingChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingChallenge")
            .field("challenge_key", &self.challenge_key)
            .field("keys", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const PAIRING_KEY: &str = "vdj1PiHp9lJ3OhhzSbqNRw==";

    /// Builds the `X_GetEncryptSessionId` response a television would send.
    pub(crate) fn session_id_response(session_id: &str) -> String {
        let keys = keys::derive_session_keys(&keys::decode_iv(PAIRING_KEY).unwrap());
        let enc = keys
            .seal(&format!("<X_ApplicationId>app</X_ApplicationId><X_SessionId>{session_id}</X_SessionId>"))
            .unwrap();
        soap::envelope(&format!(
            "<u:X_GetEncryptSessionIdResponse xmlns:u=\"urn:{}\"><X_ApplicationId>app</X_ApplicationId><X_EncResult>{enc}</X_EncResult></u:X_GetEncryptSessionIdResponse>",
            soap::NRC_URN
        ))
    }

    fn ready_session() -> Session {
        let mut session = Session::new(&PairingCredentials::new("app", PAIRING_KEY)).unwrap();
        session.assign_session_id("777");
        session
    }

    fn unwrap_payload(session: &Session, wrapped: &str) -> String {
        let enc = element_text(wrapped, "X_EncInfo").unwrap();
        session.keys().unwrap().open(&enc).unwrap()
    }

    #[test]
    fn test_new_session_is_derived() {
        let session = Session::new(&PairingCredentials::new("app", PAIRING_KEY)).unwrap();
        assert_eq!(session.state(), SessionState::SessionDerived);
        assert!(!session.is_usable());
    }

    #[test]
    fn test_bad_pairing_key_is_invalid_argument() {
        let err = Session::new(&PairingCredentials::new("app", "c2hvcnQ=")).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_session_id_request_is_sealed() {
        let session = Session::new(&PairingCredentials::new("app", PAIRING_KEY)).unwrap();
        let args = session.session_id_request().unwrap();
        assert!(args.starts_with("<X_ApplicationId>app</X_ApplicationId><X_EncInfo>"));
        assert_eq!(
            unwrap_payload(&session, &format!("<a>{args}</a>")),
            "<X_ApplicationId>app</X_ApplicationId>"
        );
    }

    #[test]
    fn test_assign_session_id() {
        let session = ready_session();
        assert!(session.is_usable());
        assert_eq!(session.state(), SessionState::SessionIdAssigned);
        assert_eq!(session.sequence_number(), 0);
    }

    #[test]
    fn test_sequence_numbers_are_monotonic_and_padded() {
        let mut session = ready_session();
        for expected in 1..=12u32 {
            let wrapped = session
                .wrap_command(soap::NRC_URN, "X_SendKey", "<X_KeyEvent>NRC_MUTE-ONOFF</X_KeyEvent>")
                .unwrap();
            let payload = unwrap_payload(&session, &format!("<a>{wrapped}</a>"));
            let seq = element_text(&format!("<a>{payload}</a>"), "X_SequenceNumber").unwrap();
            assert_eq!(seq.len(), 8);
            assert_eq!(seq, format!("{expected:08}"));
        }
    }

    #[test]
    fn test_new_session_id_restarts_sequence() {
        let mut session = ready_session();
        session.next_sequence();
        session.next_sequence();
        session.assign_session_id("778");
        assert_eq!(session.next_sequence(), 1);
    }

    #[test]
    fn test_sequence_wraps_within_eight_digits() {
        let mut session = ready_session();
        session.sequence_number = MAX_SEQUENCE;
        assert_eq!(session.next_sequence(), 1);
    }

    #[test]
    fn test_wrapped_payload_layout() {
        let mut session = ready_session();
        let wrapped = session
            .wrap_command(soap::RENDERING_URN, "GetVolume", "<InstanceID>0</InstanceID>")
            .unwrap();
        assert!(wrapped.starts_with("<X_ApplicationId>app</X_ApplicationId><X_EncInfo>"));
        let payload = unwrap_payload(&session, &format!("<a>{wrapped}</a>"));
        assert_eq!(
            payload,
            format!(
                "<X_SessionId>777</X_SessionId><X_SequenceNumber>00000001</X_SequenceNumber><X_OriginalCommand><u:GetVolume xmlns:u=\"urn:{}\"><InstanceID>0</InstanceID></u:GetVolume></X_OriginalCommand>",
                soap::RENDERING_URN
            )
        );
    }

    #[test]
    fn test_wrap_without_session_id_is_invalid_state() {
        let mut session = Session::new(&PairingCredentials::new("app", PAIRING_KEY)).unwrap();
        let err = session.wrap_command(soap::NRC_URN, "X_SendKey", "").unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_disconnect_discards_keys() {
        let mut session = ready_session();
        session.disconnect();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(matches!(
            session.wrap_command(soap::NRC_URN, "X_SendKey", ""),
            Err(Error::InvalidState(_))
        ));
        assert!(matches!(session.session_id_request(), Err(Error::InvalidState(_))));
    }

    #[test]
    fn test_expire_requires_new_session_id() {
        let mut session = ready_session();
        session.expire();
        assert_eq!(session.state(), SessionState::SessionDerived);
        assert!(!session.is_usable());
    }

    #[test]
    fn test_debug_redacts_session() {
        let session = ready_session();
        let debug = format!("{session:?}");
        assert!(!debug.contains("777"));
    }

    #[test]
    fn test_challenge_roundtrip() {
        let challenge = PairingChallenge::from_response(&soap::envelope(
            "<u:X_DisplayPinCodeResponse><X_ChallengeKey>vdj1PiHp9lJ3OhhzSbqNRw==</X_ChallengeKey></u:X_DisplayPinCodeResponse>",
        ))
        .unwrap();
        assert_eq!(challenge.challenge_key(), PAIRING_KEY);

        let args = challenge.auth_request("1234").unwrap();
        let sealed = element_text(&format!("<a>{args}</a>"), "X_AuthInfo").unwrap();
        assert_eq!(challenge.keys.open(&sealed).unwrap(), "<X_PinCode>1234</X_PinCode>");

        let result = challenge.keys.seal("<X_ApplicationId>NEWAPP</X_ApplicationId>").unwrap();
        assert_eq!(challenge.open(&result).unwrap(), "<X_ApplicationId>NEWAPP</X_ApplicationId>");
    }

    #[test]
    fn test_auth_result_under_other_keys_is_decrypt_error() {
        let challenge = PairingChallenge::new(PAIRING_KEY).unwrap();
        let other = keys::derive_session_keys(&[1u8; 16]);
        let result = other.seal("<X_ApplicationId>x</X_ApplicationId>").unwrap();
        assert!(challenge.open(&result).unwrap_err().is_decrypt());
    }

    #[test]
    fn test_pin_must_be_digits() {
        let challenge = PairingChallenge::new(PAIRING_KEY).unwrap();
        assert!(matches!(challenge.auth_request("12a4"), Err(Error::InvalidArgument(_))));
        assert!(matches!(challenge.auth_request(""), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_display_pin_request_escapes_name() {
        assert_eq!(
            PairingChallenge::display_pin_request("Tom & Jerry"),
            "<X_DeviceName>Tom &amp; Jerry</X_DeviceName>"
        );
    }
}
