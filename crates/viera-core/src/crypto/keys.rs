//! Working-key derivation for the encrypted command envelope.
//!
//! Both derivations are fixed byte shuffles of a 16-byte IV dictated by the
//! television firmware. They carry no cryptographic strength of their own;
//! they only have to match what the set computes.

use base64::{Engine, engine::general_purpose::STANDARD};

use crate::error::Error;

/// HMAC key mask applied during the PIN challenge (from the vendor remote SDK).
const CHALLENGE_HMAC_MASK: [u8; 32] = [
    0x15, 0xC9, 0x5A, 0xC2, 0xB0, 0x8A, 0xA7, 0xEB, 0x4E, 0x22, 0x8F, 0x81, 0x1E, 0x34, 0xD0, 0x4F,
    0xA5, 0x4B, 0xA7, 0xDC, 0xAC, 0x98, 0x79, 0xFA, 0x8A, 0xCD, 0xA3, 0xFC, 0x24, 0x4F, 0x38, 0x54,
];

/// AES key, CBC IV, and HMAC key used together by the envelope.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKeys {
    /// AES-128 key.
    pub cipher_key: [u8; 16],
    /// CBC initialisation vector (the decoded pairing key or challenge).
    pub iv: [u8; 16],
    /// HMAC-SHA-256 key.
    pub hmac_key: [u8; 32],
}

impl SessionKeys {
    /// Seals a payload under these keys.
    pub fn seal(&self, plaintext: &str) -> Result<String, Error> {
        super::envelope::seal(plaintext, &self.cipher_key, &self.iv, &self.hmac_key)
    }

    /// Opens a payload sealed under these keys.
    pub fn open(&self, blob: &str) -> Result<String, Error> {
        super::envelope::open(blob, &self.cipher_key, &self.iv, &self.hmac_key)
    }
}

// Keys must never end up in logs.
impl std::fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKeys")
            .field("cipher_key", &"[REDACTED]")
            .field("iv", &"[REDACTED]")
            .field("hmac_key", &"[REDACTED]")
            .finish()
    }
}

/// Decodes a base64 pairing key or challenge into a 16-byte IV.
pub fn decode_iv(encoded: &str) -> Result<[u8; 16], Error> {
    let raw = STANDARD
        .decode(encoded.trim())
        .map_err(|e| Error::InvalidArgument(format!("key is not valid base64: {e}")))?;

    raw.as_slice().try_into().map_err(|_| {
        Error::InvalidArgument(format!("key must decode to 16 bytes, got {}", raw.len()))
    })
}

/// Derives the long-lived session keys from the pairing key IV.
///
/// Each 4-byte group of the IV is rotated by two bytes to form the AES key,
/// and the HMAC key is the IV repeated twice.
pub fn derive_session_keys(iv: &[u8; 16]) -> SessionKeys {
    let mut cipher_key = [0u8; 16];
    for i in (0..16).step_by(4) {
        cipher_key[i] = iv[i + 2];
        cipher_key[i + 1] = iv[i + 3];
        cipher_key[i + 2] = iv[i];
        cipher_key[i + 3] = iv[i + 1];
    }

    let mut hmac_key = [0u8; 32];
    hmac_key[..16].copy_from_slice(iv);
    hmac_key[16..].copy_from_slice(iv);

    SessionKeys {
        cipher_key,
        iv: *iv,
        hmac_key,
    }
}

/// Derives the one-shot keys used to send the PIN and read the auth result.
pub fn derive_challenge_keys(iv: &[u8; 16]) -> SessionKeys {
    let mut cipher_key = [0u8; 16];
    for i in (0..16).step_by(4) {
        cipher_key[i] = !iv[i + 3];
        cipher_key[i + 1] = !iv[i + 2];
        cipher_key[i + 2] = !iv[i + 1];
        cipher_key[i + 3] = !iv[i];
    }

    let mut hmac_key = [0u8; 32];
    for i in (0..32).step_by(4) {
        hmac_key[i] = CHALLENGE_HMAC_MASK[i] ^ iv[(i + 2) & 0xF];
        hmac_key[i + 1] = CHALLENGE_HMAC_MASK[i + 1] ^ iv[(i + 3) & 0xF];
        hmac_key[i + 2] = CHALLENGE_HMAC_MASK[i + 2] ^ iv[i & 0xF];
        hmac_key[i + 3] = CHALLENGE_HMAC_MASK[i + 3] ^ iv[(i + 1) & 0xF];
    }

    SessionKeys {
        cipher_key,
        iv: *iv,
        hmac_key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REFERENCE_IV: &str = "vdj1PiHp9lJ3OhhzSbqNRw==";

    #[test]
    fn test_decode_reference_iv() {
        let iv = decode_iv(REFERENCE_IV).unwrap();
        assert_eq!(hex::encode(iv), "bdd8f53e21e9f652773a187349ba8d47");
    }

    #[test]
    fn test_session_key_vector() {
        let keys = derive_session_keys(&decode_iv(REFERENCE_IV).unwrap());
        assert_eq!(
            hex::encode(keys.cipher_key),
            "f53ebdd8f65221e91873773a8d4749ba"
        );
        assert_eq!(
            hex::encode(keys.hmac_key),
            "bdd8f53e21e9f652773a187349ba8d47bdd8f53e21e9f652773a187349ba8d47"
        );
    }

    #[test]
    fn test_challenge_key_vector() {
        let keys = derive_challenge_keys(&decode_iv(REFERENCE_IV).unwrap());
        assert_eq!(
            hex::encode(keys.cipher_key),
            "c10a2742ad0916de8ce7c588b87245b6"
        );
        assert_eq!(
            hex::encode(keys.hmac_key),
            "e0f7e71a46d886025651f8bb937399f550751a045aca581392bed4c6a90871ee"
        );
    }

    #[test]
    fn test_derived_keys_roundtrip_through_envelope() {
        let iv = decode_iv(REFERENCE_IV).unwrap();
        for keys in [derive_session_keys(&iv), derive_challenge_keys(&iv)] {
            let blob = keys.seal("<X_Data>ok</X_Data>").unwrap();
            assert_eq!(keys.open(&blob).unwrap(), "<X_Data>ok</X_Data>");
        }
    }

    #[test]
    fn test_decode_iv_rejects_wrong_length() {
        let err = decode_iv("AAAA").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[test]
    fn test_decode_iv_rejects_bad_base64() {
        assert!(matches!(
            decode_iv("***").unwrap_err(),
            Error::InvalidArgument(_)
        ));
    }

    #[test]
    fn test_debug_redacts_keys() {
        let keys = derive_session_keys(&[7u8; 16]);
        let debug = format!("{keys:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("07"));
    }
}
