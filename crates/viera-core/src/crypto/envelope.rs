//! Encrypted payload envelope used by `X_EncInfo`, `X_AuthInfo`, and the
//! matching `X_EncResult`/`X_AuthResult` fields.
//!
//! # Wire layout
//!
//! ```text
//! base64( AES-128-CBC( nonce[12] | len_be[4] | plaintext | zero pad ) | HMAC-SHA-256[32] )
//! ```
//!
//! The television firmware decodes by skipping the first block and reading
//! up to the first NUL byte, and [`open`] does the same. The length field
//! written by [`seal`] is not consulted when opening.

use base64::{Engine, engine::general_purpose::STANDARD};
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
use hmac::{Hmac, Mac};
use rand::{TryRngCore, rngs::OsRng};
use sha2::Sha256;
use tracing::trace;

use crate::error::Error;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type HmacSha256 = Hmac<Sha256>;

/// AES block size.
const BLOCK_LEN: usize = 16;

/// Random bytes prepended to every plaintext.
const NONCE_LEN: usize = 12;

/// Nonce plus the 4-byte length field.
const HEADER_LEN: usize = NONCE_LEN + 4;

/// HMAC-SHA-256 output length.
const SIGNATURE_LEN: usize = 32;

/// Seals `plaintext` into the base64 envelope.
///
/// # Example
///
/// ```
/// use viera_core::crypto::{open, seal};
///
/// let key = [0x11u8; 16];
/// let iv = [0x22u8; 16];
/// let hmac_key = [0x33u8; 32];
///
/// let blob = seal("<X_PinCode>1234</X_PinCode>", &key, &iv, &hmac_key).unwrap();
/// assert_eq!(open(&blob, &key, &iv, &hmac_key).unwrap(), "<X_PinCode>1234</X_PinCode>");
/// ```
pub fn seal(
    plaintext: &str,
    key: &[u8; 16],
    iv: &[u8; 16],
    hmac_key: &[u8; 32],
) -> Result<String, Error> {
    let bytes = plaintext.as_bytes();
    let len = u32::try_from(bytes.len())
        .map_err(|_| Error::Encrypt(format!("plaintext too large: {} bytes", bytes.len())))?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|e| Error::Encrypt(format!("random source failed: {e}")))?;

    let unpadded = HEADER_LEN + bytes.len();
    let padded = unpadded.div_ceil(BLOCK_LEN) * BLOCK_LEN;

    let mut buf = Vec::with_capacity(padded + SIGNATURE_LEN);
    buf.extend_from_slice(&nonce);
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(bytes);
    buf.resize(padded, 0);

    Aes128CbcEnc::new(key.into(), iv.into())
        .encrypt_padded_mut::<NoPadding>(&mut buf, padded)
        .map_err(|e| Error::Encrypt(format!("cipher failed: {e}")))?;

    let mut mac = HmacSha256::new_from_slice(hmac_key)
        .map_err(|e| Error::Encrypt(format!("invalid HMAC key: {e}")))?;
    mac.update(&buf);
    buf.extend_from_slice(&mac.finalize().into_bytes());

    trace!(plaintext_len = bytes.len(), sealed_len = buf.len(), "sealed payload");
    Ok(STANDARD.encode(buf))
}

/// Opens a base64 envelope produced by the television or by [`seal`].
///
/// The signature is verified before anything is decrypted; a mismatch is
/// reported as [`Error::Decrypt`].
pub fn open(
    blob: &str,
    key: &[u8; 16],
    iv: &[u8; 16],
    hmac_key: &[u8; 32],
) -> Result<String, Error> {
    let raw = STANDARD
        .decode(blob.trim())
        .map_err(|e| Error::Decrypt(format!("invalid base64: {e}")))?;

    if raw.len() < SIGNATURE_LEN + BLOCK_LEN {
        return Err(Error::Decrypt(format!(
            "payload too short: {} bytes",
            raw.len()
        )));
    }

    let (ciphertext, signature) = raw.split_at(raw.len() - SIGNATURE_LEN);

    let mut mac = HmacSha256::new_from_slice(hmac_key)
        .map_err(|e| Error::Decrypt(format!("invalid HMAC key: {e}")))?;
    mac.update(ciphertext);
    mac.verify_slice(signature)
        .map_err(|_| Error::Decrypt("HMAC signature mismatch".into()))?;

    if ciphertext.len() % BLOCK_LEN != 0 {
        return Err(Error::Decrypt(format!(
            "ciphertext length {} is not a multiple of {}",
            ciphertext.len(),
            BLOCK_LEN
        )));
    }

    let mut buf = ciphertext.to_vec();
    let plain = Aes128CbcDec::new(key.into(), iv.into())
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|e| Error::Decrypt(format!("cipher failed: {e}")))?;

    let message = &plain[BLOCK_LEN..];
    let end = message.iter().position(|&b| b == 0).unwrap_or(message.len());

    String::from_utf8(message[..end].to_vec())
        .map_err(|e| Error::Decrypt(format!("payload is not valid UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 16] = [
        0xf5, 0x3e, 0xbd, 0xd8, 0xf6, 0x52, 0x21, 0xe9, 0x18, 0x73, 0x77, 0x3a, 0x8d, 0x47, 0x49,
        0xba,
    ];
    const IV: [u8; 16] = [
        0xbd, 0xd8, 0xf5, 0x3e, 0x21, 0xe9, 0xf6, 0x52, 0x77, 0x3a, 0x18, 0x73, 0x49, 0xba, 0x8d,
        0x47,
    ];

    fn hmac_key() -> [u8; 32] {
        let mut k = [0u8; 32];
        k[..16].copy_from_slice(&IV);
        k[16..].copy_from_slice(&IV);
        k
    }

    #[test]
    fn test_seal_open_roundtrip() {
        for plaintext in [
            "",
            "a",
            "<X_PinCode>1234</X_PinCode>",
            "exactly-16-bytes",
            &"x".repeat(1000),
        ] {
            let blob = seal(plaintext, &KEY, &IV, &hmac_key()).unwrap();
            assert_eq!(open(&blob, &KEY, &IV, &hmac_key()).unwrap(), plaintext);
        }
    }

    #[test]
    fn test_sealed_layout() {
        let plaintext = "<X_SessionId>1</X_SessionId>";
        let blob = seal(plaintext, &KEY, &IV, &hmac_key()).unwrap();
        let raw = STANDARD.decode(&blob).unwrap();

        // 16 header + 28 plaintext = 44, padded to 48, plus the signature
        assert_eq!(raw.len(), 48 + SIGNATURE_LEN);

        let mut ct = raw[..48].to_vec();
        let plain = Aes128CbcDec::new((&KEY).into(), (&IV).into())
            .decrypt_padded_mut::<NoPadding>(&mut ct)
            .unwrap();
        assert_eq!(&plain[12..16], &(plaintext.len() as u32).to_be_bytes());
        assert_eq!(&plain[16..44], plaintext.as_bytes());
        assert!(plain[44..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_open_known_vector() {
        // Produced by an independent implementation with nonce 00..0b.
        let blob = "gY7HyJrXo9eV7j6zsVgpAPlSeE8POW1O8MVxCE88qVbNoqXlRXeqEcuS+5hdVIBM/bVFJa2T+sQmMMW8K3p5h4mY96uiH9rxz73/vuYMLTk=";
        assert_eq!(
            open(blob, &KEY, &IV, &hmac_key()).unwrap(),
            "<X_SessionId>12345</X_SessionId>"
        );
    }

    #[test]
    fn test_nonce_makes_ciphertext_differ() {
        let a = seal("same", &KEY, &IV, &hmac_key()).unwrap();
        let b = seal("same", &KEY, &IV, &hmac_key()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_signature_bit_flip_is_rejected() {
        let blob = seal("<X_Data>payload</X_Data>", &KEY, &IV, &hmac_key()).unwrap();
        let raw = STANDARD.decode(&blob).unwrap();
        let sig_start = raw.len() - SIGNATURE_LEN;

        for byte in sig_start..raw.len() {
            for bit in 0..8 {
                let mut tampered = raw.clone();
                tampered[byte] ^= 1 << bit;
                let err = open(&STANDARD.encode(&tampered), &KEY, &IV, &hmac_key()).unwrap_err();
                assert!(err.is_decrypt(), "byte {byte} bit {bit}: {err:?}");
            }
        }
    }

    #[test]
    fn test_ciphertext_tamper_is_rejected() {
        let blob = seal("<X_Data>payload</X_Data>", &KEY, &IV, &hmac_key()).unwrap();
        let mut raw = STANDARD.decode(&blob).unwrap();
        raw[3] ^= 0x80;
        let err = open(&STANDARD.encode(&raw), &KEY, &IV, &hmac_key()).unwrap_err();
        assert!(matches!(err, Error::Decrypt(ref m) if m.contains("signature")));
    }

    #[test]
    fn test_wrong_hmac_key_is_rejected() {
        let blob = seal("hello", &KEY, &IV, &hmac_key()).unwrap();
        let err = open(&blob, &KEY, &IV, &[0u8; 32]).unwrap_err();
        assert!(err.is_decrypt());
    }

    #[test]
    fn test_open_rejects_garbage() {
        assert!(open("not base64!!", &KEY, &IV, &hmac_key()).unwrap_err().is_decrypt());
        assert!(open("AAAA", &KEY, &IV, &hmac_key()).unwrap_err().is_decrypt());
    }

    #[test]
    fn test_open_stops_at_first_nul() {
        let blob = seal("abc\0def", &KEY, &IV, &hmac_key()).unwrap();
        assert_eq!(open(&blob, &KEY, &IV, &hmac_key()).unwrap(), "abc");
    }
}
