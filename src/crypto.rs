//! Symmetric encryption for message bodies at rest.
//!
//! ChaCha20-Poly1305 with a 32-byte key. Sealed values are self-describing
//! envelopes, `enc:v1:<nonce>:<ciphertext>` (both URL-safe base64 without
//! padding), so plaintext rows written before encryption was enabled are
//! still readable.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use uuid::Uuid;

const ENVELOPE_PREFIX: &str = "enc:v1:";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CipherError {
    #[error("encryption key must be 32 bytes encoded as 64 hex characters or base64")]
    InvalidKey,
    #[error("encrypted value envelope is malformed")]
    MalformedEnvelope,
    #[error("encrypted value failed authentication")]
    Decrypt,
    #[error("encryption failed")]
    Encrypt,
}

#[derive(Clone)]
pub struct MessageCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for MessageCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MessageCipher(..)")
    }
}

impl MessageCipher {
    /// Parse a key given as 64 hex characters or standard base64.
    pub fn from_encoded_key(encoded: &str) -> Result<Self, CipherError> {
        let trimmed = encoded.trim();
        let bytes = if trimmed.len() == 64 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            hex::decode(trimmed).map_err(|_| CipherError::InvalidKey)?
        } else {
            STANDARD
                .decode(trimmed)
                .map_err(|_| CipherError::InvalidKey)?
        };
        let key: [u8; 32] = bytes.try_into().map_err(|_| CipherError::InvalidKey)?;
        Ok(Self { key })
    }

    /// True for a well-formed envelope: prefix, a 12-byte nonce and a
    /// ciphertext segment. Text that merely starts with the prefix is not.
    pub fn is_sealed(value: &str) -> bool {
        let Some((nonce, ciphertext)) = value
            .strip_prefix(ENVELOPE_PREFIX)
            .and_then(|rest| rest.split_once(':'))
        else {
            return false;
        };
        URL_SAFE_NO_PAD.decode(nonce).is_ok_and(|n| n.len() == 12)
            && URL_SAFE_NO_PAD.decode(ciphertext).is_ok_and(|c| c.len() >= 16)
    }

    /// Always encrypts, even input that already looks like an envelope.
    pub fn seal(&self, plaintext: &str) -> Result<String, CipherError> {
        let nonce_source = Uuid::new_v4();
        let nonce_bytes = &nonce_source.as_bytes()[..12];
        let aead = ChaCha20Poly1305::new_from_slice(&self.key).map_err(|_| CipherError::InvalidKey)?;
        let ciphertext = aead
            .encrypt(Nonce::from_slice(nonce_bytes), plaintext.as_bytes())
            .map_err(|_| CipherError::Encrypt)?;
        Ok(format!(
            "{ENVELOPE_PREFIX}{}:{}",
            URL_SAFE_NO_PAD.encode(nonce_bytes),
            URL_SAFE_NO_PAD.encode(ciphertext)
        ))
    }

    /// Decrypt an envelope; values without the prefix pass through.
    pub fn open(&self, stored: &str) -> Result<String, CipherError> {
        let Some(rest) = stored.strip_prefix(ENVELOPE_PREFIX) else {
            return Ok(stored.to_string());
        };
        let (nonce_b64, ciphertext_b64) = rest
            .split_once(':')
            .ok_or(CipherError::MalformedEnvelope)?;
        let nonce = URL_SAFE_NO_PAD
            .decode(nonce_b64)
            .map_err(|_| CipherError::MalformedEnvelope)?;
        if nonce.len() != 12 {
            return Err(CipherError::MalformedEnvelope);
        }
        let ciphertext = URL_SAFE_NO_PAD
            .decode(ciphertext_b64)
            .map_err(|_| CipherError::MalformedEnvelope)?;
        let aead = ChaCha20Poly1305::new_from_slice(&self.key).map_err(|_| CipherError::InvalidKey)?;
        let plaintext = aead
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| CipherError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| CipherError::Decrypt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_seal_then_open() {
        let cipher = MessageCipher::from_encoded_key(HEX_KEY).unwrap();
        let sealed = cipher.seal("I was stationed at Fort Hood").unwrap();
        assert!(MessageCipher::is_sealed(&sealed));
        assert!(!sealed.contains("Fort Hood"));
        assert_eq!(cipher.open(&sealed).unwrap(), "I was stationed at Fort Hood");
    }

    #[test]
    fn test_nonces_differ() {
        let cipher = MessageCipher::from_encoded_key(HEX_KEY).unwrap();
        assert_ne!(cipher.seal("same").unwrap(), cipher.seal("same").unwrap());
    }

    #[test]
    fn test_envelope_lookalike_is_still_encrypted() {
        let cipher = MessageCipher::from_encoded_key(HEX_KEY).unwrap();
        let text = "enc:v1:my private question";
        let sealed = cipher.seal(text).unwrap();
        assert_ne!(sealed, text);
        assert!(!sealed.contains("private"));
        assert_eq!(cipher.open(&sealed).unwrap(), text);
        assert!(!MessageCipher::is_sealed(text));
    }

    #[test]
    fn test_plaintext_passes_through() {
        let cipher = MessageCipher::from_encoded_key(HEX_KEY).unwrap();
        assert_eq!(cipher.open("legacy row").unwrap(), "legacy row");
    }

    #[test]
    fn test_wrong_key_fails_authentication() {
        let a = MessageCipher::from_encoded_key(HEX_KEY).unwrap();
        let b = MessageCipher::from_encoded_key(&STANDARD.encode([7u8; 32])).unwrap();
        let sealed = a.seal("secret").unwrap();
        assert_eq!(b.open(&sealed), Err(CipherError::Decrypt));
    }

    #[test]
    fn test_bad_keys_and_envelopes() {
        assert_eq!(
            MessageCipher::from_encoded_key("short").unwrap_err(),
            CipherError::InvalidKey
        );
        let cipher = MessageCipher::from_encoded_key(HEX_KEY).unwrap();
        assert_eq!(
            cipher.open("enc:v1:nocolon"),
            Err(CipherError::MalformedEnvelope)
        );
    }
}
