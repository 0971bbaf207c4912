//! At-rest protection for webhook registration secrets using AES-256-GCM.
//!
//! Ciphertexts are laid out as `version (0x01) | nonce (12) | ciphertext+tag`
//! and bound to their registration through additional authenticated data, so
//! a ciphertext copied onto another registration fails to open. Rows written
//! while no key was configured hold the plaintext secret and are read back
//! unchanged.

#![allow(deprecated)]

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
};
use base64::Engine as _;
use rand::{Rng, distributions::Alphanumeric};
use thiserror::Error;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop};

const VERSION_ENCRYPTED: u8 = 0x01;
const VERSION_FIELD_LEN: usize = 1;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
const MIN_ENCRYPTED_LEN: usize = VERSION_FIELD_LEN + NONCE_LEN + TAG_LEN;

/// Length of secrets generated for registrations created without one.
pub const GENERATED_SECRET_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("empty ciphertext")]
    EmptyCiphertext,
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("secret is encrypted but no crypto key is configured")]
    KeyMissing,
}

/// Secure wrapper for encryption keys with zeroization
#[derive(Debug, Clone, Zeroize, ZeroizeOnDrop)]
pub struct ZeroizingKey(Vec<u8>);

pub type CryptoKey = ZeroizingKey;

impl CryptoKey {
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        Ok(ZeroizingKey(bytes))
    }

    /// Decode a standard base64 key as found in `HOOKGATE_CRYPTO_KEY`.
    pub fn from_base64(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidKey(format!("not valid base64: {e}")))?;
        Self::new(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

pub fn encrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut ciphertext = cipher
        .encrypt(
            &nonce,
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(VERSION_FIELD_LEN + NONCE_LEN + ciphertext.len());
    result.push(VERSION_ENCRYPTED);
    result.extend_from_slice(&nonce);
    result.append(&mut ciphertext);

    Ok(result)
}

pub fn decrypt_bytes(
    key: &CryptoKey,
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() {
        return Err(CryptoError::EmptyCiphertext);
    }
    if ciphertext.len() < MIN_ENCRYPTED_LEN || ciphertext[0] != VERSION_ENCRYPTED {
        return Err(CryptoError::InvalidFormat);
    }

    let nonce = Nonce::from_slice(&ciphertext[VERSION_FIELD_LEN..VERSION_FIELD_LEN + NONCE_LEN]);
    let tag_and_ct = &ciphertext[VERSION_FIELD_LEN + NONCE_LEN..];

    let cipher_key = Key::<Aes256Gcm>::from_slice(key.as_bytes());
    let cipher = Aes256Gcm::new(cipher_key);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: tag_and_ct,
                aad,
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

/// Determine if a stored payload uses the encrypted format
pub fn is_encrypted_payload(ciphertext: &[u8]) -> bool {
    ciphertext.len() >= MIN_ENCRYPTED_LEN && ciphertext[0] == VERSION_ENCRYPTED
}

/// Additional authenticated data binding a secret to its registration.
pub fn registration_aad(external_id: Uuid, code_host_kind: &str) -> Vec<u8> {
    format!("webhook_registration|{}|{}", external_id, code_host_kind).into_bytes()
}

/// Prepare a secret for storage: encrypted when a key is configured,
/// plaintext bytes otherwise.
pub fn seal_secret(
    key: Option<&CryptoKey>,
    aad: &[u8],
    secret: &str,
) -> Result<Vec<u8>, CryptoError> {
    match key {
        Some(key) => encrypt_bytes(key, aad, secret.as_bytes()),
        None => Ok(secret.as_bytes().to_vec()),
    }
}

/// Recover a stored secret.
pub fn open_secret(
    key: Option<&CryptoKey>,
    aad: &[u8],
    stored: &[u8],
) -> Result<String, CryptoError> {
    let bytes = if is_encrypted_payload(stored) {
        let key = key.ok_or(CryptoError::KeyMissing)?;
        decrypt_bytes(key, aad, stored)?
    } else {
        stored.to_vec()
    };
    String::from_utf8(bytes)
        .map_err(|e| CryptoError::DecryptionFailed(format!("Invalid UTF-8: {}", e)))
}

/// Random alphanumeric secret for registrations created without one.
pub fn generate_secret() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(GENERATED_SECRET_LEN)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> CryptoKey {
        CryptoKey::new(vec![7u8; 32]).expect("valid test key")
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = test_key();
        let encrypted = encrypt_bytes(&key, b"aad", b"secret message").unwrap();
        assert_eq!(decrypt_bytes(&key, b"aad", &encrypted).unwrap(), b"secret message");
    }

    #[test]
    fn test_different_aad_fails() {
        let key = test_key();
        let encrypted = encrypt_bytes(&key, b"aad-1", b"secret").unwrap();
        assert!(decrypt_bytes(&key, b"aad-2", &encrypted).is_err());
    }

    #[test]
    fn test_modified_ciphertext_fails() {
        let key = test_key();
        let mut encrypted = encrypt_bytes(&key, b"aad", b"secret message").unwrap();
        encrypted[13] ^= 0x01;
        assert!(decrypt_bytes(&key, b"aad", &encrypted).is_err());
    }

    #[test]
    fn test_nonce_uniqueness() {
        let key = test_key();
        let first = encrypt_bytes(&key, b"aad", b"secret").unwrap();
        let second = encrypt_bytes(&key, b"aad", b"secret").unwrap();
        assert_ne!(&first[1..13], &second[1..13]);
    }

    #[test]
    fn test_invalid_key_length_rejected() {
        assert!(CryptoKey::new(vec![0u8; 16]).is_err());
        assert!(CryptoKey::from_base64("not base64!").is_err());
        let encoded = base64::engine::general_purpose::STANDARD.encode([1u8; 32]);
        assert!(CryptoKey::from_base64(&encoded).is_ok());
    }

    #[test]
    fn secrets_round_trip_with_key() {
        let key = test_key();
        let aad = registration_aad(Uuid::new_v4(), "GITHUB");
        let sealed = seal_secret(Some(&key), &aad, "hunter2").unwrap();
        assert!(is_encrypted_payload(&sealed));
        assert_eq!(open_secret(Some(&key), &aad, &sealed).unwrap(), "hunter2");
    }

    #[test]
    fn plaintext_secrets_are_read_back_without_key() {
        let aad = registration_aad(Uuid::new_v4(), "GITLAB");
        let sealed = seal_secret(None, &aad, "token").unwrap();
        assert_eq!(sealed, b"token");
        assert_eq!(open_secret(None, &aad, &sealed).unwrap(), "token");
        assert_eq!(open_secret(Some(&test_key()), &aad, &sealed).unwrap(), "token");
    }

    #[test]
    fn encrypted_secret_without_key_is_an_error() {
        let aad = registration_aad(Uuid::new_v4(), "GITHUB");
        let sealed = seal_secret(Some(&test_key()), &aad, "hunter2").unwrap();
        assert!(matches!(
            open_secret(None, &aad, &sealed),
            Err(CryptoError::KeyMissing)
        ));
    }

    #[test]
    fn secret_bound_to_registration() {
        let key = test_key();
        let sealed = seal_secret(
            Some(&key),
            &registration_aad(Uuid::new_v4(), "GITHUB"),
            "hunter2",
        )
        .unwrap();
        let other = registration_aad(Uuid::new_v4(), "GITHUB");
        assert!(open_secret(Some(&key), &other, &sealed).is_err());
    }

    #[test]
    fn generated_secrets_are_distinct() {
        let first = generate_secret();
        assert_eq!(first.len(), GENERATED_SECRET_LEN);
        assert_ne!(first, generate_secret());
    }
}
