//! AES-256-GCM sealing of the server-to-client epoch tuples.
//!
//! Wire format: [12 bytes: IV][N bytes: ciphertext + 16-byte tag]
//! Associated data is always empty.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};

use crate::error::CryptoError;
use crate::types::{AES_GCM_IV_LENGTH, AES_GCM_TAG_LENGTH, AES_KEY_LENGTH};

/// Generate a random 12-byte IV for AES-GCM.
pub fn generate_iv() -> Result<[u8; AES_GCM_IV_LENGTH], CryptoError> {
    let mut iv = [0u8; AES_GCM_IV_LENGTH];
    getrandom::getrandom(&mut iv).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(iv)
}

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm, CryptoError> {
    if key.len() != AES_KEY_LENGTH {
        return Err(CryptoError::InvalidKeyLength {
            expected: AES_KEY_LENGTH,
            got: key.len(),
        });
    }
    Aes256Gcm::new_from_slice(key).map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
}

/// Encrypt with AES-256-GCM under a fresh random IV.
///
/// Returns: [IV:12][ciphertext+tag]
pub fn aes_gcm_encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let iv = generate_iv()?;
    aes_gcm_encrypt_with_iv(key, &iv, plaintext)
}

/// Encrypt with a caller-chosen IV. Only the server side of the protocol and
/// fixed test vectors need this; never reuse an IV under the same key.
pub fn aes_gcm_encrypt_with_iv(
    key: &[u8],
    iv: &[u8; AES_GCM_IV_LENGTH],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = cipher_for(key)?;
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(iv),
            Payload {
                msg: plaintext,
                aad: &[],
            },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut result = Vec::with_capacity(AES_GCM_IV_LENGTH + ciphertext.len());
    result.extend_from_slice(iv);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt AES-256-GCM data laid out as [IV:12][ciphertext+tag].
///
/// Any tag mismatch fails the whole call; no partial plaintext is returned.
pub fn aes_gcm_decrypt(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < AES_GCM_IV_LENGTH + AES_GCM_TAG_LENGTH {
        return Err(CryptoError::DataTooShort);
    }
    let cipher = cipher_for(key).map_err(|e| match e {
        CryptoError::EncryptionFailed(msg) => CryptoError::DecryptionFailed(msg),
        other => other,
    })?;
    let (iv, ciphertext) = data.split_at(AES_GCM_IV_LENGTH);

    cipher
        .decrypt(
            Nonce::from_slice(iv),
            Payload {
                msg: ciphertext,
                aad: &[],
            },
        )
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        getrandom::getrandom(&mut key).unwrap();
        key
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = random_key();
        let encrypted = aes_gcm_encrypt(&key, b"Hello, World!").unwrap();
        let decrypted = aes_gcm_decrypt(&key, &encrypted).unwrap();
        assert_eq!(decrypted, b"Hello, World!");
    }

    #[test]
    fn layout_is_iv_then_ciphertext_and_tag() {
        let key = random_key();
        let iv = [7u8; 12];
        let encrypted = aes_gcm_encrypt_with_iv(&key, &iv, b"abc").unwrap();
        assert_eq!(&encrypted[..12], &iv);
        assert_eq!(encrypted.len(), 12 + 3 + 16);
    }

    #[test]
    fn nist_vector_zero_key_zero_iv() {
        // AES-256-GCM, K = 0^256, IV = 0^96, P = 0^128
        let key = [0u8; 32];
        let iv = [0u8; 12];
        let encrypted = aes_gcm_encrypt_with_iv(&key, &iv, &[0u8; 16]).unwrap();
        assert_eq!(
            hex::encode(&encrypted[12..28]),
            "cea7403d4d606b6e074ec5d3baf39d18"
        );
        assert_eq!(
            hex::encode(&encrypted[28..]),
            "d0d1c8a799996bf0265b98b5d48ab919"
        );
    }

    #[test]
    fn different_ciphertext_each_time() {
        let key = random_key();
        let enc1 = aes_gcm_encrypt(&key, b"test").unwrap();
        let enc2 = aes_gcm_encrypt(&key, b"test").unwrap();
        assert_ne!(enc1, enc2);
    }

    #[test]
    fn every_tag_bit_flip_is_rejected() {
        let key = random_key();
        let encrypted = aes_gcm_encrypt(&key, b"epoch tuples").unwrap();
        let tag_start = encrypted.len() - AES_GCM_TAG_LENGTH;
        for byte in tag_start..encrypted.len() {
            for bit in 0..8 {
                let mut tampered = encrypted.clone();
                tampered[byte] ^= 1 << bit;
                assert!(aes_gcm_decrypt(&key, &tampered).is_err());
            }
        }
    }

    #[test]
    fn rejects_tampered_iv() {
        let key = random_key();
        let mut encrypted = aes_gcm_encrypt(&key, b"secret").unwrap();
        encrypted[0] ^= 0x01;
        assert!(aes_gcm_decrypt(&key, &encrypted).is_err());
    }

    #[test]
    fn rejects_truncated_data() {
        let key = random_key();
        let err = aes_gcm_decrypt(&key, &[0u8; 27]).unwrap_err();
        assert!(err.to_string().contains("too short"));
    }

    #[test]
    fn rejects_wrong_key_length() {
        assert!(aes_gcm_encrypt(&[0u8; 16], b"data").is_err());
        assert!(matches!(
            aes_gcm_decrypt(&[0u8; 16], &[0u8; 40]),
            Err(CryptoError::InvalidKeyLength { .. })
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let encrypted = aes_gcm_encrypt(&random_key(), b"secret").unwrap();
        assert!(aes_gcm_decrypt(&random_key(), &encrypted).is_err());
    }

    #[test]
    fn handles_empty_plaintext() {
        let key = random_key();
        let encrypted = aes_gcm_encrypt(&key, b"").unwrap();
        assert!(aes_gcm_decrypt(&key, &encrypted).unwrap().is_empty());
    }
}
