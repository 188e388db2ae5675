//! Derivation of the authentication key (KA) and tuples encryption key (KEA)
//! from the registration ECDH shared secret.

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::CryptoError;
use crate::keys::KeyMaterial;
use crate::mac::hmac_sha256;
use crate::types::AES_KEY_LENGTH;

/// Label for the MAC key.
const AUTH_KEY_LABEL: &[u8] = b"mac";

/// Label for the tuples encryption key.
const ENC_KEY_LABEL: &[u8] = b"tuples";

/// Salt used by [`HkdfDerivation`].
const HKDF_SALT: &[u8] = b"robert:registration-salt:v1";

/// Turns an ECDH shared secret into the pair of long-term symmetric keys.
pub trait KeyDerivation: Send + Sync {
    fn derive(&self, shared_secret: &[u8]) -> Result<KeyMaterial, CryptoError>;
}

/// `KA = HMAC-SHA256(secret, "mac")`, `KEA = HMAC-SHA256(secret, "tuples")`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacDerivation;

impl KeyDerivation for HmacDerivation {
    fn derive(&self, shared_secret: &[u8]) -> Result<KeyMaterial, CryptoError> {
        let auth_key = hmac_sha256(shared_secret, &[AUTH_KEY_LABEL])?;
        let enc_key = hmac_sha256(shared_secret, &[ENC_KEY_LABEL])?;
        Ok(KeyMaterial::new(auth_key, enc_key))
    }
}

/// HKDF-SHA256 with a fixed salt and the same labels as `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HkdfDerivation;

impl KeyDerivation for HkdfDerivation {
    fn derive(&self, shared_secret: &[u8]) -> Result<KeyMaterial, CryptoError> {
        let auth_key = hkdf_derive(shared_secret, HKDF_SALT, AUTH_KEY_LABEL)?;
        let enc_key = hkdf_derive(shared_secret, HKDF_SALT, ENC_KEY_LABEL)?;
        Ok(KeyMaterial::new(auth_key, enc_key))
    }
}

/// Derive a 256-bit key using HKDF-SHA256.
pub fn hkdf_derive(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
) -> Result<[u8; AES_KEY_LENGTH], CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; AES_KEY_LENGTH];
    hk.expand(info, &mut okm)
        .map_err(|e| CryptoError::KeyDerivationFailed(format!("HKDF expand failed: {}", e)))?;
    Ok(okm)
}
