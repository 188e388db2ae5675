//! HMAC-SHA256 message tags over protocol fields.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::CryptoError;
use crate::types::HMAC_SHA256_LENGTH;

type HmacSha256 = Hmac<Sha256>;

fn keyed(key: &[u8]) -> Result<HmacSha256, CryptoError> {
    if key.is_empty() {
        return Err(CryptoError::InvalidKeyLength {
            expected: HMAC_SHA256_LENGTH,
            got: 0,
        });
    }
    HmacSha256::new_from_slice(key).map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))
}

/// Compute HMAC-SHA256 over the concatenation of `parts`.
pub fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Result<[u8; HMAC_SHA256_LENGTH], CryptoError> {
    let mut mac = keyed(key)?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

/// Compute HMAC-SHA256 and keep the leftmost `len` bytes.
pub fn hmac_sha256_truncated(
    key: &[u8],
    parts: &[&[u8]],
    len: usize,
) -> Result<Vec<u8>, CryptoError> {
    if len == 0 || len > HMAC_SHA256_LENGTH {
        return Err(CryptoError::InvalidMacLength {
            max: HMAC_SHA256_LENGTH,
            got: len,
        });
    }
    let full = hmac_sha256(key, parts)?;
    Ok(full[..len].to_vec())
}

/// Constant-time check of a (possibly left-truncated) tag.
pub fn verify_hmac_sha256(key: &[u8], parts: &[&[u8]], tag: &[u8]) -> bool {
    if tag.is_empty() || tag.len() > HMAC_SHA256_LENGTH {
        return false;
    }
    let Ok(mut mac) = keyed(key) else {
        return false;
    };
    for part in parts {
        mac.update(part);
    }
    mac.verify_truncated_left(tag).is_ok()
}
