use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::types::AES_KEY_LENGTH;

/// The two long-term symmetric keys shared with the server.
///
/// `auth_key` (KA) authenticates hello and request messages, `enc_key` (KEA)
/// decrypts epoch tuples. Both are wiped when the value is dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    auth_key: [u8; AES_KEY_LENGTH],
    enc_key: [u8; AES_KEY_LENGTH],
}

impl KeyMaterial {
    pub fn new(auth_key: [u8; AES_KEY_LENGTH], enc_key: [u8; AES_KEY_LENGTH]) -> Self {
        Self { auth_key, enc_key }
    }

    /// Build from untrusted slices (e.g. loaded back from the store).
    pub fn from_slices(auth_key: &[u8], enc_key: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            auth_key: to_key(auth_key)?,
            enc_key: to_key(enc_key)?,
        })
    }

    pub fn auth_key(&self) -> &[u8; AES_KEY_LENGTH] {
        &self.auth_key
    }

    pub fn enc_key(&self) -> &[u8; AES_KEY_LENGTH] {
        &self.enc_key
    }
}

fn to_key(bytes: &[u8]) -> Result<[u8; AES_KEY_LENGTH], CryptoError> {
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: AES_KEY_LENGTH,
            got: bytes.len(),
        })
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_slices_checks_lengths() {
        assert!(KeyMaterial::from_slices(&[1u8; 32], &[2u8; 32]).is_ok());
        assert!(matches!(
            KeyMaterial::from_slices(&[1u8; 16], &[2u8; 32]),
            Err(CryptoError::InvalidKeyLength { expected: 32, got: 16 })
        ));
        assert!(KeyMaterial::from_slices(&[1u8; 32], &[]).is_err());
    }

    #[test]
    fn debug_does_not_leak_keys() {
        let keys = KeyMaterial::new([0xab; 32], [0xcd; 32]);
        assert_eq!(format!("{keys:?}"), "KeyMaterial { .. }");
    }

    #[test]
    fn zeroize_clears_both_keys() {
        let mut keys = KeyMaterial::new([0xab; 32], [0xcd; 32]);
        keys.zeroize();
        assert_eq!(keys.auth_key(), &[0u8; 32]);
        assert_eq!(keys.enc_key(), &[0u8; 32]);
    }
}
