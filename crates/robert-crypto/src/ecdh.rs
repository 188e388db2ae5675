//! P-256 ECDH key agreement used once, at registration.
//!
//! Public keys travel as uncompressed SEC1 points (0x04 || x || y).

use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::rand_core::OsRng;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use zeroize::Zeroizing;

use crate::base64::{base64_decode, base64_encode};
use crate::error::CryptoError;

/// Parse an uncompressed (or compressed) SEC1 P-256 point.
pub fn parse_public_key(bytes: &[u8]) -> Result<PublicKey, CryptoError> {
    PublicKey::from_sec1_bytes(bytes).map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
}

/// Parse a base64 SEC1 P-256 point.
pub fn parse_public_key_base64(encoded: &str) -> Result<PublicKey, CryptoError> {
    let bytes = base64_decode(encoded).map_err(|e| CryptoError::Base64Decode(e.to_string()))?;
    parse_public_key(&bytes)
}

fn encode_point(public: &PublicKey) -> Vec<u8> {
    public.to_encoded_point(false).as_bytes().to_vec()
}

/// Single-use key pair generated for one registration attempt.
pub struct EphemeralKeyPair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EphemeralKeyPair {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        encode_point(&self.public)
    }

    pub fn public_key_base64(&self) -> String {
        base64_encode(&self.public_key_bytes())
    }

    /// Compute the shared secret with the peer's static key. Consumes the pair.
    pub fn agree(self, peer: &PublicKey) -> Zeroizing<Vec<u8>> {
        let shared = self.secret.diffie_hellman(peer);
        Zeroizing::new(shared.raw_secret_bytes().to_vec())
    }
}

/// Long-lived key pair, the role the coordination server plays.
pub struct StaticKeyPair {
    secret: SecretKey,
}

impl StaticKeyPair {
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::random(&mut OsRng),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.secret.public_key()
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        encode_point(&self.public_key())
    }

    pub fn public_key_base64(&self) -> String {
        base64_encode(&self.public_key_bytes())
    }

    pub fn agree(&self, peer: &PublicKey) -> Zeroizing<Vec<u8>> {
        let shared = p256::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine());
        Zeroizing::new(shared.raw_secret_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::P256_PUBLIC_KEY_LENGTH;

    #[test]
    fn both_sides_agree() {
        let server = StaticKeyPair::generate();
        let client = EphemeralKeyPair::generate();
        let client_public = parse_public_key(&client.public_key_bytes()).unwrap();

        let client_secret = client.agree(&server.public_key());
        let server_secret = server.agree(&client_public);
        assert_eq!(*client_secret, *server_secret);
        assert_eq!(client_secret.len(), 32);
    }

    #[test]
    fn public_key_is_uncompressed_sec1() {
        let client = EphemeralKeyPair::generate();
        let bytes = client.public_key_bytes();
        assert_eq!(bytes.len(), P256_PUBLIC_KEY_LENGTH);
        assert_eq!(bytes[0], 0x04);
    }

    #[test]
    fn base64_round_trip() {
        let server = StaticKeyPair::generate();
        let parsed = parse_public_key_base64(&server.public_key_base64()).unwrap();
        assert_eq!(parsed, server.public_key());
    }

    #[test]
    fn rejects_invalid_point() {
        assert!(parse_public_key(&[0x04; 65]).is_err());
        assert!(parse_public_key(&[]).is_err());
        assert!(matches!(
            parse_public_key_base64("***"),
            Err(CryptoError::Base64Decode(_))
        ));
    }
}
