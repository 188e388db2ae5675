//! Cryptographic primitives for the ROBERT proximity-tracing client.
//!
//! - AES-256-GCM opening of server epoch tuples (`[IV:12][ciphertext+tag]`)
//! - HMAC-SHA256 tags for hello and request messages
//! - P-256 ECDH key agreement at registration
//! - Derivation of the authentication and encryption keys from the shared secret

pub mod aes_gcm;
pub mod base64;
pub mod ecdh;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod mac;
pub mod types;

pub use aes_gcm::{aes_gcm_decrypt, aes_gcm_encrypt, aes_gcm_encrypt_with_iv};
pub use base64::{base64_decode, base64_encode};
pub use ecdh::{parse_public_key, parse_public_key_base64, EphemeralKeyPair, StaticKeyPair};
pub use error::CryptoError;
pub use kdf::{hkdf_derive, HkdfDerivation, HmacDerivation, KeyDerivation};
pub use keys::KeyMaterial;
pub use mac::{hmac_sha256, hmac_sha256_truncated, verify_hmac_sha256};
pub use types::{AES_GCM_IV_LENGTH, AES_GCM_TAG_LENGTH, AES_KEY_LENGTH, HMAC_SHA256_LENGTH};

pub use p256::PublicKey;
