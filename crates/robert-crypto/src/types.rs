/// AES-GCM IV length in bytes (96 bits per NIST recommendation).
pub const AES_GCM_IV_LENGTH: usize = 12;

/// AES-GCM tag length in bytes (128 bits).
pub const AES_GCM_TAG_LENGTH: usize = 16;

/// AES key length in bytes (256 bits).
pub const AES_KEY_LENGTH: usize = 32;

/// HMAC-SHA256 output length in bytes.
pub const HMAC_SHA256_LENGTH: usize = 32;

/// Uncompressed SEC1 P-256 point length: 0x04 || x || y.
pub const P256_PUBLIC_KEY_LENGTH: usize = 65;
