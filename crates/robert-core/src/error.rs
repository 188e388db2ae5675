use robert_crypto::CryptoError;
use thiserror::Error;

use crate::filter::FilterError;
use crate::transport::{TransportError, TransportErrorKind};

/// Server status code reserved for "device time not aligned with server time".
pub const CLOCK_SKEW_STATUS: u16 = 430;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt stored value for {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Storage backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Malformed tuples: {0}")]
    MalformedTuples(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Device is not registered")]
    NotRegistered,

    #[error("No epoch available for the current time")]
    NoEpoch,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl EngineError {
    /// Missing key material or epoch; never retried automatically.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::NotRegistered | Self::NoEpoch)
    }

    /// AEAD failure, bad tag or undecodable plaintext.
    pub fn is_crypto(&self) -> bool {
        matches!(self, Self::Crypto(_) | Self::Codec(_))
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Transport(e) if e.kind == TransportErrorKind::ConnectionLost)
    }

    /// The request may not have reached the server; the caller should retry
    /// rather than assume any outcome.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            Self::Transport(e)
                if matches!(e.kind, TransportErrorKind::ConnectionLost | TransportErrorKind::NoResponse)
        )
    }

    pub fn server_status(&self) -> Option<u16> {
        match self {
            Self::Transport(TransportError {
                kind: TransportErrorKind::Server { status },
                ..
            }) => Some(*status),
            _ => None,
        }
    }

    pub fn is_clock_skew(&self) -> bool {
        self.server_status() == Some(CLOCK_SKEW_STATUS)
    }
}
