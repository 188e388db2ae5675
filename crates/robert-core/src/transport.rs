//! Network collaborator: request/response shapes and the transport trait.

use std::collections::BTreeMap;

use async_trait::async_trait;
use robert_crypto::base64_encode;
use serde::{Deserialize, Serialize};

use crate::codec::SignedMessage;
use crate::time::to_ntp;
use crate::types::{ProximityRecord, EBID_LENGTH, ECC_LENGTH};

// ============================================================================
// RobertTransport: host-provided network layer
// ============================================================================

/// User-implemented POST-style transport to the coordination server.
///
/// The engine applies its own timeout around every call; implementations
/// should still map socket-level drops to [`TransportErrorKind::ConnectionLost`]
/// and non-2xx replies to [`TransportErrorKind::Server`].
#[async_trait]
pub trait RobertTransport: Send + Sync {
    async fn register(&self, request: &RegisterRequest)
        -> Result<RegisterResponse, TransportError>;

    async fn status(&self, request: &AuthenticatedRequest)
        -> Result<StatusResponse, TransportError>;

    async fn report(&self, request: &ReportRequest) -> Result<ReportResponse, TransportError>;

    async fn unregister(&self, request: &AuthenticatedRequest) -> Result<(), TransportError>;

    async fn delete_exposure_history(
        &self,
        request: &AuthenticatedRequest,
    ) -> Result<(), TransportError>;
}

/// Classification of transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The link dropped mid-request; outcome unknown.
    ConnectionLost,
    /// No reply within the request timeout.
    NoResponse,
    /// The server answered with a non-2xx status.
    Server { status: u16 },
    Other,
}

/// Transport-level error with its kind.
#[derive(Debug, Clone)]
pub struct TransportError {
    pub message: String,
    pub kind: TransportErrorKind,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_kind(message, TransportErrorKind::Other)
    }

    pub fn with_kind(message: impl Into<String>, kind: TransportErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::with_kind(message, TransportErrorKind::ConnectionLost)
    }

    pub fn no_response(message: impl Into<String>) -> Self {
        Self::with_kind(message, TransportErrorKind::NoResponse)
    }

    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::with_kind(message, TransportErrorKind::Server { status })
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            TransportErrorKind::Server { status } => write!(f, "{} (status {})", self.message, status),
            _ => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for TransportError {}

// ============================================================================
// Requests / Responses
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub captcha: String,
    pub captcha_id: String,
    /// Base64 SEC1 point of the client's ephemeral key.
    #[serde(rename = "clientPublicECDHKey")]
    pub client_public_ecdh_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    /// Base64 `[IV][ciphertext+tag]` of the first epoch batch.
    pub tuples: String,
    /// NTP seconds of epoch 0.
    pub time_start: u64,
}

/// Body shared by status, unregister and delete-history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedRequest {
    pub ebid: String,
    pub epoch_id: u32,
    /// Base64 of the 32-bit NTP seconds, big endian.
    pub time: String,
    pub mac: String,
}

impl From<&SignedMessage> for AuthenticatedRequest {
    fn from(message: &SignedMessage) -> Self {
        Self {
            ebid: base64_encode(&message.ebid),
            epoch_id: message.epoch_id,
            time: base64_encode(&message.time.to_be_bytes()),
            mac: base64_encode(&message.mac),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub at_risk: bool,
    #[serde(default)]
    pub last_exposure_time_frame: Option<i64>,
    /// Renewed epoch batch, when the server issues one.
    #[serde(default)]
    pub tuples: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub token: String,
    pub contacts: Vec<Contact>,
}

/// All receptions of one (EBID, ECC) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub ebid: String,
    pub ecc: String,
    pub ids: Vec<ContactId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactId {
    /// NTP seconds at reception.
    pub time_collected_on_device: u64,
    pub time_from_hello_message: u16,
    pub mac: String,
    pub rssi_raw: i32,
    pub rssi_calibrated: i32,
}

impl ReportRequest {
    /// Group records by (EBID, ECC), receptions oldest first.
    pub fn from_records(token: impl Into<String>, records: &[ProximityRecord]) -> Self {
        let mut grouped: BTreeMap<([u8; EBID_LENGTH], [u8; ECC_LENGTH]), Vec<&ProximityRecord>> =
            BTreeMap::new();
        for record in records {
            grouped.entry((record.ebid, record.ecc)).or_default().push(record);
        }
        let contacts = grouped
            .into_iter()
            .map(|((ebid, ecc), mut receptions)| {
                receptions.sort_by_key(|r| r.collected_at);
                Contact {
                    ebid: base64_encode(&ebid),
                    ecc: base64_encode(&ecc),
                    ids: receptions
                        .into_iter()
                        .map(|r| ContactId {
                            time_collected_on_device: to_ntp(r.collected_at),
                            time_from_hello_message: r.time,
                            mac: base64_encode(&r.mac),
                            rssi_raw: r.rssi_raw,
                            rssi_calibrated: r.rssi_calibrated,
                        })
                        .collect(),
                }
            })
            .collect();
        Self {
            token: token.into(),
            contacts,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportResponse {
    #[serde(default)]
    pub report_validation_token: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
