//! Protocol data model: epochs, hello payloads, proximity records, risk state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// EBID length in bytes.
pub const EBID_LENGTH: usize = 8;

/// Encrypted country code length in bytes.
pub const ECC_LENGTH: usize = 1;

/// Truncated hello MAC length in bytes.
pub const HELLO_MAC_LENGTH: usize = 5;

/// A server-issued epoch slot. `id` counts epoch durations since the time origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Epoch {
    pub id: u32,
    pub ebid: [u8; EBID_LENGTH],
    pub ecc: [u8; ECC_LENGTH],
}

/// Decoded broadcast value. Never stored as is; see [`ProximityRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HelloPayload {
    pub ecc: [u8; ECC_LENGTH],
    pub ebid: [u8; EBID_LENGTH],
    /// Low 16 bits of the sender's NTP seconds.
    pub time: u16,
    pub mac: [u8; HELLO_MAC_LENGTH],
}

/// A received hello plus local radio metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProximityRecord {
    pub ecc: [u8; ECC_LENGTH],
    pub ebid: [u8; EBID_LENGTH],
    pub mac: [u8; HELLO_MAC_LENGTH],
    pub time: u16,
    pub collected_at: DateTime<Utc>,
    pub rssi_raw: i32,
    pub rssi_calibrated: i32,
    pub tx_power: Option<i32>,
}

/// Uniqueness key of a proximity record: the decoded protocol fields.
pub type ProximityKey = ([u8; ECC_LENGTH], [u8; EBID_LENGTH], u16, [u8; HELLO_MAC_LENGTH]);

impl ProximityRecord {
    pub fn from_hello(
        payload: HelloPayload,
        collected_at: DateTime<Utc>,
        rssi_raw: i32,
        rssi_calibrated: i32,
        tx_power: Option<i32>,
    ) -> Self {
        Self {
            ecc: payload.ecc,
            ebid: payload.ebid,
            mac: payload.mac,
            time: payload.time,
            collected_at,
            rssi_raw,
            rssi_calibrated,
            tx_power,
        }
    }

    pub fn key(&self) -> ProximityKey {
        (self.ecc, self.ebid, self.time, self.mac)
    }
}

/// Exposure and report bookkeeping. `is_at_risk` is derived, never stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RiskState {
    /// Days between the exposure and the risk notification, from the server.
    pub last_exposure_time_frame: Option<i64>,
    pub last_risk_received_date: Option<DateTime<Utc>>,
    pub last_status_request_date: Option<DateTime<Utc>>,
    pub last_status_received_date: Option<DateTime<Utc>>,
    pub last_status_error_date: Option<DateTime<Utc>>,
    pub report_date: Option<DateTime<Utc>>,
    pub report_data_origin_date: Option<DateTime<Utc>>,
    pub report_token: Option<String>,
    /// Set once a report has been accepted.
    pub is_sick: bool,
}
