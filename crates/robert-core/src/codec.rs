//! Message codec: hello payloads, authenticated requests and epoch tuples.
//!
//! Hello (16 bytes): [ECC:1][EBID:8][TIME:2 BE][MAC:5]
//!   MAC = HMAC-SHA256(KA, 0x01 | ECC | EBID | TIME)[..5]
//! Request: MAC = HMAC-SHA256(KA, prefix | EBID | EPOCH_ID:4 BE | TIME:4 BE)
//! Tuples: base64([IV:12][AES-256-GCM(KEA, json)+tag])

use std::collections::HashSet;

use robert_crypto::{
    aes_gcm_decrypt, aes_gcm_encrypt, base64_decode, base64_encode, hmac_sha256,
    hmac_sha256_truncated, HMAC_SHA256_LENGTH,
};
use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::time::{hello_time, ntp_u32};
use crate::types::{Epoch, HelloPayload, EBID_LENGTH, ECC_LENGTH, HELLO_MAC_LENGTH};

/// Prefix of the hello MAC input.
pub const HELLO_PREFIX: u8 = 0x01;

/// Total hello payload length.
pub const HELLO_PAYLOAD_LENGTH: usize = ECC_LENGTH + EBID_LENGTH + 2 + HELLO_MAC_LENGTH;

/// Authenticated requests sent to the server, each with its own MAC prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Status,
    Unregister,
    DeleteHistory,
}

impl RequestKind {
    pub const fn prefix(self) -> u8 {
        match self {
            Self::Status => 0x02,
            Self::Unregister => 0x03,
            Self::DeleteHistory => 0x04,
        }
    }
}

/// Fields of an authenticated request, before transport encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMessage {
    pub epoch_id: u32,
    pub ebid: [u8; EBID_LENGTH],
    /// 32-bit NTP seconds.
    pub time: u32,
    pub mac: [u8; HMAC_SHA256_LENGTH],
}

/// Build and authenticate a request for `epoch` at NTP time `now`.
pub fn build_signed_message(
    kind: RequestKind,
    epoch: &Epoch,
    now: u64,
    auth_key: &[u8],
) -> Result<SignedMessage, CodecError> {
    let time = ntp_u32(now);
    let mac = hmac_sha256(
        auth_key,
        &[
            &[kind.prefix()],
            &epoch.ebid,
            &epoch.id.to_be_bytes(),
            &time.to_be_bytes(),
        ],
    )?;
    Ok(SignedMessage {
        epoch_id: epoch.id,
        ebid: epoch.ebid,
        time,
        mac,
    })
}

/// Build the authenticated hello for `epoch` at NTP time `now`.
pub fn build_hello(epoch: &Epoch, now: u64, auth_key: &[u8]) -> Result<HelloPayload, CodecError> {
    let time = hello_time(now);
    let tag = hmac_sha256_truncated(
        auth_key,
        &[&[HELLO_PREFIX], &epoch.ecc, &epoch.ebid, &time.to_be_bytes()],
        HELLO_MAC_LENGTH,
    )?;
    let mut mac = [0u8; HELLO_MAC_LENGTH];
    mac.copy_from_slice(&tag);
    Ok(HelloPayload {
        ecc: epoch.ecc,
        ebid: epoch.ebid,
        time,
        mac,
    })
}

pub fn encode_hello(payload: &HelloPayload) -> [u8; HELLO_PAYLOAD_LENGTH] {
    let mut out = [0u8; HELLO_PAYLOAD_LENGTH];
    let (ecc, rest) = out.split_at_mut(ECC_LENGTH);
    let (ebid, rest) = rest.split_at_mut(EBID_LENGTH);
    let (time, mac) = rest.split_at_mut(2);
    ecc.copy_from_slice(&payload.ecc);
    ebid.copy_from_slice(&payload.ebid);
    time.copy_from_slice(&payload.time.to_be_bytes());
    mac.copy_from_slice(&payload.mac);
    out
}

/// Decode a received broadcast value. Anything but exactly one complete
/// payload yields `None`; the caller drops the reception.
pub fn parse_hello_payload(bytes: &[u8]) -> Option<HelloPayload> {
    if bytes.len() != HELLO_PAYLOAD_LENGTH {
        return None;
    }
    let (ecc, rest) = bytes.split_at(ECC_LENGTH);
    let (ebid, rest) = rest.split_at(EBID_LENGTH);
    let (time, mac) = rest.split_at(2);
    Some(HelloPayload {
        ecc: ecc.try_into().ok()?,
        ebid: ebid.try_into().ok()?,
        time: u16::from_be_bytes(time.try_into().ok()?),
        mac: mac.try_into().ok()?,
    })
}

// ============================================================================
// Epoch tuples
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TupleEntry {
    epoch_id: u32,
    key: TupleKey,
}

#[derive(Debug, Serialize, Deserialize)]
struct TupleKey {
    ebid: String,
    ecc: String,
}

fn decode_field<const N: usize>(name: &str, encoded: &str) -> Result<[u8; N], CodecError> {
    let bytes = base64_decode(encoded)
        .map_err(|e| CodecError::MalformedTuples(format!("{name}: {e}")))?;
    bytes.as_slice().try_into().map_err(|_| {
        CodecError::MalformedTuples(format!(
            "{name}: expected {N} bytes, got {}",
            bytes.len()
        ))
    })
}

/// Decrypt the base64 tuples blob into an epoch list.
///
/// Fails as a whole on a bad tag, undecodable JSON, wrong field sizes or
/// duplicate epoch ids.
pub fn decrypt_tuples(enc_key: &[u8], tuples: &str) -> Result<Vec<Epoch>, CodecError> {
    let sealed = base64_decode(tuples)
        .map_err(|e| CodecError::MalformedTuples(format!("base64: {e}")))?;
    let plaintext = aes_gcm_decrypt(enc_key, &sealed)?;
    let entries: Vec<TupleEntry> = serde_json::from_slice(&plaintext)
        .map_err(|e| CodecError::MalformedTuples(e.to_string()))?;

    let mut seen = HashSet::with_capacity(entries.len());
    let mut epochs = Vec::with_capacity(entries.len());
    for entry in entries {
        if !seen.insert(entry.epoch_id) {
            return Err(CodecError::MalformedTuples(format!(
                "duplicate epoch id {}",
                entry.epoch_id
            )));
        }
        epochs.push(Epoch {
            id: entry.epoch_id,
            ebid: decode_field("ebid", &entry.key.ebid)?,
            ecc: decode_field("ecc", &entry.key.ecc)?,
        });
    }
    epochs.sort_by_key(|e| e.id);
    Ok(epochs)
}

/// Inverse of [`decrypt_tuples`]; what the server does when issuing epochs.
pub fn encrypt_tuples(enc_key: &[u8], epochs: &[Epoch]) -> Result<String, CodecError> {
    let entries: Vec<TupleEntry> = epochs
        .iter()
        .map(|e| TupleEntry {
            epoch_id: e.id,
            key: TupleKey {
                ebid: base64_encode(&e.ebid),
                ecc: base64_encode(&e.ecc),
            },
        })
        .collect();
    let plaintext =
        serde_json::to_vec(&entries).map_err(|e| CodecError::MalformedTuples(e.to_string()))?;
    Ok(base64_encode(&aes_gcm_encrypt(enc_key, &plaintext)?))
}
