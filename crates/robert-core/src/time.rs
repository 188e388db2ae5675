//! Protocol time: NTP seconds (since 1900-01-01T00:00:00Z).

use chrono::{DateTime, Utc};

/// Seconds between the NTP era origin and the Unix epoch.
pub const NTP_UNIX_OFFSET: i64 = 2_208_988_800;

/// Convert to NTP seconds. Instants before 1900 clamp to 0.
pub fn to_ntp(instant: DateTime<Utc>) -> u64 {
    let secs = instant.timestamp().saturating_add(NTP_UNIX_OFFSET);
    u64::try_from(secs).unwrap_or(0)
}

pub fn from_ntp(ntp: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(ntp).ok()?.checked_sub(NTP_UNIX_OFFSET)?;
    DateTime::from_timestamp(secs, 0)
}

/// The 32-bit NTP seconds carried by authenticated requests.
pub fn ntp_u32(ntp: u64) -> u32 {
    ntp as u32
}

/// The 16 least-significant bits carried by hello messages.
pub fn hello_time(ntp: u64) -> u16 {
    (ntp & 0xffff) as u16
}

/// Distance in seconds between two 16-bit hello times, modulo 2^16.
pub fn hello_time_distance(a: u16, b: u16) -> u64 {
    let diff = a.wrapping_sub(b) as i16;
    u64::from(diff.unsigned_abs())
}
