//! Client engine of the ROBERT proximity-tracing protocol.
//!
//! - Epoch table and key material lifecycle (`KeyStore`, `EpochResolver`)
//! - Hello, request and tuple codecs (`codec`)
//! - Registration, status, report and unregister flows (`ProtocolEngine`)
//! - Exposure risk rules with debounce (`RiskEngine`)
//! - Deduplicated proximity log with retention (`ProximityLog`)
//!
//! Persistence, networking and contact filtering are host-provided through
//! the [`Store`], [`RobertTransport`] and [`ContactFilter`] traits.

pub mod codec;
pub mod config;
pub mod engine;
pub mod epoch;
pub mod error;
pub mod events;
pub mod filter;
pub mod key_store;
pub mod proximity;
pub mod risk;
pub mod store;
pub mod time;
pub mod transport;
pub mod types;

pub use codec::{
    build_hello, build_signed_message, decrypt_tuples, encode_hello, encrypt_tuples,
    parse_hello_payload, RequestKind, SignedMessage, HELLO_PAYLOAD_LENGTH, HELLO_PREFIX,
};
pub use config::EngineConfig;
pub use engine::{
    EngineOptions, ProtocolEngine, RegistrationProof, StatusOutcome, UnregisterOutcome,
};
pub use epoch::EpochResolver;
pub use error::{CodecError, EngineError, StorageError, CLOCK_SKEW_STATUS};
pub use events::{EngineEvent, StopReason};
pub use filter::{ContactFilter, FilterError, PassThroughFilter};
pub use key_store::{KeyState, KeyStore};
pub use proximity::ProximityLog;
pub use risk::RiskEngine;
pub use store::{MemoryStore, Store};
pub use time::{from_ntp, hello_time, to_ntp, NTP_UNIX_OFFSET};
pub use transport::{
    AuthenticatedRequest, Contact, ContactId, RegisterRequest, RegisterResponse, ReportRequest,
    ReportResponse, RobertTransport, StatusResponse, TransportError, TransportErrorKind,
};
pub use types::{Epoch, HelloPayload, ProximityRecord, RiskState};
