//! In-process stand-in for the coordination server.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use robert_core::{
    encrypt_tuples, to_ntp, AuthenticatedRequest, ContactFilter, EngineConfig, EngineOptions,
    Epoch, FilterError, MemoryStore, ProtocolEngine, ProximityRecord, RegisterRequest,
    RegisterResponse, RegistrationProof, ReportRequest, ReportResponse, RobertTransport,
    StatusResponse, TransportError,
};
use robert_crypto::{
    base64_decode, parse_public_key_base64, verify_hmac_sha256, HmacDerivation, KeyDerivation,
    KeyMaterial, StaticKeyPair,
};

// ============================================================================
// Time helpers
// ============================================================================

pub const EPOCH_SECS: i64 = 900;
pub const DAY: i64 = 86_400;

/// Registration instant; epoch 0 starts here.
pub fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    t0() + chrono::Duration::seconds(secs)
}

/// Mid-point of epoch `id`.
pub fn in_epoch(id: u32) -> DateTime<Utc> {
    at(i64::from(id) * EPOCH_SECS + EPOCH_SECS / 2)
}

pub fn epochs(ids: std::ops::Range<u32>, seed: u8) -> Vec<Epoch> {
    ids.map(|id| Epoch {
        id,
        ebid: [seed, (id >> 24) as u8, (id >> 16) as u8, (id >> 8) as u8, id as u8, 0, 0, seed],
        ecc: [seed],
    })
    .collect()
}

// ============================================================================
// Mock server
// ============================================================================

/// What the mock server was asked.
#[derive(Debug, Clone)]
pub enum Call {
    Register(RegisterRequest),
    Status(AuthenticatedRequest),
    Report(ReportRequest),
    Unregister(AuthenticatedRequest),
    DeleteHistory(AuthenticatedRequest),
}

/// Status reply script.
#[derive(Debug, Clone, Default)]
pub struct StatusScript {
    pub at_risk: bool,
    pub last_exposure_time_frame: Option<i64>,
    pub renew: Vec<Epoch>,
    /// Flip one bit of the sealed tuples.
    pub tamper: bool,
}

pub struct MockServer {
    pub key: StaticKeyPair,
    pub time_start: u64,
    pub initial_epochs: Mutex<Vec<Epoch>>,
    pub client_keys: Mutex<Option<KeyMaterial>>,
    pub calls: Mutex<Vec<Call>>,
    pub status: Mutex<StatusScript>,
    pub register_error: Mutex<Option<TransportError>>,
    pub status_error: Mutex<Option<TransportError>>,
    pub report_error: Mutex<Option<TransportError>>,
    pub unregister_error: Mutex<Option<TransportError>>,
    pub register_delay: Mutex<Option<Duration>>,
    pub status_delay: Mutex<Option<Duration>>,
    /// Runs after the status reply is built, before it is returned.
    pub status_hook: Mutex<Option<Box<dyn Fn() + Send>>>,
    in_flight: AtomicUsize,
    /// Highest number of requests observed in flight at once.
    pub max_in_flight: AtomicUsize,
    /// Seal registration tuples under an unrelated key.
    pub register_wrong_key: Mutex<bool>,
    pub report_token: Mutex<Option<String>>,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            key: StaticKeyPair::generate(),
            time_start: to_ntp(t0()),
            initial_epochs: Mutex::new(epochs(0..96, 0xA1)),
            client_keys: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            status: Mutex::new(StatusScript::default()),
            register_error: Mutex::new(None),
            status_error: Mutex::new(None),
            report_error: Mutex::new(None),
            unregister_error: Mutex::new(None),
            register_delay: Mutex::new(None),
            status_delay: Mutex::new(None),
            status_hook: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            register_wrong_key: Mutex::new(false),
            report_token: Mutex::new(Some("validation-token".to_string())),
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn client_keys(&self) -> KeyMaterial {
        self.client_keys.lock().unwrap().clone().expect("client registered")
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(self)
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    /// Check the request MAC the way the server would.
    fn authenticate(&self, prefix: u8, request: &AuthenticatedRequest) -> Result<(), TransportError> {
        let keys = self
            .client_keys
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| TransportError::server(404, "unknown device"))?;
        let ebid = base64_decode(&request.ebid).unwrap();
        let time = base64_decode(&request.time).unwrap();
        let mac = base64_decode(&request.mac).unwrap();
        let epoch_id = request.epoch_id.to_be_bytes();
        let parts: [&[u8]; 4] = [&[prefix], &ebid, &epoch_id, &time];
        if verify_hmac_sha256(keys.auth_key(), &parts, &mac) {
            Ok(())
        } else {
            Err(TransportError::server(401, "invalid mac"))
        }
    }
}

#[async_trait]
impl RobertTransport for MockServer {
    async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, TransportError> {
        let _in_flight = self.enter();
        self.record(Call::Register(request.clone()));
        let delay = *self.register_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(e) = self.register_error.lock().unwrap().clone() {
            return Err(e);
        }

        let client = parse_public_key_base64(&request.client_public_ecdh_key)
            .map_err(|e| TransportError::server(400, e.to_string()))?;
        let shared = self.key.agree(&client);
        let keys = HmacDerivation.derive(&shared).unwrap();

        let sealing_key = if *self.register_wrong_key.lock().unwrap() {
            [0x55u8; 32]
        } else {
            *keys.enc_key()
        };
        let epochs = self.initial_epochs.lock().unwrap().clone();
        let tuples = encrypt_tuples(&sealing_key, &epochs).unwrap();
        *self.client_keys.lock().unwrap() = Some(keys);
        Ok(RegisterResponse {
            tuples,
            time_start: self.time_start,
        })
    }

    async fn status(&self, request: &AuthenticatedRequest) -> Result<StatusResponse, TransportError> {
        let _in_flight = self.enter();
        self.record(Call::Status(request.clone()));
        let delay = *self.status_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(e) = self.status_error.lock().unwrap().clone() {
            return Err(e);
        }
        self.authenticate(0x02, request)?;

        let script = self.status.lock().unwrap().clone();
        let tuples = if script.renew.is_empty() && !script.tamper {
            None
        } else {
            let sealed = encrypt_tuples(self.client_keys().enc_key(), &script.renew).unwrap();
            Some(if script.tamper { tamper(&sealed) } else { sealed })
        };
        if let Some(hook) = self.status_hook.lock().unwrap().as_ref() {
            hook();
        }
        Ok(StatusResponse {
            at_risk: script.at_risk,
            last_exposure_time_frame: script.last_exposure_time_frame,
            tuples,
        })
    }

    async fn report(&self, request: &ReportRequest) -> Result<ReportResponse, TransportError> {
        self.record(Call::Report(request.clone()));
        if let Some(e) = self.report_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(ReportResponse {
            report_validation_token: self.report_token.lock().unwrap().clone(),
            message: Some("ok".to_string()),
        })
    }

    async fn unregister(&self, request: &AuthenticatedRequest) -> Result<(), TransportError> {
        self.record(Call::Unregister(request.clone()));
        if let Some(e) = self.unregister_error.lock().unwrap().clone() {
            return Err(e);
        }
        self.authenticate(0x03, request)
    }

    async fn delete_exposure_history(
        &self,
        request: &AuthenticatedRequest,
    ) -> Result<(), TransportError> {
        self.record(Call::DeleteHistory(request.clone()));
        self.authenticate(0x04, request)
    }
}

/// Counts a request as in flight until dropped.
struct InFlight<'a>(&'a MockServer);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Flip the last bit of the authentication tag.
fn tamper(sealed: &str) -> String {
    let mut bytes = base64_decode(sealed).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    robert_crypto::base64_encode(&bytes)
}

// ============================================================================
// Filters
// ============================================================================

pub struct FailingFilter;

impl ContactFilter for FailingFilter {
    fn filter(&self, _records: Vec<ProximityRecord>) -> Result<Vec<ProximityRecord>, FilterError> {
        Err(FilterError("risk model unavailable".to_string()))
    }
}

// ============================================================================
// Engine setup
// ============================================================================

pub struct Harness {
    pub engine: Arc<ProtocolEngine>,
    pub server: Arc<MockServer>,
    pub store: Arc<MemoryStore>,
}

pub fn config(server: &MockServer) -> EngineConfig {
    EngineConfig {
        server_public_key: Some(server.key.public_key_base64()),
        request_timeout_ms: 1_000,
        ..EngineConfig::default()
    }
}

pub fn harness() -> Harness {
    harness_with(|_| {})
}

pub fn harness_with(customize: impl FnOnce(&mut EngineOptions)) -> Harness {
    let server = MockServer::new();
    let store = Arc::new(MemoryStore::new());
    let mut options = EngineOptions::new(store.clone(), server.clone());
    options.config = config(&server);
    customize(&mut options);
    let engine = Arc::new(ProtocolEngine::new(options).unwrap());
    Harness {
        engine,
        server,
        store,
    }
}

pub fn proof() -> RegistrationProof {
    RegistrationProof {
        captcha: "xK4f2".to_string(),
        captcha_id: "captcha-1".to_string(),
    }
}

pub async fn registered() -> Harness {
    let h = harness();
    h.engine.register(&proof()).await.unwrap();
    h
}
