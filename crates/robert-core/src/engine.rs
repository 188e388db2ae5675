//! ProtocolEngine: registration, status, report, unregister and the radio
//! entry points, wired to the host's store, transport and filter.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use robert_crypto::{
    parse_public_key_base64, EphemeralKeyPair, HmacDerivation, KeyDerivation, KeyMaterial,
    PublicKey,
};
use tokio::sync::{broadcast, Mutex};

use crate::codec::{
    build_hello, build_signed_message, decrypt_tuples, encode_hello, parse_hello_payload,
    RequestKind, SignedMessage, HELLO_PAYLOAD_LENGTH,
};
use crate::config::EngineConfig;
use crate::epoch::EpochResolver;
use crate::error::{CodecError, EngineError, StorageError};
use crate::events::{EngineEvent, StopReason};
use crate::filter::{ContactFilter, PassThroughFilter};
use crate::key_store::KeyStore;
use crate::proximity::ProximityLog;
use crate::risk::RiskEngine;
use crate::store::Store;
use crate::time::{hello_time, hello_time_distance, to_ntp};
use crate::transport::{
    AuthenticatedRequest, RegisterRequest, ReportRequest, RobertTransport, TransportError,
};
use crate::types::{Epoch, ProximityRecord, RiskState};

const RISK_STATE_KEY: &str = "robert.riskState";
const PROXIMITY_ACTIVE_KEY: &str = "robert.proximityActive";

// ============================================================================
// Options / Outcomes
// ============================================================================

/// Collaborators and configuration for [`ProtocolEngine::new`].
pub struct EngineOptions {
    pub config: EngineConfig,
    pub store: Arc<dyn Store>,
    pub transport: Arc<dyn RobertTransport>,
    pub filter: Arc<dyn ContactFilter>,
    /// Defaults to [`HmacDerivation`].
    pub key_derivation: Option<Arc<dyn KeyDerivation>>,
}

impl EngineOptions {
    /// Default configuration, pass-through filter, HMAC key derivation.
    pub fn new(store: Arc<dyn Store>, transport: Arc<dyn RobertTransport>) -> Self {
        Self {
            config: EngineConfig::default(),
            store,
            transport,
            filter: Arc::new(PassThroughFilter),
            key_derivation: None,
        }
    }
}

/// Proof of humanity sent with a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationProof {
    pub captcha: String,
    pub captcha_id: String,
}

/// Result of a successful status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusOutcome {
    /// Derived risk after applying the reply.
    pub at_risk: bool,
    /// Whether the risk timestamp was refreshed (false while debounced).
    pub risk_updated: bool,
    pub last_exposure_time_frame: Option<i64>,
    /// Size of the new epoch table, 0 when the server sent none.
    pub epochs_renewed: usize,
}

/// Result of an unregister that did not block.
#[derive(Debug)]
pub enum UnregisterOutcome {
    /// The server acknowledged, or the device was never registered.
    Completed,
    /// The server rejected the request; local data was wiped anyway.
    LocalOnly { server_error: EngineError },
}

// ============================================================================
// ProtocolEngine
// ============================================================================

/// Client protocol engine. Construct once and share by `Arc`.
///
/// Network operations serialize on an internal writer gate. The radio entry
/// points ([`provide_hello_payload`](Self::provide_hello_payload),
/// [`on_received`](Self::on_received)) never take the gate and only read key
/// state, so they can run from another thread while a request is in flight.
pub struct ProtocolEngine {
    config: EngineConfig,
    resolver: EpochResolver,
    risk: RiskEngine,
    keys: KeyStore,
    proximity: ProximityLog,
    store: Arc<dyn Store>,
    transport: Arc<dyn RobertTransport>,
    filter: Arc<dyn ContactFilter>,
    key_derivation: Arc<dyn KeyDerivation>,
    server_key: Option<PublicKey>,
    gate: Mutex<()>,
    risk_state: parking_lot::Mutex<RiskState>,
    proximity_active: AtomicBool,
    events: broadcast::Sender<EngineEvent>,
}

impl ProtocolEngine {
    /// Validate the configuration and load persisted state from the store.
    pub fn new(options: EngineOptions) -> Result<Self, EngineError> {
        let EngineOptions {
            config,
            store,
            transport,
            filter,
            key_derivation,
        } = options;
        config.validate()?;

        let server_key = config
            .server_public_key
            .as_deref()
            .map(parse_public_key_base64)
            .transpose()?;

        let keys = KeyStore::load(store.clone())?;
        let risk_state: RiskState = match store.get_value(RISK_STATE_KEY)? {
            Some(raw) => serde_json::from_str(&raw).map_err(StorageError::from)?,
            None => RiskState::default(),
        };
        let proximity_active = keys.is_registered()
            && store.get_value(PROXIMITY_ACTIVE_KEY)?.as_deref() == Some("true");

        let (events, _) = broadcast::channel(config.event_capacity);
        let proximity = ProximityLog::new(
            store.clone(),
            config.proximity_retention_days,
            events.clone(),
        );

        tracing::debug!(
            registered = keys.is_registered(),
            proximity_active,
            "protocol engine loaded"
        );

        Ok(Self {
            resolver: EpochResolver::new(config.epoch_duration_secs),
            risk: RiskEngine::new(&config),
            keys,
            proximity,
            store,
            transport,
            filter,
            key_derivation: key_derivation.unwrap_or_else(|| Arc::new(HmacDerivation)),
            server_key,
            gate: Mutex::new(()),
            risk_state: parking_lot::Mutex::new(risk_state),
            proximity_active: AtomicBool::new(proximity_active),
            events,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn is_registered(&self) -> bool {
        self.keys.is_registered()
    }

    pub fn epochs(&self) -> Vec<Epoch> {
        self.keys.epochs()
    }

    pub fn risk_state(&self) -> RiskState {
        self.risk_state.lock().clone()
    }

    pub fn is_at_risk(&self, now: DateTime<Utc>) -> bool {
        self.risk.is_at_risk(&self.risk_state.lock(), now)
    }

    pub fn proximity_active(&self) -> bool {
        self.proximity_active.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------------

    /// Register against the server key from the configuration.
    pub async fn register(&self, proof: &RegistrationProof) -> Result<(), EngineError> {
        let server_key = self.server_key.as_ref().ok_or_else(|| {
            EngineError::InvalidConfig("serverPublicKey is required to register".to_string())
        })?;
        self.register_with_server_key(proof, server_key).await
    }

    /// Register and install fresh key material, time origin and epochs.
    ///
    /// Nothing is written until the reply has been fully decrypted, and the
    /// final write is all-or-nothing. A dropped or timed-out call leaves the
    /// previous state untouched.
    pub async fn register_with_server_key(
        &self,
        proof: &RegistrationProof,
        server_key: &PublicKey,
    ) -> Result<(), EngineError> {
        let _gate = self.gate.lock().await;

        let ephemeral = EphemeralKeyPair::generate();
        let request = RegisterRequest {
            captcha: proof.captcha.clone(),
            captcha_id: proof.captcha_id.clone(),
            client_public_ecdh_key: ephemeral.public_key_base64(),
        };
        let response = self
            .call("register", self.transport.register(&request))
            .await?;

        let shared = ephemeral.agree(server_key);
        let keys = self.key_derivation.derive(&shared)?;
        let epochs = self.open_tuples(&keys, &response.tuples)?;
        if epochs.is_empty() {
            return Err(CodecError::MalformedTuples("empty epoch batch".to_string()).into());
        }

        let count = epochs.len();
        self.keys.install(keys, response.time_start, epochs)?;
        tracing::info!(epochs = count, "device registered");
        self.emit(EngineEvent::Registered);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Radio entry points
    // ------------------------------------------------------------------------

    /// Encoded hello for the epoch containing `now`.
    ///
    /// Returns `None` while capture is off. When no epoch matches `now`
    /// exactly, capture is switched off and `None` is returned; a stale EBID
    /// is never broadcast.
    pub fn provide_hello_payload(
        &self,
        now: DateTime<Utc>,
    ) -> Option<[u8; HELLO_PAYLOAD_LENGTH]> {
        if !self.proximity_active() {
            return None;
        }
        let ntp = to_ntp(now);
        let resolved = self.keys.read(|state| {
            let keys = state.keys.clone()?;
            let origin = state.time_origin?;
            let epoch = self
                .resolver
                .current_epoch(&state.epochs, origin, ntp, false)
                .cloned();
            Some((keys, epoch))
        });
        let (keys, epoch) = match resolved {
            Some((keys, Some(epoch))) => (keys, epoch),
            Some((_, None)) => {
                self.stop_proximity(StopReason::NoCurrentEpoch);
                return None;
            }
            None => {
                self.stop_proximity(StopReason::NotRegistered);
                return None;
            }
        };
        match build_hello(&epoch, ntp, keys.auth_key()) {
            Ok(hello) => Some(encode_hello(&hello)),
            Err(e) => {
                tracing::warn!("hello payload not built: {e}");
                None
            }
        }
    }

    /// Parse and log a received broadcast. Malformed, out-of-window and
    /// duplicate payloads are dropped and yield `Ok(false)`.
    pub fn on_received(
        &self,
        bytes: &[u8],
        rssi_raw: i32,
        rssi_calibrated: i32,
        tx_power: Option<i32>,
        collected_at: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let Some(payload) = parse_hello_payload(bytes) else {
            tracing::debug!(len = bytes.len(), "malformed hello payload dropped");
            return Ok(false);
        };
        let local = hello_time(to_ntp(collected_at));
        let drift = hello_time_distance(payload.time, local);
        if drift > self.config.hello_time_tolerance_secs {
            tracing::debug!(drift, "hello payload outside time tolerance dropped");
            return Ok(false);
        }
        let record =
            ProximityRecord::from_hello(payload, collected_at, rssi_raw, rssi_calibrated, tx_power);
        Ok(self.proximity.insert(&record)?)
    }

    /// Switch proximity capture. Enabling requires an epoch for `now`.
    pub fn set_proximity_active(&self, active: bool, now: DateTime<Utc>) -> Result<(), EngineError> {
        if active {
            let ntp = to_ntp(now);
            self.keys.read(|state| {
                let origin = match (&state.keys, state.time_origin) {
                    (Some(_), Some(origin)) if state.is_registered() => origin,
                    _ => return Err(EngineError::NotRegistered),
                };
                self.resolver
                    .current_epoch(&state.epochs, origin, ntp, false)
                    .map(|_| ())
                    .ok_or(EngineError::NoEpoch)
            })?;
        }
        self.store
            .set_value(PROXIMITY_ACTIVE_KEY, if active { "true" } else { "false" })?;
        self.proximity_active.store(active, Ordering::SeqCst);
        tracing::info!(active, "proximity capture toggled");
        Ok(())
    }

    /// Remove proximity records past the retention window.
    pub fn prune_proximity(&self, now: DateTime<Utc>) -> Result<usize, EngineError> {
        Ok(self.proximity.prune(now)?)
    }

    // ------------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------------

    /// Poll the server for exposure status and renewed epochs.
    ///
    /// The reply is decrypted before anything is applied. On failure
    /// `lastStatusErrorDate` is recorded, except when the connection was
    /// lost.
    pub async fn check_status(&self, now: DateTime<Utc>) -> Result<StatusOutcome, EngineError> {
        let _gate = self.gate.lock().await;

        let (keys, message) = self.sign(RequestKind::Status, now)?;
        self.update_risk(|state| state.last_status_request_date = Some(now))?;

        let request = AuthenticatedRequest::from(&message);
        let result = match self.call("status", self.transport.status(&request)).await {
            Ok(response) => {
                let epochs = match response.tuples.as_deref() {
                    Some(tuples) => self.open_tuples(&keys, tuples),
                    None => Ok(Vec::new()),
                };
                epochs.map(|epochs| (response, epochs))
            }
            Err(e) => Err(e),
        };

        let (response, epochs) = match result {
            Ok(ok) => ok,
            Err(e) => return Err(self.status_failed(now, e)),
        };

        // Epochs and risk state are two store entries; a failed risk write
        // puts the previous epoch table back.
        let previous_epochs = self.keys.epochs();
        let epochs_renewed = match self.keys.replace_epochs(epochs) {
            Ok(count) => count,
            Err(e) => return Err(self.status_failed(now, e.into())),
        };

        let was_at_risk = self.is_at_risk(now);
        let risk = self.risk;
        let applied = self.update_risk(|state| {
            let updated = risk.apply_status_outcome(
                state,
                response.at_risk,
                response.last_exposure_time_frame,
                now,
            );
            state.last_status_received_date = Some(now);
            state.last_status_error_date = None;
            updated
        });
        let risk_updated = match applied {
            Ok(updated) => updated,
            Err(e) => {
                if epochs_renewed > 0 {
                    if let Err(rollback) = self.keys.replace_epochs(previous_epochs) {
                        tracing::warn!("epoch table rollback failed: {rollback}");
                    }
                }
                return Err(self.status_failed(now, e));
            }
        };

        if epochs_renewed > 0 {
            tracing::info!(count = epochs_renewed, "epoch table renewed");
            self.emit(EngineEvent::EpochsRenewed {
                count: epochs_renewed,
            });
        }
        let at_risk = self.is_at_risk(now);
        if at_risk != was_at_risk {
            tracing::info!(at_risk, "exposure risk changed");
            self.emit(EngineEvent::RiskChanged { at_risk });
        }

        Ok(StatusOutcome {
            at_risk,
            risk_updated,
            last_exposure_time_frame: response.last_exposure_time_frame,
            epochs_renewed,
        })
    }

    /// Acknowledge a risk notification. The exposure time frame is kept.
    pub fn clear_at_risk_alert(&self) -> Result<(), EngineError> {
        let risk = self.risk;
        let had_alert = self.update_risk(|state| {
            let had_alert = state.last_risk_received_date.is_some();
            risk.clear_at_risk_alert(state);
            had_alert
        })?;
        if had_alert {
            self.emit(EngineEvent::RiskChanged { at_risk: false });
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Report
    // ------------------------------------------------------------------------

    /// Upload the proximity history of a confirmed case.
    ///
    /// Only records collected within `[origin, now]` leave the device, where
    /// `origin` is the earliest of the symptom and sample lower bounds. On
    /// success the log is cleared and the device is marked sick; on failure
    /// nothing changes. Once the server has accepted, local bookkeeping
    /// failures are logged and the token is still returned, so an accepted
    /// upload is never retried.
    pub async fn report(
        &self,
        verification_code: &str,
        symptoms_onset: Option<DateTime<Utc>>,
        positive_test_date: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, EngineError> {
        let _gate = self.gate.lock().await;
        if !self.keys.is_registered() {
            return Err(EngineError::NotRegistered);
        }

        let origin = self.report_origin(symptoms_onset, positive_test_date);
        let records = self
            .proximity
            .records_between(origin.unwrap_or(DateTime::<Utc>::MIN_UTC), now)?;
        let found = records.len();
        let contacts = self.filter.filter(records).map_err(|e| {
            tracing::warn!("contact filtering failed: {e}");
            EngineError::from(e)
        })?;

        let request = ReportRequest::from_records(verification_code, &contacts);
        tracing::debug!(
            records = found,
            kept = contacts.len(),
            contacts = request.contacts.len(),
            "uploading report"
        );
        let response = self
            .call("report", self.transport.report(&request))
            .await?;

        let token = response.report_validation_token;
        let marked = self.update_risk(|state| {
            state.is_sick = true;
            state.report_token = token.clone();
            state.report_date = Some(now);
            state.report_data_origin_date = origin;
        });
        if let Err(e) = marked {
            tracing::warn!("report accepted but risk state not persisted: {e}");
        }
        if let Err(e) = self.proximity.clear() {
            tracing::warn!("report accepted but proximity log not cleared: {e}");
        }
        tracing::info!(contacts = request.contacts.len(), "report accepted");
        self.emit(EngineEvent::Reported);
        Ok(token)
    }

    fn report_origin(
        &self,
        symptoms_onset: Option<DateTime<Utc>>,
        positive_test_date: Option<DateTime<Utc>>,
    ) -> Option<DateTime<Utc>> {
        let before = |date: Option<DateTime<Utc>>, days: i64| {
            date.map(|d| {
                Duration::try_days(days)
                    .and_then(|span| d.checked_sub_signed(span))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC)
            })
        };
        let symptoms = before(symptoms_onset, self.config.pre_symptoms_span_days);
        let sample = before(positive_test_date, self.config.positive_sample_span_days);
        match (symptoms, sample) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    // ------------------------------------------------------------------------
    // Unregister / delete history / reset
    // ------------------------------------------------------------------------

    /// Unregister from the server and wipe local data.
    ///
    /// If the request may not have reached the server (connection lost or
    /// no response) the error is returned and nothing is wiped; the caller
    /// should retry. Any other server failure still wipes local data and is
    /// reported through [`UnregisterOutcome::LocalOnly`].
    pub async fn unregister(&self, now: DateTime<Utc>) -> Result<UnregisterOutcome, EngineError> {
        let _gate = self.gate.lock().await;

        if !self.keys.is_registered() {
            self.wipe_local()?;
            self.emit(EngineEvent::Unregistered);
            return Ok(UnregisterOutcome::Completed);
        }

        let (_, message) = self.sign(RequestKind::Unregister, now)?;
        let request = AuthenticatedRequest::from(&message);
        let outcome = match self
            .call("unregister", self.transport.unregister(&request))
            .await
        {
            Ok(()) => UnregisterOutcome::Completed,
            Err(e) if e.is_blocking() => return Err(e),
            Err(e) => {
                tracing::warn!("unregister rejected, wiping local data anyway: {e}");
                UnregisterOutcome::LocalOnly { server_error: e }
            }
        };

        self.wipe_local()?;
        tracing::info!("device unregistered");
        self.emit(EngineEvent::Unregistered);
        Ok(outcome)
    }

    /// Ask the server to forget this device's exposure history. Local state
    /// is not touched.
    pub async fn delete_exposure_history(&self, now: DateTime<Utc>) -> Result<(), EngineError> {
        let _gate = self.gate.lock().await;
        let (_, message) = self.sign(RequestKind::DeleteHistory, now)?;
        let request = AuthenticatedRequest::from(&message);
        self.call(
            "delete_exposure_history",
            self.transport.delete_exposure_history(&request),
        )
        .await
    }

    /// Wipe every piece of local state without contacting the server.
    pub async fn reset(&self) -> Result<(), EngineError> {
        let _gate = self.gate.lock().await;
        self.wipe_local()?;
        tracing::info!("local data reset");
        self.emit(EngineEvent::DataReset);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Run a transport call under the request timeout.
    async fn call<T>(
        &self,
        operation: &'static str,
        request: impl Future<Output = Result<T, TransportError>>,
    ) -> Result<T, EngineError> {
        match tokio::time::timeout(self.config.request_timeout(), request).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(operation, kind = ?e.kind, "request failed: {e}");
                Err(e.into())
            }
            Err(_) => {
                tracing::warn!(operation, "request timed out");
                Err(TransportError::no_response(format!("{operation}: no response")).into())
            }
        }
    }

    /// Record `lastStatusErrorDate` for `error` unless the connection was
    /// lost, and hand the error back.
    fn status_failed(&self, now: DateTime<Utc>, error: EngineError) -> EngineError {
        if !error.is_connection_lost() {
            if let Err(e) = self.update_risk(|state| state.last_status_error_date = Some(now)) {
                tracing::warn!("status error date not persisted: {e}");
            }
        }
        error
    }

    /// Key material plus a signed message for the current (or last) epoch.
    fn sign(
        &self,
        kind: RequestKind,
        now: DateTime<Utc>,
    ) -> Result<(KeyMaterial, SignedMessage), EngineError> {
        let ntp = to_ntp(now);
        let (keys, epoch) = self.keys.read(|state| {
            let (Some(keys), Some(origin)) = (&state.keys, state.time_origin) else {
                return Err(EngineError::NotRegistered);
            };
            let epoch = self
                .resolver
                .current_epoch(&state.epochs, origin, ntp, true)
                .cloned()
                .ok_or(EngineError::NoEpoch)?;
            Ok((keys.clone(), epoch))
        })?;
        let message = build_signed_message(kind, &epoch, ntp, keys.auth_key())?;
        Ok((keys, message))
    }

    fn open_tuples(&self, keys: &KeyMaterial, tuples: &str) -> Result<Vec<Epoch>, EngineError> {
        decrypt_tuples(keys.enc_key(), tuples).map_err(|e| {
            tracing::warn!("epoch tuples rejected: {e}");
            EngineError::from(e)
        })
    }

    /// Mutate a copy of the risk state, persist it, then publish it.
    fn update_risk<R>(&self, f: impl FnOnce(&mut RiskState) -> R) -> Result<R, EngineError> {
        let mut guard = self.risk_state.lock();
        let mut next = guard.clone();
        let result = f(&mut next);
        let encoded = serde_json::to_string(&next).map_err(StorageError::from)?;
        self.store.set_value(RISK_STATE_KEY, &encoded)?;
        *guard = next;
        Ok(result)
    }

    fn stop_proximity(&self, reason: StopReason) {
        if !self.proximity_active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.store.set_value(PROXIMITY_ACTIVE_KEY, "false") {
            tracing::warn!("proximity flag not persisted: {e}");
        }
        tracing::warn!(?reason, "proximity capture stopped");
        self.emit(EngineEvent::ProximityStopped { reason });
    }

    fn wipe_local(&self) -> Result<(), EngineError> {
        self.stop_proximity(StopReason::NotRegistered);
        self.keys.wipe()?;
        self.proximity.clear()?;
        {
            let mut guard = self.risk_state.lock();
            self.store.remove_value(RISK_STATE_KEY)?;
            *guard = RiskState::default();
        }
        self.store.remove_value(PROXIMITY_ACTIVE_KEY)?;
        Ok(())
    }

    fn emit(&self, event: EngineEvent) {
        let _ = self.events.send(event);
    }
}
