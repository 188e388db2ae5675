//! Exposure state derived from stored risk timestamps.

use chrono::{DateTime, Duration, Utc};

use crate::config::EngineConfig;
use crate::types::RiskState;

/// Pure rules over [`RiskState`]; the engine owns and persists the state.
#[derive(Debug, Clone, Copy)]
pub struct RiskEngine {
    quarantine: Duration,
    debounce: Duration,
}

impl RiskEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            quarantine: Duration::days(config.quarantine_period_days),
            debounce: Duration::hours(config.risk_debounce_hours),
        }
    }

    /// `last_risk_received_date - last_exposure_time_frame days + quarantine`.
    pub fn isolation_end(&self, state: &RiskState) -> Option<DateTime<Utc>> {
        let received = state.last_risk_received_date?;
        let frame = Duration::try_days(state.last_exposure_time_frame?)?;
        received
            .checked_sub_signed(frame)?
            .checked_add_signed(self.quarantine)
    }

    pub fn is_at_risk(&self, state: &RiskState, now: DateTime<Utc>) -> bool {
        self.isolation_end(state).is_some_and(|end| end > now)
    }

    /// Fold a status reply into the state. Returns whether the risk
    /// timestamp moved.
    ///
    /// The exposure time frame is always overwritten. The risk timestamp is
    /// only refreshed when the previous one is missing or older than the
    /// debounce window, so periodic polls do not restart the countdown.
    pub fn apply_status_outcome(
        &self,
        state: &mut RiskState,
        server_at_risk: bool,
        server_exposure_time_frame: Option<i64>,
        now: DateTime<Utc>,
    ) -> bool {
        state.last_exposure_time_frame = server_exposure_time_frame;
        if !server_at_risk {
            return false;
        }
        let stale = match state.last_risk_received_date {
            None => true,
            Some(previous) => now - previous > self.debounce,
        };
        if stale {
            state.last_risk_received_date = Some(now);
        }
        stale
    }

    /// Acknowledge the alert. The exposure time frame survives.
    pub fn clear_at_risk_alert(&self, state: &mut RiskState) {
        state.last_risk_received_date = None;
        state.last_status_received_date = None;
    }
}
