//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Upper bound for every day/hour span, far beyond any protocol value.
const MAX_SPAN: i64 = 36_500;

/// Tunables for `ProtocolEngine`. Every field has a protocol default, so a
/// host can deserialize a partial JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Length of one epoch in seconds (default: 900)
    pub epoch_duration_secs: u64,
    /// Per-request network timeout in milliseconds (default: 30 000)
    pub request_timeout_ms: u64,
    /// Server static P-256 key, base64 SEC1. Required to register.
    pub server_public_key: Option<String>,
    /// Days before symptom onset included in a report (default: 2)
    pub pre_symptoms_span_days: i64,
    /// Days before a positive sample included in a report (default: 7)
    pub positive_sample_span_days: i64,
    /// Isolation length counted from the exposure start (default: 14)
    pub quarantine_period_days: i64,
    /// Minimum spacing between two risk timestamp refreshes (default: 24)
    pub risk_debounce_hours: i64,
    /// Age after which proximity records are pruned (default: 14)
    pub proximity_retention_days: i64,
    /// Accepted drift between a hello's time field and receipt time (default: 180)
    pub hello_time_tolerance_secs: u64,
    /// Buffered events per subscriber before lagging (default: 64)
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            epoch_duration_secs: 900,
            request_timeout_ms: 30_000,
            server_public_key: None,
            pre_symptoms_span_days: 2,
            positive_sample_span_days: 7,
            quarantine_period_days: 14,
            risk_debounce_hours: 24,
            proximity_retention_days: 14,
            hello_time_tolerance_secs: 180,
            event_capacity: 64,
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.epoch_duration_secs == 0 {
            return Err(EngineError::InvalidConfig(
                "epochDurationSecs must be positive".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(EngineError::InvalidConfig(
                "requestTimeoutMs must be positive".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(EngineError::InvalidConfig(
                "eventCapacity must be positive".to_string(),
            ));
        }
        let spans = [
            ("preSymptomsSpanDays", self.pre_symptoms_span_days),
            ("positiveSampleSpanDays", self.positive_sample_span_days),
            ("quarantinePeriodDays", self.quarantine_period_days),
            ("riskDebounceHours", self.risk_debounce_hours),
            ("proximityRetentionDays", self.proximity_retention_days),
        ];
        for (name, value) in spans {
            if !(0..=MAX_SPAN).contains(&value) {
                return Err(EngineError::InvalidConfig(format!(
                    "{name} must be within 0..={MAX_SPAN}, got {value}"
                )));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.epoch_duration_secs, 900);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{ "preSymptomsSpanDays": 5 }"#).unwrap();
        assert_eq!(config.pre_symptoms_span_days, 5);
        assert_eq!(config.positive_sample_span_days, 7);
        assert_eq!(config.epoch_duration_secs, 900);
    }

    #[test]
    fn rejects_zero_epoch_duration() {
        let err = EngineConfig::from_json(r#"{ "epochDurationSecs": 0 }"#).unwrap_err();
        assert!(err.to_string().contains("epochDurationSecs"));
    }

    #[test]
    fn rejects_negative_span() {
        let err = EngineConfig::from_json(r#"{ "quarantinePeriodDays": -1 }"#).unwrap_err();
        assert!(err.to_string().contains("quarantinePeriodDays"));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(matches!(
            EngineConfig::from_json("{ nope"),
            Err(EngineError::InvalidConfig(_))
        ));
    }
}
