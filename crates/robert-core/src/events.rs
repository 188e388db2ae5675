//! State-change notifications for the host application.

/// Why proximity capture was switched off by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No epoch matches the current time; broadcasting would be linkable.
    NoCurrentEpoch,
    /// Key material is gone (unregistered or reset).
    NotRegistered,
}

/// Broadcast to every subscriber of `ProtocolEngine::subscribe`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Registered,
    Unregistered,
    EpochsRenewed { count: usize },
    RiskChanged { at_risk: bool },
    ProximityRecorded,
    ProximityStopped { reason: StopReason },
    Reported,
    DataReset,
}
