//! Filtering collaborator applied to proximity records before upload.

use thiserror::Error;

use crate::types::ProximityRecord;

/// Local filtering failure. Retryable without contacting the server.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct FilterError(pub String);

/// Selects and anonymizes the records that leave the device in a report.
pub trait ContactFilter: Send + Sync {
    fn filter(&self, records: Vec<ProximityRecord>) -> Result<Vec<ProximityRecord>, FilterError>;
}

/// Keeps every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThroughFilter;

impl ContactFilter for PassThroughFilter {
    fn filter(&self, records: Vec<ProximityRecord>) -> Result<Vec<ProximityRecord>, FilterError> {
        Ok(records)
    }
}
