//! At-most-once log of received hello payloads.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::error::StorageError;
use crate::events::EngineEvent;
use crate::store::Store;
use crate::types::ProximityRecord;

/// Wraps the store's proximity table with a writer lock.
///
/// Inserts come from the radio context, prunes and clears from the protocol
/// context; all three hold `writer` so a prune never interleaves with an
/// insert. Range reads go straight to the store.
pub struct ProximityLog {
    store: Arc<dyn Store>,
    writer: Mutex<()>,
    retention: Duration,
    events: broadcast::Sender<EngineEvent>,
}

impl ProximityLog {
    pub fn new(
        store: Arc<dyn Store>,
        retention_days: i64,
        events: broadcast::Sender<EngineEvent>,
    ) -> Self {
        Self {
            store,
            writer: Mutex::new(()),
            retention: Duration::try_days(retention_days).unwrap_or(Duration::MAX),
            events,
        }
    }

    /// Store `record` unless an identical payload was already logged.
    pub fn insert(&self, record: &ProximityRecord) -> Result<bool, StorageError> {
        let inserted = {
            let _guard = self.writer.lock();
            self.store.insert_proximity(record)?
        };
        if inserted {
            let _ = self.events.send(EngineEvent::ProximityRecorded);
        } else {
            tracing::debug!("duplicate hello payload ignored");
        }
        Ok(inserted)
    }

    /// Records with `from <= collected_at <= to`, oldest first.
    pub fn records_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProximityRecord>, StorageError> {
        self.store.proximity_between(from, to)
    }

    /// Drop records older than the retention window.
    pub fn prune(&self, now: DateTime<Utc>) -> Result<usize, StorageError> {
        let Some(cutoff) = now.checked_sub_signed(self.retention) else {
            return Ok(0);
        };
        let _guard = self.writer.lock();
        let removed = self.store.delete_proximity_before(cutoff)?;
        if removed > 0 {
            tracing::debug!(removed, "pruned proximity records");
        }
        Ok(removed)
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        let _guard = self.writer.lock();
        self.store.clear_proximity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::HelloPayload;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn record(tag: u8, collected_at: DateTime<Utc>) -> ProximityRecord {
        let payload = HelloPayload {
            ecc: [0x33],
            ebid: [tag; 8],
            time: u16::from(tag),
            mac: [tag; 5],
        };
        ProximityRecord::from_hello(payload, collected_at, -70, -64, None)
    }

    fn log() -> (Arc<MemoryStore>, ProximityLog, broadcast::Receiver<EngineEvent>) {
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = broadcast::channel(16);
        let log = ProximityLog::new(store.clone(), 14, tx);
        (store, log, rx)
    }

    #[test]
    fn duplicate_payload_stored_once() {
        let (store, log, mut rx) = log();
        let first = record(1, at(0));
        let mut replay = record(1, at(30));
        replay.rssi_raw = -90;

        assert!(log.insert(&first).unwrap());
        assert!(!log.insert(&replay).unwrap());
        assert_eq!(store.proximity_len(), 1);

        assert_eq!(rx.try_recv().unwrap(), EngineEvent::ProximityRecorded);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn range_query_is_inclusive() {
        let (_store, log, _rx) = log();
        for (tag, secs) in [(1, 0), (2, 100), (3, 200)] {
            log.insert(&record(tag, at(secs))).unwrap();
        }
        let found = log.records_between(at(100), at(200)).unwrap();
        let tags: Vec<u8> = found.iter().map(|r| r.ebid[0]).collect();
        assert_eq!(tags, vec![2, 3]);
    }

    #[test]
    fn prune_removes_expired_records() {
        let (store, log, _rx) = log();
        let day = 86_400;
        log.insert(&record(1, at(0))).unwrap();
        log.insert(&record(2, at(10 * day))).unwrap();

        let removed = log.prune(at(15 * day)).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.proximity_len(), 1);

        // The expired payload can be logged again once pruned.
        assert!(log.insert(&record(1, at(15 * day))).unwrap());
    }

    #[test]
    fn clear_empties_the_log() {
        let (store, log, _rx) = log();
        log.insert(&record(1, at(0))).unwrap();
        log.clear().unwrap();
        assert_eq!(store.proximity_len(), 0);
    }
}
