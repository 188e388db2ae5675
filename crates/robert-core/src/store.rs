//! Persistent store collaborator and an in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::error::StorageError;
use crate::types::{Epoch, ProximityKey, ProximityRecord};

// ============================================================================
// Store: host-provided persistence
// ============================================================================

/// Narrow persistence interface the engine calls.
///
/// Scalar state (keys, time origin, risk state, capture flag) lives in the
/// key/value half; epochs and proximity records have their own tables.
///
/// # Threading
/// All methods are synchronous and may be called from the radio context and
/// the protocol context at once. Implementations must be internally
/// synchronized.
pub trait Store: Send + Sync {
    fn get_value(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_value(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_value(&self, key: &str) -> Result<(), StorageError>;

    fn load_epochs(&self) -> Result<Vec<Epoch>, StorageError>;
    /// Replace the whole epoch table.
    fn replace_epochs(&self, epochs: &[Epoch]) -> Result<(), StorageError>;

    /// Insert unless a record with the same [`ProximityRecord::key`] exists.
    /// Returns whether the record was stored.
    fn insert_proximity(&self, record: &ProximityRecord) -> Result<bool, StorageError>;
    /// Records with `from <= collected_at <= to`, oldest first.
    fn proximity_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProximityRecord>, StorageError>;
    /// Delete records with `collected_at < cutoff`. Returns how many went.
    fn delete_proximity_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError>;
    fn clear_proximity(&self) -> Result<(), StorageError>;
}

// ============================================================================
// MemoryStore
// ============================================================================

#[derive(Default)]
struct ProximityTable {
    records: Vec<ProximityRecord>,
    keys: HashSet<ProximityKey>,
}

/// Store that keeps everything in process memory.
///
/// Interior mutability via `parking_lot::Mutex`. Writes can be made to fail
/// on demand, which is how callers exercise all-or-nothing paths.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    epochs: Mutex<Vec<Epoch>>,
    proximity: Mutex<ProximityTable>,
    fail_writes: AtomicBool,
    fail_target: Mutex<Option<String>>,
}

/// Write target name of the epoch table for [`MemoryStore::set_fail_writes_to`].
pub const EPOCHS_TABLE: &str = "epochs";

/// Write target name of the proximity table for [`MemoryStore::set_fail_writes_to`].
pub const PROXIMITY_TABLE: &str = "proximity";

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every write returns `StorageError::Backend`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail only writes to `target`: a value key, [`EPOCHS_TABLE`] or
    /// [`PROXIMITY_TABLE`]. `None` clears it.
    pub fn set_fail_writes_to(&self, target: Option<&str>) {
        *self.fail_target.lock() = target.map(str::to_string);
    }

    pub fn proximity_len(&self) -> usize {
        self.proximity.lock().records.len()
    }

    fn check_writable(&self, target: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("writes disabled".to_string()));
        }
        if self.fail_target.lock().as_deref() == Some(target) {
            return Err(StorageError::Backend(format!("writes to {target} disabled")));
        }
        Ok(())
    }
}

impl Store for MemoryStore {
    fn get_value(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set_value(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check_writable(key)?;
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_value(&self, key: &str) -> Result<(), StorageError> {
        self.check_writable(key)?;
        self.values.lock().remove(key);
        Ok(())
    }

    fn load_epochs(&self) -> Result<Vec<Epoch>, StorageError> {
        Ok(self.epochs.lock().clone())
    }

    fn replace_epochs(&self, epochs: &[Epoch]) -> Result<(), StorageError> {
        self.check_writable(EPOCHS_TABLE)?;
        *self.epochs.lock() = epochs.to_vec();
        Ok(())
    }

    fn insert_proximity(&self, record: &ProximityRecord) -> Result<bool, StorageError> {
        self.check_writable(PROXIMITY_TABLE)?;
        let mut table = self.proximity.lock();
        if !table.keys.insert(record.key()) {
            return Ok(false);
        }
        table.records.push(record.clone());
        Ok(true)
    }

    fn proximity_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProximityRecord>, StorageError> {
        let mut found: Vec<ProximityRecord> = self
            .proximity
            .lock()
            .records
            .iter()
            .filter(|r| r.collected_at >= from && r.collected_at <= to)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.collected_at);
        Ok(found)
    }

    fn delete_proximity_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        self.check_writable(PROXIMITY_TABLE)?;
        let mut table = self.proximity.lock();
        let before = table.records.len();
        let ProximityTable { records, keys } = &mut *table;
        records.retain(|r| {
            let keep = r.collected_at >= cutoff;
            if !keep {
                keys.remove(&r.key());
            }
            keep
        });
        Ok(before - records.len())
    }

    fn clear_proximity(&self) -> Result<(), StorageError> {
        self.check_writable(PROXIMITY_TABLE)?;
        let mut table = self.proximity.lock();
        table.records.clear();
        table.keys.clear();
        Ok(())
    }
}
