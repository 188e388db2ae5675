//! Key material, epoch table and time origin, cached in memory and persisted
//! through the [`Store`].

use std::sync::Arc;

use parking_lot::RwLock;
use robert_crypto::{base64_decode, base64_encode, KeyMaterial};

use crate::error::StorageError;
use crate::store::Store;
use crate::types::Epoch;

const AUTH_KEY: &str = "robert.authKey";
const ENC_KEY: &str = "robert.encKey";
const TIME_START: &str = "robert.timeStart";

/// Registration state as seen by readers.
#[derive(Default)]
pub struct KeyState {
    pub keys: Option<KeyMaterial>,
    pub time_origin: Option<u64>,
    /// Sorted by id, ids unique.
    pub epochs: Vec<Epoch>,
}

impl KeyState {
    /// Both keys present and at least one epoch stored.
    pub fn is_registered(&self) -> bool {
        self.keys.is_some() && self.time_origin.is_some() && !self.epochs.is_empty()
    }
}

/// Single owner of `KeyMaterial`, `TimeOrigin` and the epoch table.
///
/// Reads take a shared lock and never write, so hello generation can run
/// next to a status call. Writes come only from the engine's writer gate.
pub struct KeyStore {
    store: Arc<dyn Store>,
    state: RwLock<KeyState>,
}

impl KeyStore {
    /// Load whatever registration state the store holds. A half-written
    /// registration (keys without epochs, one key without the other) loads
    /// as unregistered.
    pub fn load(store: Arc<dyn Store>) -> Result<Self, StorageError> {
        let auth = store.get_value(AUTH_KEY)?;
        let enc = store.get_value(ENC_KEY)?;
        let keys = match (auth, enc) {
            (Some(auth), Some(enc)) => Some(decode_keys(&auth, &enc)?),
            _ => None,
        };
        let time_origin = match store.get_value(TIME_START)? {
            Some(raw) => Some(raw.parse::<u64>().map_err(|e| StorageError::Corrupt {
                key: TIME_START.to_string(),
                reason: e.to_string(),
            })?),
            None => None,
        };
        let mut epochs = store.load_epochs()?;
        epochs.sort_by_key(|e| e.id);
        epochs.dedup_by_key(|e| e.id);

        let state = KeyState {
            keys,
            time_origin,
            epochs,
        };
        let state = if state.is_registered() {
            state
        } else {
            KeyState::default()
        };
        Ok(Self {
            store,
            state: RwLock::new(state),
        })
    }

    pub fn read<R>(&self, f: impl FnOnce(&KeyState) -> R) -> R {
        f(&self.state.read())
    }

    pub fn is_registered(&self) -> bool {
        self.state.read().is_registered()
    }

    pub fn key_material(&self) -> Option<KeyMaterial> {
        self.state.read().keys.clone()
    }

    pub fn epochs(&self) -> Vec<Epoch> {
        self.state.read().epochs.clone()
    }

    pub fn time_origin(&self) -> Option<u64> {
        self.state.read().time_origin
    }

    /// Persist a fresh registration. All-or-nothing: if any write fails, the
    /// entries already written are restored to what the store held before
    /// (a previous registration included) and the in-memory state is
    /// untouched.
    pub fn install(
        &self,
        keys: KeyMaterial,
        time_origin: u64,
        mut epochs: Vec<Epoch>,
    ) -> Result<(), StorageError> {
        epochs.sort_by_key(|e| e.id);
        let mut state = self.state.write();

        let previous = Snapshot::read(self.store.as_ref())?;
        let values = [
            (TIME_START, time_origin.to_string()),
            (AUTH_KEY, base64_encode(keys.auth_key())),
            (ENC_KEY, base64_encode(keys.enc_key())),
        ];
        let mut written = Vec::with_capacity(values.len() + 1);
        if let Err(e) = self.write_all(&epochs, &values, &mut written) {
            tracing::warn!("registration state not persisted, rolling back: {e}");
            if let Err(rollback) = previous.restore(self.store.as_ref(), &written) {
                tracing::warn!("rollback of partial registration failed: {rollback}");
            }
            return Err(e);
        }

        *state = KeyState {
            keys: Some(keys),
            time_origin: Some(time_origin),
            epochs,
        };
        Ok(())
    }

    fn write_all(
        &self,
        epochs: &[Epoch],
        values: &[(&'static str, String)],
        written: &mut Vec<Entry>,
    ) -> Result<(), StorageError> {
        self.store.replace_epochs(epochs)?;
        written.push(Entry::Epochs);
        for (key, value) in values {
            self.store.set_value(key, value)?;
            written.push(Entry::Value(*key));
        }
        Ok(())
    }

    /// Replace the epoch table wholesale. An empty batch is ignored.
    pub fn replace_epochs(&self, mut epochs: Vec<Epoch>) -> Result<usize, StorageError> {
        if epochs.is_empty() {
            return Ok(0);
        }
        epochs.sort_by_key(|e| e.id);
        let mut state = self.state.write();
        self.store.replace_epochs(&epochs)?;
        let count = epochs.len();
        state.epochs = epochs;
        Ok(count)
    }

    /// Drop keys, time origin and epochs, in memory and in the store.
    pub fn wipe(&self) -> Result<(), StorageError> {
        let mut state = self.state.write();
        *state = KeyState::default();
        self.wipe_persisted()
    }

    fn wipe_persisted(&self) -> Result<(), StorageError> {
        self.store.remove_value(AUTH_KEY)?;
        self.store.remove_value(ENC_KEY)?;
        self.store.remove_value(TIME_START)?;
        self.store.replace_epochs(&[])
    }
}

/// One persisted piece of registration state.
#[derive(Debug, Clone, Copy)]
enum Entry {
    Epochs,
    Value(&'static str),
}

/// Registration state as the store held it before an install.
struct Snapshot {
    values: Vec<(&'static str, Option<String>)>,
    epochs: Vec<Epoch>,
}

impl Snapshot {
    fn read(store: &dyn Store) -> Result<Self, StorageError> {
        let mut values = Vec::with_capacity(3);
        for key in [TIME_START, AUTH_KEY, ENC_KEY] {
            values.push((key, store.get_value(key)?));
        }
        Ok(Self {
            values,
            epochs: store.load_epochs()?,
        })
    }

    /// Put back the entries in `written`, newest first.
    fn restore(&self, store: &dyn Store, written: &[Entry]) -> Result<(), StorageError> {
        for entry in written.iter().rev() {
            match entry {
                Entry::Epochs => store.replace_epochs(&self.epochs)?,
                Entry::Value(key) => {
                    let previous = self
                        .values
                        .iter()
                        .find(|(k, _)| k == key)
                        .and_then(|(_, v)| v.as_deref());
                    match previous {
                        Some(value) => store.set_value(key, value)?,
                        None => store.remove_value(key)?,
                    }
                }
            }
        }
        Ok(())
    }
}

fn decode_keys(auth: &str, enc: &str) -> Result<KeyMaterial, StorageError> {
    let corrupt = |key: &str, reason: String| StorageError::Corrupt {
        key: key.to_string(),
        reason,
    };
    let auth = base64_decode(auth).map_err(|e| corrupt(AUTH_KEY, e.to_string()))?;
    let enc = base64_decode(enc).map_err(|e| corrupt(ENC_KEY, e.to_string()))?;
    KeyMaterial::from_slices(&auth, &enc).map_err(|e| corrupt(AUTH_KEY, e.to_string()))
}
