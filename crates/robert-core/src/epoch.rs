//! Maps protocol time to the epoch that is valid for it.
//!
//! idx = floor((now - time_origin) / epoch_duration)

use crate::types::Epoch;

/// Resolves "now" against a time origin and an epoch table.
#[derive(Debug, Clone, Copy)]
pub struct EpochResolver {
    epoch_duration: u64,
}

impl EpochResolver {
    /// `epoch_duration_secs` must be non-zero (checked by `EngineConfig::validate`).
    pub fn new(epoch_duration_secs: u64) -> Self {
        Self {
            epoch_duration: epoch_duration_secs.max(1),
        }
    }

    pub fn epoch_duration(&self) -> u64 {
        self.epoch_duration
    }

    /// Index of the epoch containing `now`, or `None` before the origin or
    /// past the representable range.
    pub fn epoch_index(&self, time_origin: u64, now: u64) -> Option<u32> {
        let elapsed = now.checked_sub(time_origin)?;
        u32::try_from(elapsed / self.epoch_duration).ok()
    }

    /// The epoch whose id matches `now`. With `allow_fallback_to_last`, falls
    /// back to the epoch with the greatest id when nothing matches.
    ///
    /// Hello generation must use the strict form: broadcasting a stale EBID
    /// makes the device linkable across epochs.
    pub fn current_epoch<'a>(
        &self,
        epochs: &'a [Epoch],
        time_origin: u64,
        now: u64,
        allow_fallback_to_last: bool,
    ) -> Option<&'a Epoch> {
        let exact = self
            .epoch_index(time_origin, now)
            .and_then(|idx| epochs.iter().find(|e| e.id == idx));
        match exact {
            Some(epoch) => Some(epoch),
            None if allow_fallback_to_last => epochs.iter().max_by_key(|e| e.id),
            None => None,
        }
    }
}
