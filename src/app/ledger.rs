use std::cell::Cell;
use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use thiserror::Error;

use crate::app::services::{CapacityStore, CounterUpdate, StoreError};
use crate::domain::models::StationCapacity;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("no charger available at station {station_id}")]
    CapacityExhausted { station_id: String },
    #[error("station {station_id} already has all {total_chargers} chargers available")]
    AlreadyAtCapacity {
        station_id: String,
        total_chargers: u32,
    },
    #[error("unknown station {station_id}")]
    StationNotFound { station_id: String },
    #[error("capacity store failed: {0}")]
    Store(#[from] StoreError),
}

/// Serializes every counter mutation per station. Lock objects are created
/// on first use of a station id and dropped again when the id turns out to
/// be unregistered.
pub struct AvailabilityLedger<S> {
    store: Arc<S>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

/// Handle to one station's counter, only obtainable while its lock is held.
pub struct StationSlots<'a, S> {
    store: &'a S,
    station_id: &'a str,
    missing: Cell<bool>,
}

impl<S> AvailabilityLedger<S>
where
    S: CapacityStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    /// Runs `op` under the station lock and inside one store transaction.
    pub fn with_station<T, E>(
        &self,
        station_id: &str,
        op: impl FnOnce(&StationSlots<'_, S>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<LedgerError>,
    {
        let lock = self.station_lock(station_id);
        let (outcome, missing) = {
            // Store mutations are single conditional updates, so poisoning carries no torn state.
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
            let slots = StationSlots {
                store: self.store.as_ref(),
                station_id,
                missing: Cell::new(false),
            };
            let outcome = self.store.atomically(|| op(&slots));
            (outcome, slots.missing.get())
        };
        drop(lock);

        if missing {
            self.forget_station(station_id);
        }

        match outcome {
            Ok(result) => result,
            Err(error) => Err(LedgerError::Store(error).into()),
        }
    }

    fn station_lock(&self, station_id: &str) -> Arc<Mutex<()>> {
        if let Some(existing) = self.locks.get(station_id) {
            return Arc::clone(existing.value());
        }

        Arc::clone(
            self.locks
                .entry(station_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    #[cfg(test)]
    pub(crate) fn tracked_stations(&self) -> usize {
        self.locks.len()
    }

    /// Drops the lock of an unregistered station unless another caller holds it.
    fn forget_station(&self, station_id: &str) {
        self.locks
            .remove_if(station_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl<S> StationSlots<'_, S>
where
    S: CapacityStore,
{
    pub fn station_id(&self) -> &str {
        self.station_id
    }

    pub fn capacity(&self) -> Result<StationCapacity, LedgerError> {
        self.store
            .get_station(self.station_id)?
            .ok_or_else(|| self.not_found())
    }

    /// Registers the station with every charger free. Returns `None` when a
    /// record already exists; the existing counter is never reset.
    pub fn register(&self, total_chargers: u32) -> Result<Option<StationCapacity>, LedgerError> {
        let capacity = StationCapacity::new(self.station_id, total_chargers);
        if self.store.insert_station(&capacity)? {
            Ok(Some(capacity))
        } else {
            Ok(None)
        }
    }

    pub fn reserve(&self) -> Result<StationCapacity, LedgerError> {
        match self.store.decrement_available(self.station_id)? {
            CounterUpdate::Applied(capacity) => {
                tracing::debug!(
                    station_id = self.station_id,
                    available_chargers = capacity.available_chargers,
                    total_chargers = capacity.total_chargers,
                    "charger reserved"
                );
                Ok(capacity)
            }
            CounterUpdate::Unchanged(_) => Err(LedgerError::CapacityExhausted {
                station_id: self.station_id.to_string(),
            }),
            CounterUpdate::MissingStation => Err(self.not_found()),
        }
    }

    pub fn release(&self) -> Result<StationCapacity, LedgerError> {
        match self.store.increment_available(self.station_id)? {
            CounterUpdate::Applied(capacity) => {
                tracing::debug!(
                    station_id = self.station_id,
                    available_chargers = capacity.available_chargers,
                    total_chargers = capacity.total_chargers,
                    "charger released"
                );
                Ok(capacity)
            }
            CounterUpdate::Unchanged(capacity) => Err(LedgerError::AlreadyAtCapacity {
                station_id: self.station_id.to_string(),
                total_chargers: capacity.total_chargers,
            }),
            CounterUpdate::MissingStation => Err(self.not_found()),
        }
    }

    /// Out-of-band counter correction. The value is clamped to the station's total.
    pub fn repair(&self, available_chargers: u32) -> Result<StationCapacity, LedgerError> {
        let current = self.capacity()?;
        let target = available_chargers.min(current.total_chargers);

        match self.store.overwrite_available(self.station_id, target)? {
            CounterUpdate::Applied(capacity) | CounterUpdate::Unchanged(capacity) => Ok(capacity),
            CounterUpdate::MissingStation => Err(self.not_found()),
        }
    }

    fn not_found(&self) -> LedgerError {
        self.missing.set(true);
        LedgerError::StationNotFound {
            station_id: self.station_id.to_string(),
        }
    }
}
