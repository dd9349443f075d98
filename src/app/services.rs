use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::Connection;
use thiserror::Error;

use crate::adapters::db;
use crate::adapters::db::DbError;
use crate::domain::models::{
    NewReconciliationEvent, ReconciliationEvent, Session, SessionFilter, StationCapacity,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store lock poisoned")]
    LockPoisoned,
    #[error("database operation failed: {0}")]
    Database(#[from] DbError),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Outcome of a conditional counter update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterUpdate {
    Applied(StationCapacity),
    Unchanged(StationCapacity),
    MissingStation,
}

/// Durable per-station charger counters. Each mutating call is a single
/// conditional update; callers never read-modify-write the counter.
pub trait CapacityStore: Send + Sync {
    fn insert_station(&self, capacity: &StationCapacity) -> Result<bool, StoreError>;
    fn get_station(&self, station_id: &str) -> Result<Option<StationCapacity>, StoreError>;
    fn list_station_ids(&self) -> Result<Vec<String>, StoreError>;
    fn decrement_available(&self, station_id: &str) -> Result<CounterUpdate, StoreError>;
    fn increment_available(&self, station_id: &str) -> Result<CounterUpdate, StoreError>;
    fn overwrite_available(
        &self,
        station_id: &str,
        available_chargers: u32,
    ) -> Result<CounterUpdate, StoreError>;

    /// Runs `op` as one unit against the backing storage, isolated from
    /// writers in other processes. The default adds no isolation.
    fn atomically<T>(&self, op: impl FnOnce() -> T) -> Result<T, StoreError> {
        Ok(op())
    }
}

pub trait SessionRepository: Send + Sync {
    fn insert_session(&self, session: &Session) -> Result<(), StoreError>;
    fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError>;
    /// Persists the ended session only if the stored row is still active.
    fn complete_session(&self, ended: &Session) -> Result<bool, StoreError>;
    fn active_session_for_station(&self, station_id: &str) -> Result<Option<Session>, StoreError>;
    fn count_active_sessions(&self, station_id: &str) -> Result<u32, StoreError>;
    fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, StoreError>;
}

pub trait ReconciliationLog: Send + Sync {
    fn record_event(&self, event: &NewReconciliationEvent) -> Result<String, StoreError>;
    fn recent_events(&self, limit: u32) -> Result<Vec<ReconciliationEvent>, StoreError>;
}

pub trait Store: CapacityStore + SessionRepository + ReconciliationLog {}

impl<T> Store for T where T: CapacityStore + SessionRepository + ReconciliationLog {}

pub struct SqliteStore {
    connection: Arc<Mutex<Connection>>,
    // One open transaction per connection at a time.
    transaction: Mutex<()>,
}

impl SqliteStore {
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self {
            connection,
            transaction: Mutex::new(()),
        }
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, DbError>,
    ) -> Result<T, StoreError> {
        let connection = self
            .connection
            .lock()
            .map_err(|_| StoreError::LockPoisoned)?;
        op(&connection).map_err(StoreError::from)
    }

    fn update_counter(
        &self,
        station_id: &str,
        update: impl FnOnce(&Connection) -> Result<bool, DbError>,
    ) -> Result<CounterUpdate, StoreError> {
        self.with_connection(|connection| {
            let applied = update(connection)?;
            let outcome = match db::get_station(connection, station_id)? {
                Some(station) if applied => CounterUpdate::Applied(station),
                Some(station) => CounterUpdate::Unchanged(station),
                None => CounterUpdate::MissingStation,
            };
            Ok(outcome)
        })
    }
}

impl CapacityStore for SqliteStore {
    /// Wraps `op` in `BEGIN IMMEDIATE` ... `COMMIT`, which takes the database
    /// write lock up front. Other processes sharing the file wait on the busy
    /// timeout and only ever observe the committed result. The transaction
    /// always commits; compensating writes made by `op` are part of it.
    fn atomically<T>(&self, op: impl FnOnce() -> T) -> Result<T, StoreError> {
        let _transaction = self
            .transaction
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        self.with_connection(db::begin_immediate)?;
        let result = op();

        if let Err(error) = self.with_connection(db::commit) {
            if let Err(rollback_error) = self.with_connection(db::rollback) {
                tracing::error!(error = %rollback_error, "rollback after failed commit failed");
            }
            return Err(error);
        }

        Ok(result)
    }

    fn insert_station(&self, capacity: &StationCapacity) -> Result<bool, StoreError> {
        self.with_connection(|connection| db::insert_station(connection, capacity))
    }

    fn get_station(&self, station_id: &str) -> Result<Option<StationCapacity>, StoreError> {
        self.with_connection(|connection| db::get_station(connection, station_id))
    }

    fn list_station_ids(&self) -> Result<Vec<String>, StoreError> {
        self.with_connection(db::list_station_ids)
    }

    fn decrement_available(&self, station_id: &str) -> Result<CounterUpdate, StoreError> {
        self.update_counter(station_id, |connection| {
            db::take_charger(connection, station_id)
        })
    }

    fn increment_available(&self, station_id: &str) -> Result<CounterUpdate, StoreError> {
        self.update_counter(station_id, |connection| {
            db::return_charger(connection, station_id)
        })
    }

    fn overwrite_available(
        &self,
        station_id: &str,
        available_chargers: u32,
    ) -> Result<CounterUpdate, StoreError> {
        self.update_counter(station_id, |connection| {
            db::set_available_chargers(connection, station_id, available_chargers)
        })
    }
}

impl SessionRepository for SqliteStore {
    fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        self.with_connection(|connection| db::insert_session(connection, session))
    }

    fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        self.with_connection(|connection| db::get_session(connection, session_id))
    }

    fn complete_session(&self, ended: &Session) -> Result<bool, StoreError> {
        self.with_connection(|connection| db::complete_session(connection, ended))
    }

    fn active_session_for_station(&self, station_id: &str) -> Result<Option<Session>, StoreError> {
        self.with_connection(|connection| db::get_active_session(connection, station_id))
    }

    fn count_active_sessions(&self, station_id: &str) -> Result<u32, StoreError> {
        self.with_connection(|connection| db::count_active_sessions(connection, station_id))
    }

    fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, StoreError> {
        self.with_connection(|connection| db::list_sessions(connection, filter))
    }
}

impl ReconciliationLog for SqliteStore {
    fn record_event(&self, event: &NewReconciliationEvent) -> Result<String, StoreError> {
        self.with_connection(|connection| db::insert_reconciliation_event(connection, event))
    }

    fn recent_events(&self, limit: u32) -> Result<Vec<ReconciliationEvent>, StoreError> {
        self.with_connection(|connection| db::list_recent_reconciliation_events(connection, limit))
    }
}
