//! In-process store backed by sharded maps. Each station counter lives in its
//! own `DashMap` entry, so counter updates on different stations never contend
//! on a shared lock.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use crate::app::services::{
    CapacityStore, CounterUpdate, ReconciliationLog, SessionRepository, StoreError,
};
use crate::domain::models::{
    NewReconciliationEvent, ReconciliationEvent, Session, SessionFilter, StationCapacity,
};
use crate::domain::session_state::SessionState;

#[derive(Debug, Clone)]
struct StoredSession {
    sequence: u64,
    session: Session,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    stations: DashMap<String, StationCapacity>,
    sessions: DashMap<String, StoredSession>,
    events: Mutex<Vec<ReconciliationEvent>>,
    sequence: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update_counter(
        &self,
        station_id: &str,
        update: impl FnOnce(&mut StationCapacity) -> bool,
    ) -> CounterUpdate {
        match self.stations.get_mut(station_id) {
            Some(mut station) => {
                if update(station.value_mut()) {
                    CounterUpdate::Applied(station.clone())
                } else {
                    CounterUpdate::Unchanged(station.clone())
                }
            }
            None => CounterUpdate::MissingStation,
        }
    }

    fn sorted_sessions(&self, keep: impl Fn(&Session) -> bool) -> Vec<StoredSession> {
        let mut matching: Vec<StoredSession> = self
            .sessions
            .iter()
            .filter(|entry| keep(&entry.session))
            .map(|entry| entry.value().clone())
            .collect();
        matching.sort_by(|left, right| {
            right
                .session
                .started_at
                .cmp(&left.session.started_at)
                .then(right.sequence.cmp(&left.sequence))
        });
        matching
    }
}

impl CapacityStore for MemoryStore {
    fn insert_station(&self, capacity: &StationCapacity) -> Result<bool, StoreError> {
        match self.stations.entry(capacity.station_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(capacity.clone());
                Ok(true)
            }
        }
    }

    fn get_station(&self, station_id: &str) -> Result<Option<StationCapacity>, StoreError> {
        Ok(self
            .stations
            .get(station_id)
            .map(|station| station.value().clone()))
    }

    fn list_station_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self
            .stations
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn decrement_available(&self, station_id: &str) -> Result<CounterUpdate, StoreError> {
        Ok(self.update_counter(station_id, |station| {
            if station.available_chargers == 0 {
                return false;
            }
            station.available_chargers -= 1;
            true
        }))
    }

    fn increment_available(&self, station_id: &str) -> Result<CounterUpdate, StoreError> {
        Ok(self.update_counter(station_id, |station| {
            if station.available_chargers >= station.total_chargers {
                return false;
            }
            station.available_chargers += 1;
            true
        }))
    }

    fn overwrite_available(
        &self,
        station_id: &str,
        available_chargers: u32,
    ) -> Result<CounterUpdate, StoreError> {
        Ok(self.update_counter(station_id, |station| {
            if available_chargers > station.total_chargers {
                return false;
            }
            station.available_chargers = available_chargers;
            true
        }))
    }
}

impl SessionRepository for MemoryStore {
    fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        if !self.stations.contains_key(&session.station_id) {
            return Err(StoreError::Unavailable(format!(
                "station {} is not registered",
                session.station_id
            )));
        }

        match self.sessions.entry(session.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Unavailable(format!(
                "session {} already exists",
                session.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(StoredSession {
                    sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
                    session: session.clone(),
                });
                Ok(())
            }
        }
    }

    fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self
            .sessions
            .get(session_id)
            .map(|stored| stored.session.clone()))
    }

    fn complete_session(&self, ended: &Session) -> Result<bool, StoreError> {
        match self.sessions.get_mut(&ended.id) {
            Some(mut stored) if stored.session.state == SessionState::Active => {
                stored.session = ended.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn active_session_for_station(&self, station_id: &str) -> Result<Option<Session>, StoreError> {
        Ok(self
            .sorted_sessions(|session| session.station_id == station_id && session.is_active())
            .into_iter()
            .next()
            .map(|stored| stored.session))
    }

    fn count_active_sessions(&self, station_id: &str) -> Result<u32, StoreError> {
        let count = self
            .sessions
            .iter()
            .filter(|entry| entry.session.station_id == station_id && entry.session.is_active())
            .count();
        u32::try_from(count).map_err(|_| StoreError::Unavailable("active count overflow".into()))
    }

    fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, StoreError> {
        Ok(self
            .sorted_sessions(|session| {
                filter
                    .station_id
                    .as_deref()
                    .is_none_or(|station_id| session.station_id == station_id)
                    && filter
                        .owner_id
                        .as_deref()
                        .is_none_or(|owner_id| session.owner_id.as_deref() == Some(owner_id))
            })
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .map(|stored| stored.session)
            .collect())
    }
}

impl ReconciliationLog for MemoryStore {
    fn record_event(&self, event: &NewReconciliationEvent) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let mut events = self.events.lock().map_err(|_| StoreError::LockPoisoned)?;
        events.push(ReconciliationEvent {
            id: id.clone(),
            created_at: event.created_at.clone(),
            station_id: event.station_id.clone(),
            session_id: event.session_id.clone(),
            kind: event.kind,
            message: event.message.clone(),
            details_json: event.details_json.clone(),
        });
        Ok(id)
    }

    fn recent_events(&self, limit: u32) -> Result<Vec<ReconciliationEvent>, StoreError> {
        let events = self.events.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(events.iter().rev().take(limit as usize).cloned().collect())
    }
}
