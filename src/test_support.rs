use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::Connection;

use crate::adapters::db::{open_connection, run_migrations};
use crate::adapters::memory::MemoryStore;
use crate::app::services::{
    CapacityStore, CounterUpdate, ReconciliationLog, SessionRepository, StoreError,
};
use crate::domain::models::{
    NewReconciliationEvent, ReconciliationEvent, Session, SessionFilter, StationCapacity,
};
use crate::domain::session_state::{Clock, TimestampMs};

static TEST_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

pub fn open_test_connection(test_name: &str) -> Connection {
    let template = ensure_template_db();
    let test_db_path = unique_test_db_path(test_name);

    if let Some(parent) = test_db_path.parent() {
        std::fs::create_dir_all(parent).expect("test db dir should be creatable");
    }

    std::fs::copy(&template, &test_db_path).expect("template db should be copied");
    open_connection(test_db_path.to_string_lossy().as_ref()).expect("test db should open")
}

fn ensure_template_db() -> PathBuf {
    static TEMPLATE_PATH: OnceLock<PathBuf> = OnceLock::new();

    TEMPLATE_PATH
        .get_or_init(|| {
            let template_path = std::env::var("TEST_DB_TEMPLATE_PATH")
                .ok()
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(default_template_path);

            if let Some(parent) = template_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent).expect("template parent dir should be creatable");
            }

            let mut connection = open_connection(template_path.to_string_lossy().as_ref())
                .expect("template db opens");
            run_migrations(&mut connection).expect("template migrations should succeed");

            template_path
        })
        .clone()
}

fn default_template_path() -> PathBuf {
    if cfg!(windows) {
        Path::new(".\\data\\station_sessions_test.db").to_path_buf()
    } else {
        Path::new("./data/station_sessions_test.db").to_path_buf()
    }
}

fn unique_test_db_path(test_name: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let counter = TEST_DB_COUNTER.fetch_add(1, Ordering::Relaxed);
    Path::new("./target/testdb")
        .join(format!("{test_name}-{now}-{counter}.sqlite"))
        .to_path_buf()
}

/// Settable clock shared between a test and the component under test.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn starting_at(millis: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(millis)),
        }
    }

    pub fn advance_ms(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> TimestampMs {
        TimestampMs(self.now.load(Ordering::SeqCst))
    }
}

/// Memory store with switchable write failures.
#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    fail_session_inserts: AtomicBool,
    fail_counter_increments: AtomicBool,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_session_inserts(&self, fail: bool) {
        self.fail_session_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_counter_increments(&self, fail: bool) {
        self.fail_counter_increments.store(fail, Ordering::SeqCst);
    }

    fn injected(what: &str) -> StoreError {
        StoreError::Unavailable(format!("injected {what} failure"))
    }
}

impl CapacityStore for FaultyStore {
    fn insert_station(&self, capacity: &StationCapacity) -> Result<bool, StoreError> {
        self.inner.insert_station(capacity)
    }

    fn get_station(&self, station_id: &str) -> Result<Option<StationCapacity>, StoreError> {
        self.inner.get_station(station_id)
    }

    fn list_station_ids(&self) -> Result<Vec<String>, StoreError> {
        self.inner.list_station_ids()
    }

    fn decrement_available(&self, station_id: &str) -> Result<CounterUpdate, StoreError> {
        self.inner.decrement_available(station_id)
    }

    fn increment_available(&self, station_id: &str) -> Result<CounterUpdate, StoreError> {
        if self.fail_counter_increments.load(Ordering::SeqCst) {
            return Err(Self::injected("counter increment"));
        }
        self.inner.increment_available(station_id)
    }

    fn overwrite_available(
        &self,
        station_id: &str,
        available_chargers: u32,
    ) -> Result<CounterUpdate, StoreError> {
        self.inner.overwrite_available(station_id, available_chargers)
    }
}

impl SessionRepository for FaultyStore {
    fn insert_session(&self, session: &Session) -> Result<(), StoreError> {
        if self.fail_session_inserts.load(Ordering::SeqCst) {
            return Err(Self::injected("session insert"));
        }
        self.inner.insert_session(session)
    }

    fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        self.inner.get_session(session_id)
    }

    fn complete_session(&self, ended: &Session) -> Result<bool, StoreError> {
        self.inner.complete_session(ended)
    }

    fn active_session_for_station(&self, station_id: &str) -> Result<Option<Session>, StoreError> {
        self.inner.active_session_for_station(station_id)
    }

    fn count_active_sessions(&self, station_id: &str) -> Result<u32, StoreError> {
        self.inner.count_active_sessions(station_id)
    }

    fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, StoreError> {
        self.inner.list_sessions(filter)
    }
}

impl ReconciliationLog for FaultyStore {
    fn record_event(&self, event: &NewReconciliationEvent) -> Result<String, StoreError> {
        self.inner.record_event(event)
    }

    fn recent_events(&self, limit: u32) -> Result<Vec<ReconciliationEvent>, StoreError> {
        self.inner.recent_events(limit)
    }
}
