use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Row, params};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::{
    NewReconciliationEvent, ReconciliationEvent, ReconciliationKind, Session, SessionFilter,
    StationCapacity,
};
use crate::domain::session_state::{SessionState, TimestampMs};

pub const LATEST_SCHEMA_VERSION: u32 = 2;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const MIGRATIONS: &[(u32, &str)] = &[
    (
        1,
        r#"
CREATE TABLE IF NOT EXISTS stations (
    id TEXT PRIMARY KEY,
    total_chargers INTEGER NOT NULL CHECK (total_chargers > 0),
    available_chargers INTEGER NOT NULL,
    CHECK (available_chargers >= 0 AND available_chargers <= total_chargers)
);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    station_id TEXT NOT NULL REFERENCES stations (id),
    owner_id TEXT,
    vehicle_ref TEXT,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    duration_minutes INTEGER,
    battery_start INTEGER,
    battery_end INTEGER,
    energy_delivered_kwh REAL,
    state TEXT NOT NULL CHECK (state IN ('active', 'ended'))
);

CREATE INDEX IF NOT EXISTS idx_sessions_station_state
ON sessions (station_id, state);

CREATE INDEX IF NOT EXISTS idx_sessions_owner_started_at
ON sessions (owner_id, started_at DESC);
"#,
    ),
    (
        2,
        r#"
CREATE TABLE IF NOT EXISTS reconciliation_events (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    station_id TEXT NOT NULL,
    session_id TEXT,
    kind TEXT NOT NULL,
    message TEXT NOT NULL,
    details_json TEXT
);

CREATE INDEX IF NOT EXISTS idx_reconciliation_events_created_at_desc
ON reconciliation_events (created_at DESC);
"#,
    ),
];

const SESSION_COLUMNS: &str = "id, station_id, owner_id, vehicle_ref, started_at, ended_at, \
     duration_minutes, battery_start, battery_end, energy_delivered_kwh, state";

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database operation failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("unsupported schema version {current}; latest supported is {latest}")]
    UnsupportedSchemaVersion { current: u32, latest: u32 },
}

pub fn open_connection(path: &str) -> Result<Connection, DbError> {
    let connection = Connection::open(path)?;
    connection.pragma_update(None, "foreign_keys", true)?;
    connection.busy_timeout(BUSY_TIMEOUT)?;
    Ok(connection)
}

/// Takes the write lock immediately so the whole unit of work is ordered
/// against every other connection to the same file.
pub fn begin_immediate(connection: &Connection) -> Result<(), DbError> {
    connection.execute_batch("BEGIN IMMEDIATE")?;
    Ok(())
}

pub fn commit(connection: &Connection) -> Result<(), DbError> {
    connection.execute_batch("COMMIT")?;
    Ok(())
}

pub fn rollback(connection: &Connection) -> Result<(), DbError> {
    connection.execute_batch("ROLLBACK")?;
    Ok(())
}

pub fn run_migrations(connection: &mut Connection) -> Result<(), DbError> {
    let current_version = schema_version(connection)?;

    if current_version > LATEST_SCHEMA_VERSION {
        return Err(DbError::UnsupportedSchemaVersion {
            current: current_version,
            latest: LATEST_SCHEMA_VERSION,
        });
    }

    let transaction = connection.transaction()?;

    for (version, sql) in MIGRATIONS {
        if *version > current_version {
            transaction.execute_batch(sql)?;
            transaction.pragma_update(None, "user_version", version)?;
        }
    }

    transaction.commit()?;

    Ok(())
}

pub fn schema_version(connection: &Connection) -> Result<u32, DbError> {
    let version = connection.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Returns `false` when the station already exists; the stored row is left untouched.
pub fn insert_station(connection: &Connection, capacity: &StationCapacity) -> Result<bool, DbError> {
    let inserted = connection.execute(
        "INSERT OR IGNORE INTO stations (id, total_chargers, available_chargers) VALUES (?1, ?2, ?3)",
        params![
            capacity.station_id,
            capacity.total_chargers,
            capacity.available_chargers,
        ],
    )?;

    Ok(inserted == 1)
}

pub fn get_station(
    connection: &Connection,
    station_id: &str,
) -> Result<Option<StationCapacity>, DbError> {
    let station = connection
        .query_row(
            "SELECT id, total_chargers, available_chargers FROM stations WHERE id = ?1",
            params![station_id],
            |row| {
                Ok(StationCapacity {
                    station_id: row.get(0)?,
                    total_chargers: row.get(1)?,
                    available_chargers: row.get(2)?,
                })
            },
        )
        .optional()?;

    Ok(station)
}

pub fn list_station_ids(connection: &Connection) -> Result<Vec<String>, DbError> {
    let mut statement = connection.prepare("SELECT id FROM stations ORDER BY id")?;
    let rows = statement.query_map([], |row| row.get(0))?;

    let mut ids = Vec::new();
    for row in rows {
        ids.push(row?);
    }

    Ok(ids)
}

/// Single-row conditional decrement. Returns whether a charger was taken.
pub fn take_charger(connection: &Connection, station_id: &str) -> Result<bool, DbError> {
    let changed = connection.execute(
        "UPDATE stations SET available_chargers = available_chargers - 1
         WHERE id = ?1 AND available_chargers > 0",
        params![station_id],
    )?;

    Ok(changed == 1)
}

/// Single-row conditional increment, never past `total_chargers`.
pub fn return_charger(connection: &Connection, station_id: &str) -> Result<bool, DbError> {
    let changed = connection.execute(
        "UPDATE stations SET available_chargers = available_chargers + 1
         WHERE id = ?1 AND available_chargers < total_chargers",
        params![station_id],
    )?;

    Ok(changed == 1)
}

pub fn set_available_chargers(
    connection: &Connection,
    station_id: &str,
    available_chargers: u32,
) -> Result<bool, DbError> {
    let changed = connection.execute(
        "UPDATE stations SET available_chargers = ?2
         WHERE id = ?1 AND ?2 <= total_chargers",
        params![station_id, available_chargers],
    )?;

    Ok(changed == 1)
}

pub fn insert_session(connection: &Connection, session: &Session) -> Result<(), DbError> {
    connection.execute(
        "INSERT INTO sessions (id, station_id, owner_id, vehicle_ref, started_at, ended_at, duration_minutes, battery_start, battery_end, energy_delivered_kwh, state)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            session.id,
            session.station_id,
            session.owner_id,
            session.vehicle_ref,
            session.started_at.to_iso8601(),
            session.ended_at.map(TimestampMs::to_iso8601),
            session.duration_minutes,
            session.battery_start,
            session.battery_end,
            session.energy_delivered_kwh,
            session.state.as_str(),
        ],
    )?;

    Ok(())
}

/// Writes the ended fields only while the stored row is still active.
pub fn complete_session(connection: &Connection, ended: &Session) -> Result<bool, DbError> {
    let changed = connection.execute(
        "UPDATE sessions
         SET ended_at = ?2, duration_minutes = ?3, battery_end = ?4, energy_delivered_kwh = ?5, state = ?6
         WHERE id = ?1 AND state = 'active'",
        params![
            ended.id,
            ended.ended_at.map(TimestampMs::to_iso8601),
            ended.duration_minutes,
            ended.battery_end,
            ended.energy_delivered_kwh,
            SessionState::Ended.as_str(),
        ],
    )?;

    Ok(changed == 1)
}

pub fn get_session(connection: &Connection, session_id: &str) -> Result<Option<Session>, DbError> {
    let session = connection
        .query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
            params![session_id],
            session_from_row,
        )
        .optional()?;

    Ok(session)
}

pub fn get_active_session(
    connection: &Connection,
    station_id: &str,
) -> Result<Option<Session>, DbError> {
    let session = connection
        .query_row(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE station_id = ?1 AND state = 'active'
                 ORDER BY started_at DESC, rowid DESC
                 LIMIT 1"
            ),
            params![station_id],
            session_from_row,
        )
        .optional()?;

    Ok(session)
}

pub fn count_active_sessions(connection: &Connection, station_id: &str) -> Result<u32, DbError> {
    let count = connection.query_row(
        "SELECT COUNT(*) FROM sessions WHERE station_id = ?1 AND state = 'active'",
        params![station_id],
        |row| row.get(0),
    )?;

    Ok(count)
}

pub fn list_sessions(
    connection: &Connection,
    filter: &SessionFilter,
) -> Result<Vec<Session>, DbError> {
    let mut statement = connection.prepare(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions
         WHERE (?1 IS NULL OR station_id = ?1) AND (?2 IS NULL OR owner_id = ?2)
         ORDER BY started_at DESC, rowid DESC
         LIMIT ?3 OFFSET ?4"
    ))?;

    let rows = statement.query_map(
        params![
            filter.station_id,
            filter.owner_id,
            i64::from(filter.limit),
            i64::from(filter.offset)
        ],
        session_from_row,
    )?;

    let mut sessions = Vec::new();
    for row in rows {
        sessions.push(row?);
    }

    Ok(sessions)
}

pub fn insert_reconciliation_event(
    connection: &Connection,
    event: &NewReconciliationEvent,
) -> Result<String, DbError> {
    let id = Uuid::new_v4().to_string();
    connection.execute(
        "INSERT INTO reconciliation_events (id, created_at, station_id, session_id, kind, message, details_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            id,
            event.created_at,
            event.station_id,
            event.session_id,
            event.kind.as_str(),
            event.message,
            event.details_json,
        ],
    )?;

    Ok(id)
}

pub fn list_recent_reconciliation_events(
    connection: &Connection,
    limit: u32,
) -> Result<Vec<ReconciliationEvent>, DbError> {
    let mut statement = connection.prepare(
        "SELECT id, created_at, station_id, session_id, kind, message, details_json
         FROM reconciliation_events
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?1",
    )?;

    let rows = statement.query_map(params![i64::from(limit)], |row| {
        let kind: String = row.get(4)?;
        Ok(ReconciliationEvent {
            id: row.get(0)?,
            created_at: row.get(1)?,
            station_id: row.get(2)?,
            session_id: row.get(3)?,
            kind: ReconciliationKind::parse(&kind)
                .ok_or_else(|| invalid_text(4, "reconciliation kind", &kind))?,
            message: row.get(5)?,
            details_json: row.get(6)?,
        })
    })?;

    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }

    Ok(events)
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let started_at: String = row.get(4)?;
    let ended_at: Option<String> = row.get(5)?;
    let state: String = row.get(10)?;

    Ok(Session {
        id: row.get(0)?,
        station_id: row.get(1)?,
        owner_id: row.get(2)?,
        vehicle_ref: row.get(3)?,
        started_at: TimestampMs::parse_iso8601(&started_at)
            .ok_or_else(|| invalid_text(4, "started_at", &started_at))?,
        ended_at: match ended_at {
            Some(value) => Some(
                TimestampMs::parse_iso8601(&value)
                    .ok_or_else(|| invalid_text(5, "ended_at", &value))?,
            ),
            None => None,
        },
        duration_minutes: row.get(6)?,
        battery_start: row.get(7)?,
        battery_end: row.get(8)?,
        energy_delivered_kwh: row.get(9)?,
        state: SessionState::parse(&state).ok_or_else(|| invalid_text(10, "state", &state))?,
    })
}

fn invalid_text(column: usize, what: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        column,
        rusqlite::types::Type::Text,
        format!("invalid {what}: {value}").into(),
    )
}
