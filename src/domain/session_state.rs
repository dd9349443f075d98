use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::domain::models::{EndSession, NewSession, Session};

const MS_PER_MINUTE: i64 = 60_000;
const MAX_BATTERY_PERCENT: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimestampMs(pub i64);

impl TimestampMs {
    pub fn to_iso8601(self) -> String {
        let datetime = chrono::DateTime::<Utc>::from_timestamp_millis(self.0)
            .unwrap_or_else(|| chrono::DateTime::<Utc>::from(std::time::UNIX_EPOCH));
        datetime.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    pub fn parse_iso8601(value: &str) -> Option<Self> {
        chrono::DateTime::parse_from_rfc3339(value)
            .ok()
            .map(|datetime| Self(datetime.timestamp_millis()))
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> TimestampMs;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimestampMs {
        TimestampMs(Utc::now().timestamp_millis())
    }
}

/// `Active` is the only initial state, `Ended` the only terminal one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Active,
    Ended,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Ended => "ended",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "ended" => Some(Self::Ended),
            _ => None,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("requester is not the owner of session {session_id}")]
    Forbidden { session_id: String },
    #[error("session {session_id} has already ended")]
    AlreadyEnded { session_id: String },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("station id must not be empty")]
    EmptyStationId,
    #[error("{field} must be between 0 and 100, got {value}")]
    BatteryOutOfRange { field: &'static str, value: u8 },
    #[error("energy delivered must be a non-negative number, got {0}")]
    InvalidEnergy(f64),
    #[error("total chargers must be positive")]
    NoChargers,
}

pub fn validate_new_session(new_session: &NewSession) -> Result<(), ValidationError> {
    if new_session.station_id.trim().is_empty() {
        return Err(ValidationError::EmptyStationId);
    }
    validate_battery("batteryStart", new_session.battery_start)
}

pub fn validate_end_session(end: &EndSession) -> Result<(), ValidationError> {
    validate_battery("batteryEnd", end.battery_end)?;
    match end.energy_delivered_kwh {
        Some(energy) if !energy.is_finite() || energy < 0.0 => {
            Err(ValidationError::InvalidEnergy(energy))
        }
        _ => Ok(()),
    }
}

fn validate_battery(field: &'static str, value: Option<u8>) -> Result<(), ValidationError> {
    match value {
        Some(value) if value > MAX_BATTERY_PERCENT => {
            Err(ValidationError::BatteryOutOfRange { field, value })
        }
        _ => Ok(()),
    }
}

/// Ownership is only enforced when both sides carry an identity.
pub fn authorize_end(session: &Session, requester_id: Option<&str>) -> Result<(), TransitionError> {
    match (requester_id, session.owner_id.as_deref()) {
        (Some(requester), Some(owner)) if requester != owner => Err(TransitionError::Forbidden {
            session_id: session.id.clone(),
        }),
        _ => Ok(()),
    }
}

pub fn start_session(id: String, new_session: NewSession, started_at: TimestampMs) -> Session {
    Session {
        id,
        station_id: new_session.station_id,
        owner_id: new_session.owner_id,
        vehicle_ref: new_session.vehicle_ref,
        started_at,
        ended_at: None,
        duration_minutes: None,
        battery_start: new_session.battery_start,
        battery_end: None,
        energy_delivered_kwh: None,
        state: SessionState::Active,
    }
}

/// Applies the ACTIVE -> ENDED transition to an in-memory copy.
pub fn finish_session(
    session: &Session,
    end: &EndSession,
    ended_at: TimestampMs,
) -> Result<Session, TransitionError> {
    authorize_end(session, end.requester_id.as_deref())?;

    if session.state == SessionState::Ended {
        return Err(TransitionError::AlreadyEnded {
            session_id: session.id.clone(),
        });
    }

    Ok(Session {
        ended_at: Some(ended_at),
        duration_minutes: Some(duration_minutes(session.started_at, ended_at)),
        battery_end: end.battery_end,
        energy_delivered_kwh: end.energy_delivered_kwh,
        state: SessionState::Ended,
        ..session.clone()
    })
}

/// Whole minutes, rounded half up. A clock that moved backwards yields zero.
pub fn duration_minutes(started_at: TimestampMs, ended_at: TimestampMs) -> i64 {
    let elapsed_ms = (ended_at.0 - started_at.0).max(0);
    (elapsed_ms + MS_PER_MINUTE / 2) / MS_PER_MINUTE
}
