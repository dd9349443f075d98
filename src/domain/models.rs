use serde::Serialize;

use crate::domain::session_state::{SessionState, TimestampMs};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StationCapacity {
    pub station_id: String,
    pub total_chargers: u32,
    pub available_chargers: u32,
}

impl StationCapacity {
    /// A freshly registered station has every charger free.
    pub fn new(station_id: impl Into<String>, total_chargers: u32) -> Self {
        Self {
            station_id: station_id.into(),
            total_chargers,
            available_chargers: total_chargers,
        }
    }

    pub fn in_use(&self) -> u32 {
        self.total_chargers.saturating_sub(self.available_chargers)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub station_id: String,
    pub owner_id: Option<String>,
    pub vehicle_ref: Option<String>,
    pub started_at: TimestampMs,
    pub ended_at: Option<TimestampMs>,
    pub duration_minutes: Option<i64>,
    pub battery_start: Option<u8>,
    pub battery_end: Option<u8>,
    pub energy_delivered_kwh: Option<f64>,
    pub state: SessionState,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewSession {
    pub station_id: String,
    pub owner_id: Option<String>,
    pub vehicle_ref: Option<String>,
    pub battery_start: Option<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EndSession {
    pub battery_end: Option<u8>,
    pub energy_delivered_kwh: Option<f64>,
    pub requester_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFilter {
    pub station_id: Option<String>,
    pub owner_id: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl Default for SessionFilter {
    fn default() -> Self {
        Self {
            station_id: None,
            owner_id: None,
            limit: 50,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationKind {
    RollbackReleaseFailed,
    ReleaseFailed,
    ReleaseAtCapacity,
    DriftDetected,
    DriftRepaired,
}

impl ReconciliationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RollbackReleaseFailed => "rollback_release_failed",
            Self::ReleaseFailed => "release_failed",
            Self::ReleaseAtCapacity => "release_at_capacity",
            Self::DriftDetected => "drift_detected",
            Self::DriftRepaired => "drift_repaired",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "rollback_release_failed" => Some(Self::RollbackReleaseFailed),
            "release_failed" => Some(Self::ReleaseFailed),
            "release_at_capacity" => Some(Self::ReleaseAtCapacity),
            "drift_detected" => Some(Self::DriftDetected),
            "drift_repaired" => Some(Self::DriftRepaired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewReconciliationEvent {
    pub created_at: String,
    pub station_id: String,
    pub session_id: Option<String>,
    pub kind: ReconciliationKind,
    pub message: String,
    pub details_json: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationEvent {
    pub id: String,
    pub created_at: String,
    pub station_id: String,
    pub session_id: Option<String>,
    pub kind: ReconciliationKind,
    pub message: String,
    pub details_json: Option<String>,
}

/// Counter state of one station compared against its ACTIVE sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityAudit {
    pub station_id: String,
    pub total_chargers: u32,
    pub available_chargers: u32,
    pub active_sessions: u32,
    pub expected_available: u32,
    pub drift: i64,
}

impl CapacityAudit {
    pub fn compute(capacity: &StationCapacity, active_sessions: u32) -> Self {
        let expected_available = capacity.total_chargers.saturating_sub(active_sessions);
        Self {
            station_id: capacity.station_id.clone(),
            total_chargers: capacity.total_chargers,
            available_chargers: capacity.available_chargers,
            active_sessions,
            expected_available,
            drift: i64::from(capacity.available_chargers) - i64::from(expected_available),
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.drift == 0 && self.active_sessions <= self.total_chargers
    }
}
