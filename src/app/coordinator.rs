//! Start and end of charging sessions as single logical transactions over
//! the availability ledger and the session repository.
//!
//! Both paths hold the station's ledger lock for the whole reserve/create or
//! end/release pair, so the invariant
//! `available_chargers + active sessions = total_chargers` can only be broken
//! inside one call. Any break that survives a call is written to the
//! reconciliation log.

use std::sync::Arc;

use serde_json::json;
use thiserror::Error;

use crate::app::ledger::{AvailabilityLedger, LedgerError, StationSlots};
use crate::app::lifecycle::{LifecycleError, SessionLifecycle};
use crate::app::services::{Store, StoreError};
use crate::domain::models::{
    CapacityAudit, EndSession, NewReconciliationEvent, NewSession, ReconciliationEvent,
    ReconciliationKind, Session, SessionFilter, StationCapacity,
};
use crate::domain::session_state::{
    Clock, ValidationError, validate_end_session, validate_new_session,
};

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("no charger available at station {station_id}")]
    CapacityExhausted { station_id: String },
    #[error("unknown station {station_id}")]
    StationNotFound { station_id: String },
    #[error("station {station_id} is registered with {existing} chargers, not {requested}")]
    StationConflict {
        station_id: String,
        existing: u32,
        requested: u32,
    },
    #[error("session {session_id} not found")]
    SessionNotFound { session_id: String },
    #[error("requester is not the owner of session {session_id}")]
    Forbidden { session_id: String },
    #[error("session {session_id} has already ended")]
    AlreadyEnded { session_id: String },
    #[error("invalid input: {0}")]
    InvalidInput(#[from] ValidationError),
    #[error("persistence failure: {0}")]
    PersistenceFailure(#[source] StoreError),
}

impl From<StoreError> for CoordinatorError {
    fn from(error: StoreError) -> Self {
        Self::PersistenceFailure(error)
    }
}

impl From<LifecycleError> for CoordinatorError {
    fn from(error: LifecycleError) -> Self {
        match error {
            LifecycleError::NotFound { session_id } => Self::SessionNotFound { session_id },
            LifecycleError::Forbidden { session_id } => Self::Forbidden { session_id },
            LifecycleError::AlreadyEnded { session_id } => Self::AlreadyEnded { session_id },
            LifecycleError::Store(error) => Self::PersistenceFailure(error),
        }
    }
}

impl From<LedgerError> for CoordinatorError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::CapacityExhausted { station_id } => Self::CapacityExhausted { station_id },
            LedgerError::StationNotFound { station_id } => Self::StationNotFound { station_id },
            LedgerError::AlreadyAtCapacity { station_id, .. } => Self::PersistenceFailure(
                StoreError::Unavailable(format!("station {station_id} counter already at total")),
            ),
            LedgerError::Store(error) => Self::PersistenceFailure(error),
        }
    }
}

pub struct SessionCoordinator<S, C> {
    store: Arc<S>,
    ledger: AvailabilityLedger<S>,
    lifecycle: SessionLifecycle<S, C>,
}

impl<S, C> SessionCoordinator<S, C>
where
    S: Store,
    C: Clock,
{
    pub fn new(store: Arc<S>, clock: C) -> Self {
        Self {
            ledger: AvailabilityLedger::new(Arc::clone(&store)),
            lifecycle: SessionLifecycle::new(Arc::clone(&store), clock),
            store,
        }
    }

    /// Station catalog hook. Re-registering with the same total is a no-op.
    pub fn register_station(
        &self,
        station_id: &str,
        total_chargers: u32,
    ) -> Result<StationCapacity, CoordinatorError> {
        if station_id.trim().is_empty() {
            return Err(ValidationError::EmptyStationId.into());
        }
        if total_chargers == 0 {
            return Err(ValidationError::NoChargers.into());
        }

        self.ledger.with_station(station_id, |slots| {
            if let Some(created) = slots.register(total_chargers)? {
                tracing::info!(station_id, total_chargers, "station registered");
                return Ok(created);
            }

            let existing = slots.capacity()?;
            if existing.total_chargers != total_chargers {
                return Err(CoordinatorError::StationConflict {
                    station_id: station_id.to_string(),
                    existing: existing.total_chargers,
                    requested: total_chargers,
                });
            }
            Ok(existing)
        })
    }

    pub fn start_session(&self, new_session: NewSession) -> Result<Session, CoordinatorError> {
        validate_new_session(&new_session)?;
        let station_id = new_session.station_id.clone();

        self.ledger.with_station(&station_id, |slots| {
            let reserved = slots.reserve()?;

            match self.lifecycle.create_active(new_session) {
                Ok(session) => {
                    tracing::info!(
                        session_id = %session.id,
                        station_id = %station_id,
                        available_chargers = reserved.available_chargers,
                        total_chargers = reserved.total_chargers,
                        "charger reserved for session"
                    );
                    Ok(session)
                }
                Err(create_error) => {
                    tracing::warn!(
                        station_id = %station_id,
                        error = %create_error,
                        "session creation failed after reservation; rolling back"
                    );
                    self.roll_back_reservation(slots, &create_error);
                    Err(match create_error {
                        LifecycleError::Store(error) => CoordinatorError::PersistenceFailure(error),
                        other => CoordinatorError::PersistenceFailure(StoreError::Unavailable(
                            other.to_string(),
                        )),
                    })
                }
            }
        })
    }

    pub fn end_session(&self, session_id: &str, end: EndSession) -> Result<Session, CoordinatorError> {
        validate_end_session(&end)?;

        let station_id = self
            .lifecycle
            .get(session_id)?
            .map(|session| session.station_id)
            .ok_or_else(|| CoordinatorError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;

        self.ledger.with_station(&station_id, |slots| {
            let ended = self.lifecycle.end_session(session_id, &end)?;

            match slots.release() {
                Ok(capacity) => tracing::info!(
                    session_id,
                    station_id = %station_id,
                    available_chargers = capacity.available_chargers,
                    total_chargers = capacity.total_chargers,
                    "charger released after session end"
                ),
                Err(LedgerError::AlreadyAtCapacity { total_chargers, .. }) => self.escalate(
                    ReconciliationKind::ReleaseAtCapacity,
                    &station_id,
                    Some(session_id),
                    "session ended while station counter was already at total",
                    json!({ "totalChargers": total_chargers }),
                ),
                Err(error) => self.escalate(
                    ReconciliationKind::ReleaseFailed,
                    &station_id,
                    Some(session_id),
                    "charger release failed after session end; counter is one short",
                    json!({ "error": error.to_string(), "repair": "increment available_chargers by 1" }),
                ),
            }

            Ok(ended)
        })
    }

    pub fn get_active_session(&self, station_id: &str) -> Result<Option<Session>, CoordinatorError> {
        Ok(self.store.active_session_for_station(station_id)?)
    }

    pub fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<Session>, CoordinatorError> {
        Ok(self.store.list_sessions(filter)?)
    }

    pub fn station_capacity(&self, station_id: &str) -> Result<StationCapacity, CoordinatorError> {
        self.store
            .get_station(station_id)?
            .ok_or_else(|| CoordinatorError::StationNotFound {
                station_id: station_id.to_string(),
            })
    }

    pub fn recent_reconciliation_events(
        &self,
        limit: u32,
    ) -> Result<Vec<ReconciliationEvent>, CoordinatorError> {
        Ok(self.store.recent_events(limit)?)
    }

    /// Compares the counter with the ACTIVE sessions and logs any drift.
    pub fn audit_station(&self, station_id: &str) -> Result<CapacityAudit, CoordinatorError> {
        self.ledger
            .with_station(station_id, |slots| self.audit_locked(slots))
    }

    /// Audits the station and, if the counter drifted, resets it to
    /// `total_chargers - active sessions`.
    pub fn reconcile_station(&self, station_id: &str) -> Result<CapacityAudit, CoordinatorError> {
        self.ledger.with_station(station_id, |slots| {
            let audit = self.audit_locked(slots)?;
            if audit.drift == 0 {
                return Ok(audit);
            }

            let repaired = slots.repair(audit.expected_available)?;
            self.escalate(
                ReconciliationKind::DriftRepaired,
                station_id,
                None,
                "station counter repaired",
                json!({
                    "previousAvailable": audit.available_chargers,
                    "repairedAvailable": repaired.available_chargers,
                    "activeSessions": audit.active_sessions,
                }),
            );

            Ok(CapacityAudit::compute(&repaired, audit.active_sessions))
        })
    }

    pub fn reconcile_all(&self, repair: bool) -> Result<Vec<CapacityAudit>, CoordinatorError> {
        let station_ids = self.store.list_station_ids()?;
        let mut audits = Vec::with_capacity(station_ids.len());

        for station_id in station_ids {
            let audit = if repair {
                self.reconcile_station(&station_id)?
            } else {
                self.audit_station(&station_id)?
            };
            audits.push(audit);
        }

        Ok(audits)
    }

    fn audit_locked(&self, slots: &StationSlots<'_, S>) -> Result<CapacityAudit, CoordinatorError> {
        let capacity = slots.capacity()?;
        let active_sessions = self.store.count_active_sessions(slots.station_id())?;
        let audit = CapacityAudit::compute(&capacity, active_sessions);

        if !audit.is_consistent() {
            self.escalate(
                ReconciliationKind::DriftDetected,
                slots.station_id(),
                None,
                "station counter does not match active sessions",
                json!({
                    "totalChargers": audit.total_chargers,
                    "availableChargers": audit.available_chargers,
                    "activeSessions": audit.active_sessions,
                    "drift": audit.drift,
                }),
            );
        }

        Ok(audit)
    }

    fn roll_back_reservation(&self, slots: &StationSlots<'_, S>, cause: &LifecycleError) {
        match slots.release() {
            Ok(capacity) => tracing::info!(
                station_id = slots.station_id(),
                available_chargers = capacity.available_chargers,
                "reservation rolled back"
            ),
            Err(release_error) => self.escalate(
                ReconciliationKind::RollbackReleaseFailed,
                slots.station_id(),
                None,
                "reservation could not be rolled back; a charger is held with no session",
                json!({
                    "cause": cause.to_string(),
                    "releaseError": release_error.to_string(),
                    "repair": "increment available_chargers by 1",
                }),
            ),
        }
    }

    /// Logs the anomaly and stores it for out-of-band repair. Failing to store
    /// the event never fails the caller's operation.
    fn escalate(
        &self,
        kind: ReconciliationKind,
        station_id: &str,
        session_id: Option<&str>,
        message: &str,
        details: serde_json::Value,
    ) {
        match kind {
            ReconciliationKind::DriftDetected | ReconciliationKind::DriftRepaired => {
                tracing::warn!(
                    station_id,
                    session_id,
                    kind = kind.as_str(),
                    details = %details,
                    "{message}"
                )
            }
            _ => tracing::error!(
                station_id,
                session_id,
                kind = kind.as_str(),
                details = %details,
                "reconciliation required: {message}"
            ),
        }

        let event = NewReconciliationEvent {
            created_at: self.lifecycle.now().to_iso8601(),
            station_id: station_id.to_string(),
            session_id: session_id.map(ToString::to_string),
            kind,
            message: message.to_string(),
            details_json: Some(details.to_string()),
        };

        if let Err(error) = self.store.record_event(&event) {
            tracing::error!(
                station_id,
                kind = kind.as_str(),
                error = %error,
                details = %details,
                "failed to persist reconciliation event"
            );
        }
    }
}
