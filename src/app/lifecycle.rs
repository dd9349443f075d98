use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::app::services::{SessionRepository, StoreError};
use crate::domain::models::{EndSession, NewSession, Session};
use crate::domain::session_state::{Clock, TimestampMs, TransitionError, finish_session, start_session};

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("session {session_id} not found")]
    NotFound { session_id: String },
    #[error("requester is not the owner of session {session_id}")]
    Forbidden { session_id: String },
    #[error("session {session_id} has already ended")]
    AlreadyEnded { session_id: String },
    #[error("session storage failed: {0}")]
    Store(#[from] StoreError),
}

impl From<TransitionError> for LifecycleError {
    fn from(error: TransitionError) -> Self {
        match error {
            TransitionError::Forbidden { session_id } => Self::Forbidden { session_id },
            TransitionError::AlreadyEnded { session_id } => Self::AlreadyEnded { session_id },
        }
    }
}

/// Drives sessions through ACTIVE -> ENDED. Knows nothing about capacity.
pub struct SessionLifecycle<S, C> {
    store: Arc<S>,
    clock: C,
}

impl<S, C> SessionLifecycle<S, C>
where
    S: SessionRepository,
    C: Clock,
{
    pub fn new(store: Arc<S>, clock: C) -> Self {
        Self { store, clock }
    }

    pub fn now(&self) -> TimestampMs {
        self.clock.now()
    }

    pub fn create_active(&self, new_session: NewSession) -> Result<Session, LifecycleError> {
        let session = start_session(Uuid::new_v4().to_string(), new_session, self.clock.now());
        self.store.insert_session(&session)?;

        tracing::info!(
            session_id = %session.id,
            station_id = %session.station_id,
            owner_id = session.owner_id.as_deref().unwrap_or("anonymous"),
            started_at = %session.started_at.to_iso8601(),
            "charging session started"
        );

        Ok(session)
    }

    pub fn end_session(&self, session_id: &str, end: &EndSession) -> Result<Session, LifecycleError> {
        let session = self
            .store
            .get_session(session_id)?
            .ok_or_else(|| LifecycleError::NotFound {
                session_id: session_id.to_string(),
            })?;

        let ended = finish_session(&session, end, self.clock.now())?;

        // A concurrent end may have won between the read and this update.
        if !self.store.complete_session(&ended)? {
            return Err(LifecycleError::AlreadyEnded {
                session_id: session_id.to_string(),
            });
        }

        tracing::info!(
            session_id = %ended.id,
            station_id = %ended.station_id,
            duration_minutes = ended.duration_minutes,
            battery_end = ended.battery_end,
            energy_delivered_kwh = ended.energy_delivered_kwh,
            "charging session ended"
        );

        Ok(ended)
    }

    pub fn get(&self, session_id: &str) -> Result<Option<Session>, LifecycleError> {
        Ok(self.store.get_session(session_id)?)
    }
}
