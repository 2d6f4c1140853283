//! Session tracking: one `stream_sessions` row per live broadcast
//!
//! The open session itself is held by the supervisor that owns the
//! connection (`Option<OpenSession>` in its state), so "at most one open
//! session per identity" is enforced by ownership rather than by lookups.
//! The tracker only writes rows and rolls identity totals.

use crate::clock::Clock;
use crate::events::InteractionKind;
use crate::store::{PersistenceGateway, SessionCounter, StoreError};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Handle to the identity's current, not yet closed, session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenSession {
    pub session_id: String,
    pub room_id: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedSession {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: i64,
}

/// Opens, counts and closes sessions
///
/// Clones share the session-id sequence, so ids stay unique across every
/// supervisor in the process.
#[derive(Clone)]
pub struct SessionTracker {
    store: PersistenceGateway,
    clock: Clock,
    last_id_ms: Arc<AtomicI64>,
}

impl SessionTracker {
    pub fn new(store: PersistenceGateway, clock: Clock) -> Self {
        Self {
            store,
            clock,
            last_id_ms: Arc::new(AtomicI64::new(0)),
        }
    }

    /// `<identity>_<millis>`, with millis strictly increasing
    fn next_session_id(&self, identity: &str, now: DateTime<Utc>) -> String {
        let now_ms = now.timestamp_millis();
        let previous = self
            .last_id_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now_ms.max(last + 1))
            })
            .unwrap_or(now_ms);
        format!("{}_{}", identity, now_ms.max(previous + 1))
    }

    /// Insert a zeroed session row for a fresh connection
    pub async fn open_session(
        &self,
        identity: &str,
        room_id: &str,
    ) -> Result<OpenSession, StoreError> {
        let started_at = self.clock.now();
        let session_id = self.next_session_id(identity, started_at);

        self.store
            .insert_session(&session_id, identity, room_id, started_at)
            .await?;

        tracing::info!(identity, session = %session_id, room = %room_id, "Session opened");

        Ok(OpenSession {
            session_id,
            room_id: room_id.to_string(),
            started_at,
        })
    }

    /// Add `amount` to the session counter for `kind`; no-op without a session
    pub async fn record_event(
        &self,
        session: Option<&OpenSession>,
        kind: InteractionKind,
        amount: u64,
    ) -> Result<(), StoreError> {
        let Some(session) = session else {
            return Ok(());
        };

        self.store
            .increment_session_counter(&session.session_id, SessionCounter::from(kind), amount)
            .await
    }

    /// Close the session and roll it into the identity's totals
    ///
    /// Both writes commit together. Returns `None` when the row was already
    /// closed, so a repeated close is harmless. On error nothing was written
    /// and the caller still holds the session to retry with.
    pub async fn close_session(
        &self,
        identity: &str,
        session: &OpenSession,
    ) -> Result<Option<ClosedSession>, StoreError> {
        let ended_at = self.clock.now();
        let duration_secs = (ended_at - session.started_at).num_seconds().max(0);

        let finished = self
            .store
            .finish_session(identity, &session.session_id, ended_at, duration_secs)
            .await?;
        if !finished {
            tracing::debug!(identity, session = %session.session_id, "Session already closed");
            return Ok(None);
        }

        tracing::info!(
            identity,
            session = %session.session_id,
            duration_secs,
            "Session closed"
        );

        Ok(Some(ClosedSession {
            session_id: session.session_id.clone(),
            started_at: session.started_at,
            ended_at,
            duration_secs,
        }))
    }
}
