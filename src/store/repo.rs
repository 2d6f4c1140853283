//! Typed reads and writes on top of the gateway
//!
//! Every method here is a thin wrapper around [`PersistenceGateway::run`], so
//! all of them share the permit limit and the busy retry.

use super::{PersistenceGateway, StoreError};
use crate::clock::{from_db_timestamp, to_db_timestamp};
use crate::events::{Interaction, InteractionKind, InteractionPayload};
use crate::platform::RoomInfo;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

// ─────────────────────────────────────────────────────────────────────────────
// Row types
// ─────────────────────────────────────────────────────────────────────────────

/// Desired state of the monitor subsystem (the `job_control` row)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Started,
    Stopped,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Stopped => "stopped",
        }
    }

    /// Anything other than "started" reads as stopped
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("started") {
            Self::Started
        } else {
            Self::Stopped
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitoredIdentity {
    pub name: String,
    pub display_name: Option<String>,
    pub is_active: bool,
    pub added_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    pub total_streams: i64,
    /// Seconds across all closed sessions
    pub total_duration: i64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamSession {
    pub session_id: String,
    pub identity: String,
    pub room_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration: Option<i64>,
    pub total_likes: i64,
    pub total_gifts: i64,
    pub total_comments: i64,
    pub total_shares: i64,
    pub total_members: i64,
    pub is_completed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserStat {
    pub identity: String,
    pub actor: String,
    pub total_gifts: i64,
    pub total_likes: i64,
    pub total_comments: i64,
    pub total_shares: i64,
    pub total_memberships: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub identity: String,
    pub room_id: Option<String>,
    pub is_live: bool,
    pub media_url: Option<String>,
    pub created_at: Option<String>,
    pub bio: Option<String>,
    pub last_updated: DateTime<Utc>,
}

/// Running counter on an open session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCounter {
    Likes,
    Gifts,
    Comments,
    Shares,
    Members,
}

impl SessionCounter {
    fn column(&self) -> &'static str {
        match self {
            Self::Likes => "total_likes",
            Self::Gifts => "total_gifts",
            Self::Comments => "total_comments",
            Self::Shares => "total_shares",
            Self::Members => "total_members",
        }
    }
}

impl From<InteractionKind> for SessionCounter {
    fn from(kind: InteractionKind) -> Self {
        match kind {
            InteractionKind::Comment => Self::Comments,
            InteractionKind::Gift => Self::Gifts,
            InteractionKind::Like => Self::Likes,
            InteractionKind::Share => Self::Shares,
            InteractionKind::Member => Self::Members,
        }
    }
}

fn user_stat_column(kind: InteractionKind) -> &'static str {
    match kind {
        InteractionKind::Comment => "total_comments",
        InteractionKind::Gift => "total_gifts",
        InteractionKind::Like => "total_likes",
        InteractionKind::Share => "total_shares",
        InteractionKind::Member => "total_memberships",
    }
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    from_db_timestamp(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("invalid timestamp: {}", raw).into(),
        )
    })
}

fn optional_timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.as_deref().and_then(from_db_timestamp))
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

const IDENTITY_COLUMNS: &str = "name, display_name, is_active, added_at, last_seen, \
     total_streams, total_duration, notes";

fn identity_from_row(row: &Row<'_>) -> rusqlite::Result<MonitoredIdentity> {
    Ok(MonitoredIdentity {
        name: row.get(0)?,
        display_name: row.get(1)?,
        is_active: row.get(2)?,
        added_at: timestamp_at(row, 3)?,
        last_seen: optional_timestamp_at(row, 4)?,
        total_streams: row.get(5)?,
        total_duration: row.get(6)?,
        notes: row.get(7)?,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Events & fan statistics
// ─────────────────────────────────────────────────────────────────────────────

impl PersistenceGateway {
    /// Append one interaction to its event table
    pub async fn insert_event(
        &self,
        identity: &str,
        interaction: &Interaction,
    ) -> Result<(), StoreError> {
        let identity = identity.to_string();
        let actor = interaction.actor.clone();
        let timestamp = to_db_timestamp(interaction.timestamp);
        let payload = interaction.payload.clone();

        self.run("insert_event", move |conn| {
            match &payload {
                InteractionPayload::Chat { text } => conn.execute(
                    "INSERT INTO chat_events (identity, actor, comment, timestamp)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![identity, actor, text, timestamp],
                ),
                InteractionPayload::Gift { gift_id, quantity } => conn.execute(
                    "INSERT INTO gift_events (identity, actor, gift_id, repeat_count, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![identity, actor, gift_id, quantity, timestamp],
                ),
                InteractionPayload::Like { count, total_count } => conn.execute(
                    "INSERT INTO like_events
                         (identity, actor, like_count, total_like_count, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![identity, actor, count, saturating_i64(*total_count), timestamp],
                ),
                InteractionPayload::Share => conn.execute(
                    "INSERT INTO share_events (identity, actor, timestamp) VALUES (?1, ?2, ?3)",
                    params![identity, actor, timestamp],
                ),
                InteractionPayload::Member => conn.execute(
                    "INSERT INTO member_events (identity, actor, timestamp) VALUES (?1, ?2, ?3)",
                    params![identity, actor, timestamp],
                ),
            }?;
            Ok(())
        })
        .await
    }

    /// Count one interaction of `kind` for a fan, creating the row on first sight
    pub async fn bump_user_stat(
        &self,
        identity: &str,
        actor: &str,
        kind: InteractionKind,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let column = user_stat_column(kind);
        let sql = format!(
            "INSERT INTO user_stats (identity, actor, {col}, first_seen, last_seen)
             VALUES (?1, ?2, 1, ?3, ?3)
             ON CONFLICT(identity, actor) DO UPDATE SET
                {col} = {col} + 1,
                last_seen = excluded.last_seen",
            col = column
        );
        let identity = identity.to_string();
        let actor = actor.to_string();
        let at = to_db_timestamp(at);

        self.run("bump_user_stat", move |conn| {
            conn.execute(&sql, params![identity, actor, at])?;
            Ok(())
        })
        .await
    }

    pub async fn user_stat(
        &self,
        identity: &str,
        actor: &str,
    ) -> Result<Option<UserStat>, StoreError> {
        let identity = identity.to_string();
        let actor = actor.to_string();

        self.run("user_stat", move |conn| {
            conn.query_row(
                "SELECT identity, actor, total_gifts, total_likes, total_comments,
                        total_shares, total_memberships, first_seen, last_seen
                 FROM user_stats WHERE identity = ?1 AND actor = ?2",
                params![identity, actor],
                |row| {
                    Ok(UserStat {
                        identity: row.get(0)?,
                        actor: row.get(1)?,
                        total_gifts: row.get(2)?,
                        total_likes: row.get(3)?,
                        total_comments: row.get(4)?,
                        total_shares: row.get(5)?,
                        total_memberships: row.get(6)?,
                        first_seen: timestamp_at(row, 7)?,
                        last_seen: timestamp_at(row, 8)?,
                    })
                },
            )
            .optional()
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn insert_session(
        &self,
        session_id: &str,
        identity: &str,
        room_id: &str,
        start: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let session_id = session_id.to_string();
        let identity = identity.to_string();
        let room_id = room_id.to_string();
        let start = to_db_timestamp(start);

        self.run("insert_session", move |conn| {
            conn.execute(
                "INSERT INTO stream_sessions (session_id, identity, room_id, start_time)
                 VALUES (?1, ?2, ?3, ?4)",
                params![session_id, identity, room_id, start],
            )?;
            Ok(())
        })
        .await
    }

    /// Add `amount` to one of an open session's running counters
    pub async fn increment_session_counter(
        &self,
        session_id: &str,
        counter: SessionCounter,
        amount: u64,
    ) -> Result<(), StoreError> {
        let sql = format!(
            "UPDATE stream_sessions SET {col} = {col} + ?2
             WHERE session_id = ?1 AND is_completed = 0",
            col = counter.column()
        );
        let session_id = session_id.to_string();
        let amount = saturating_i64(amount);

        self.run("increment_session_counter", move |conn| {
            conn.execute(&sql, params![session_id, amount])?;
            Ok(())
        })
        .await
    }

    /// Stamp end time and duration and fold the session into the identity's
    /// lifetime totals, in one transaction
    ///
    /// Returns false (and leaves the totals alone) if the session was already
    /// closed.
    pub async fn finish_session(
        &self,
        identity: &str,
        session_id: &str,
        end: DateTime<Utc>,
        duration_secs: i64,
    ) -> Result<bool, StoreError> {
        let identity = identity.to_string();
        let session_id = session_id.to_string();
        let end = to_db_timestamp(end);

        self.run("finish_session", move |conn| {
            let tx = conn.unchecked_transaction()?;
            let changed = tx.execute(
                "UPDATE stream_sessions
                 SET end_time = ?2, duration = ?3, is_completed = 1
                 WHERE session_id = ?1 AND is_completed = 0",
                params![session_id, end, duration_secs],
            )?;
            if changed > 0 {
                tx.execute(
                    "UPDATE identities
                     SET total_streams = total_streams + 1,
                         total_duration = total_duration + ?2
                     WHERE name = ?1",
                    params![identity, duration_secs],
                )?;
            }
            tx.commit()?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn session(&self, session_id: &str) -> Result<Option<StreamSession>, StoreError> {
        let session_id = session_id.to_string();

        self.run("session", move |conn| {
            conn.query_row(
                "SELECT session_id, identity, room_id, start_time, end_time, duration,
                        total_likes, total_gifts, total_comments, total_shares,
                        total_members, is_completed
                 FROM stream_sessions WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok(StreamSession {
                        session_id: row.get(0)?,
                        identity: row.get(1)?,
                        room_id: row.get(2)?,
                        start_time: timestamp_at(row, 3)?,
                        end_time: optional_timestamp_at(row, 4)?,
                        duration: row.get(5)?,
                        total_likes: row.get(6)?,
                        total_gifts: row.get(7)?,
                        total_comments: row.get(8)?,
                        total_shares: row.get(9)?,
                        total_members: row.get(10)?,
                        is_completed: row.get(11)?,
                    })
                },
            )
            .optional()
        })
        .await
    }

    /// Number of sessions for `identity` that have not been closed
    pub async fn open_session_count(&self, identity: &str) -> Result<i64, StoreError> {
        let identity = identity.to_string();

        self.run("open_session_count", move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM stream_sessions WHERE identity = ?1 AND is_completed = 0",
                params![identity],
                |row| row.get(0),
            )
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Identities
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn touch_last_seen(
        &self,
        identity: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let identity = identity.to_string();
        let at = to_db_timestamp(at);

        self.run("touch_last_seen", move |conn| {
            conn.execute(
                "UPDATE identities SET last_seen = ?2 WHERE name = ?1",
                params![identity, at],
            )?;
            Ok(())
        })
        .await
    }

    /// Names of active identities, in insertion order
    pub async fn active_identities(&self) -> Result<Vec<String>, StoreError> {
        self.run("active_identities", |conn| {
            let mut stmt =
                conn.prepare("SELECT name FROM identities WHERE is_active = 1 ORDER BY id")?;
            let names = stmt
                .query_map([], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(names)
        })
        .await
    }

    /// Register an identity (active); returns false if it already exists
    pub async fn add_identity(
        &self,
        name: &str,
        notes: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let name = name.trim().to_string();
        let notes = notes.map(str::to_string);
        let at = to_db_timestamp(at);

        self.run("add_identity", move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO identities (name, is_active, added_at, notes)
                 VALUES (?1, 1, ?2, ?3)",
                params![name, at, notes],
            )?;
            Ok(inserted > 0)
        })
        .await
    }

    /// Flip the active flag; returns false if the identity is unknown
    pub async fn set_identity_active(&self, name: &str, active: bool) -> Result<bool, StoreError> {
        let name = name.trim().to_string();

        self.run("set_identity_active", move |conn| {
            let changed = conn.execute(
                "UPDATE identities SET is_active = ?2 WHERE name = ?1",
                params![name, active],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn list_identities(&self) -> Result<Vec<MonitoredIdentity>, StoreError> {
        self.run("list_identities", |conn| {
            let sql = format!("SELECT {} FROM identities ORDER BY id", IDENTITY_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], identity_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn identity(&self, name: &str) -> Result<Option<MonitoredIdentity>, StoreError> {
        let name = name.to_string();

        self.run("identity", move |conn| {
            let sql = format!("SELECT {} FROM identities WHERE name = ?1", IDENTITY_COLUMNS);
            conn.query_row(&sql, params![name], identity_from_row)
                .optional()
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stream metadata
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a fresh connection; clears enrichment from the previous room
    pub async fn upsert_stream_info(
        &self,
        identity: &str,
        room_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let identity = identity.to_string();
        let room_id = room_id.to_string();
        let at = to_db_timestamp(at);

        self.run("upsert_stream_info", move |conn| {
            conn.execute(
                "INSERT INTO stream_info (identity, room_id, is_live, last_updated)
                 VALUES (?1, ?2, 1, ?3)
                 ON CONFLICT(identity) DO UPDATE SET
                    room_id = excluded.room_id,
                    is_live = 1,
                    media_url = NULL,
                    created_at = NULL,
                    bio = NULL,
                    last_updated = excluded.last_updated",
                params![identity, room_id, at],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn enrich_stream_info(
        &self,
        identity: &str,
        info: &RoomInfo,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let identity = identity.to_string();
        let info = info.clone();
        let at = to_db_timestamp(at);

        self.run("enrich_stream_info", move |conn| {
            conn.execute(
                "UPDATE stream_info
                 SET media_url = ?2, created_at = ?3, bio = ?4, last_updated = ?5
                 WHERE identity = ?1",
                params![identity, info.media_url, info.created_at, info.bio, at],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn mark_stream_offline(
        &self,
        identity: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let identity = identity.to_string();
        let at = to_db_timestamp(at);

        self.run("mark_stream_offline", move |conn| {
            conn.execute(
                "UPDATE stream_info SET is_live = 0, last_updated = ?2 WHERE identity = ?1",
                params![identity, at],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn stream_info(&self, identity: &str) -> Result<Option<StreamInfo>, StoreError> {
        let identity = identity.to_string();

        self.run("stream_info", move |conn| {
            conn.query_row(
                "SELECT identity, room_id, is_live, media_url, created_at, bio, last_updated
                 FROM stream_info WHERE identity = ?1",
                params![identity],
                |row| {
                    Ok(StreamInfo {
                        identity: row.get(0)?,
                        room_id: row.get(1)?,
                        is_live: row.get(2)?,
                        media_url: row.get(3)?,
                        created_at: row.get(4)?,
                        bio: row.get(5)?,
                        last_updated: timestamp_at(row, 6)?,
                    })
                },
            )
            .optional()
        })
        .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Run control
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn run_state(&self) -> Result<RunState, StoreError> {
        self.run("run_state", |conn| {
            let state: Option<String> = conn
                .query_row("SELECT state FROM job_control WHERE id = 1", [], |row| {
                    row.get(0)
                })
                .optional()?;
            Ok(state.map_or(RunState::Stopped, |s| RunState::parse(&s)))
        })
        .await
    }

    pub async fn set_run_state(
        &self,
        state: RunState,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let at = to_db_timestamp(at);

        self.run("set_run_state", move |conn| {
            conn.execute(
                "INSERT INTO job_control (id, state, updated_at) VALUES (1, ?1, ?2)
                 ON CONFLICT(id) DO UPDATE
                 SET state = excluded.state, updated_at = excluded.updated_at",
                params![state.as_str(), at],
            )?;
            Ok(())
        })
        .await
    }
}
