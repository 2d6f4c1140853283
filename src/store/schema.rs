//! Table definitions and versioned migrations
//!
//! The current version lives in `metadata.schema_version`; each migration
//! runs once, in order, when the database is opened.

use rusqlite::Connection;

/// Latest schema version this build knows how to create
pub const SCHEMA_VERSION: i32 = 2;

/// Bring `conn`'s database up to [`SCHEMA_VERSION`]
pub fn init(conn: &Connection) -> rusqlite::Result<()> {
    let current = current_version(conn);

    if current < 1 {
        apply_schema_v1(conn)?;
    }
    if current < 2 {
        migrate_v1_to_v2(conn)?;
    }

    Ok(())
}

/// Stored schema version, 0 for a fresh database
pub fn current_version(conn: &Connection) -> i32 {
    conn.query_row(
        "SELECT COALESCE(
            (SELECT CAST(value AS INTEGER) FROM metadata WHERE key = 'schema_version'),
            0
        )",
        [],
        |row| row.get(0),
    )
    .unwrap_or(0)
}

/// Initial schema (v1)
fn apply_schema_v1(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Metadata table (created first for version tracking)
        CREATE TABLE IF NOT EXISTS metadata (
            key TEXT PRIMARY KEY,
            value TEXT
        );

        -- Desired run state, polled by the controller
        CREATE TABLE IF NOT EXISTS job_control (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            state TEXT NOT NULL DEFAULT 'stopped',
            updated_at TEXT
        );
        INSERT OR IGNORE INTO job_control (id, state) VALUES (1, 'stopped');

        -- Monitored identities
        CREATE TABLE IF NOT EXISTS identities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            display_name TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            added_at TEXT NOT NULL,
            last_seen TEXT,
            total_streams INTEGER NOT NULL DEFAULT 0,
            total_duration INTEGER NOT NULL DEFAULT 0,
            notes TEXT
        );

        -- One row per live broadcast
        CREATE TABLE IF NOT EXISTS stream_sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id TEXT NOT NULL UNIQUE,
            identity TEXT NOT NULL,
            room_id TEXT,
            start_time TEXT NOT NULL,
            end_time TEXT,
            duration INTEGER,
            total_likes INTEGER NOT NULL DEFAULT 0,
            total_gifts INTEGER NOT NULL DEFAULT 0,
            total_comments INTEGER NOT NULL DEFAULT 0,
            total_shares INTEGER NOT NULL DEFAULT 0,
            total_members INTEGER NOT NULL DEFAULT 0,
            is_completed INTEGER NOT NULL DEFAULT 0
        );

        -- Append-only interaction records
        CREATE TABLE IF NOT EXISTS chat_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identity TEXT NOT NULL,
            actor TEXT NOT NULL,
            comment TEXT NOT NULL,
            timestamp TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS gift_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identity TEXT NOT NULL,
            actor TEXT NOT NULL,
            gift_id TEXT NOT NULL,
            repeat_count INTEGER NOT NULL,
            timestamp TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS like_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identity TEXT NOT NULL,
            actor TEXT NOT NULL,
            like_count INTEGER NOT NULL,
            total_like_count INTEGER NOT NULL,
            timestamp TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS share_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identity TEXT NOT NULL,
            actor TEXT NOT NULL,
            timestamp TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS member_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identity TEXT NOT NULL,
            actor TEXT NOT NULL,
            timestamp TEXT NOT NULL
        );

        -- Per-fan aggregates
        CREATE TABLE IF NOT EXISTS user_stats (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identity TEXT NOT NULL,
            actor TEXT NOT NULL,
            total_gifts INTEGER NOT NULL DEFAULT 0,
            total_likes INTEGER NOT NULL DEFAULT 0,
            total_comments INTEGER NOT NULL DEFAULT 0,
            total_shares INTEGER NOT NULL DEFAULT 0,
            total_memberships INTEGER NOT NULL DEFAULT 0,
            first_seen TEXT NOT NULL,
            last_seen TEXT NOT NULL,
            UNIQUE(identity, actor)
        );

        INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', '1');
        "#,
    )
}

/// v2: stream metadata table + lookup indexes
fn migrate_v1_to_v2(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS stream_info (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            identity TEXT NOT NULL UNIQUE,
            room_id TEXT,
            is_live INTEGER NOT NULL DEFAULT 0,
            media_url TEXT,
            created_at TEXT,
            bio TEXT,
            last_updated TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_identity ON stream_sessions(identity, is_completed);
        CREATE INDEX IF NOT EXISTS idx_chat_identity ON chat_events(identity, timestamp);
        CREATE INDEX IF NOT EXISTS idx_gift_identity ON gift_events(identity, timestamp);
        CREATE INDEX IF NOT EXISTS idx_like_identity ON like_events(identity, timestamp);
        CREATE INDEX IF NOT EXISTS idx_user_stats_identity ON user_stats(identity);

        INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', '2');
        "#,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn test_fresh_database_reaches_latest_version() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(current_version(&conn), 0);

        init(&conn).unwrap();

        assert_eq!(current_version(&conn), SCHEMA_VERSION);
        let tables = table_names(&conn);
        for expected in [
            "chat_events",
            "gift_events",
            "identities",
            "job_control",
            "like_events",
            "member_events",
            "share_events",
            "stream_info",
            "stream_sessions",
            "user_stats",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing {}", expected);
        }
    }

    #[test]
    fn test_init_is_idempotent_and_keeps_job_state() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn).unwrap();
        conn.execute("UPDATE job_control SET state = 'started' WHERE id = 1", [])
            .unwrap();

        init(&conn).unwrap();

        let state: String = conn
            .query_row("SELECT state FROM job_control WHERE id = 1", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(state, "started");
    }

    #[test]
    fn test_v1_database_is_migrated() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema_v1(&conn).unwrap();
        assert_eq!(current_version(&conn), 1);
        assert!(!table_names(&conn).iter().any(|t| t == "stream_info"));

        init(&conn).unwrap();

        assert_eq!(current_version(&conn), 2);
        assert!(table_names(&conn).iter().any(|t| t == "stream_info"));
    }
}
