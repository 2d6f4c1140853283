//! Persistence gateway: bounded-concurrency, retrying access to SQLite
//!
//! Every read and write in the monitor goes through [`PersistenceGateway::run`].
//! A counting semaphore caps in-flight operations so bursts (a gift combo on
//! several streams at once) queue up instead of piling onto the database, and
//! transient "database is busy/locked" failures are retried with exponential
//! backoff plus jitter. Any other error surfaces immediately.
//!
//! # Architecture
//!
//! ```text
//! Supervisors / SessionTracker / Reconciler / Controller
//!         │
//!         └──→ PersistenceGateway::run(op)
//!                 │
//!                 ├──→ Semaphore (max_concurrent permits)
//!                 ├──→ spawn_blocking + r2d2 pooled connection
//!                 │       └──→ SQLite (WAL mode, busy_timeout)
//!                 └──→ busy? → sleep(min(base·2^n, cap) + jitter) → retry
//! ```

use crate::config::StorageConfig;
use crate::util::exponential_delay;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rand::Rng;
use rusqlite::{Connection, ErrorCode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

pub mod repo;
pub mod schema;

pub use repo::{MonitoredIdentity, RunState, SessionCounter, StreamInfo, StreamSession, UserStat};

/// Errors surfaced by the persistence gateway
#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage stayed busy through every retry
    #[error("{op}: storage busy after {attempts} attempts")]
    Busy {
        op: &'static str,
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("persistence gateway closed")]
    Closed,
}

impl StoreError {
    /// Whether this is transient contention (after retries were exhausted)
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Busy { .. } => true,
            Self::Sqlite(err) => is_busy(err),
            _ => false,
        }
    }
}

/// SQLITE_BUSY / SQLITE_LOCKED: another connection holds the lock
fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Retry schedule for busy failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random delay added to each backoff
    pub jitter: Duration,
}

impl RetryPolicy {
    /// Backoff before retry number `attempt + 1`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
        exponential_delay(self.base_delay, attempt, self.max_delay) + jitter
    }
}

/// Semaphore-bounded, busy-retrying handle to the database
///
/// Cheap to clone; clones share the pool and the permits.
#[derive(Clone)]
pub struct PersistenceGateway {
    pool: Pool<SqliteConnectionManager>,
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
}

impl PersistenceGateway {
    /// Open (creating if needed) the database and apply migrations
    pub fn open(config: &StorageConfig) -> Result<Self, StoreError> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let manager = SqliteConnectionManager::file(&config.db_path).with_init(move |conn| {
            conn.execute_batch(
                r#"
                PRAGMA journal_mode=WAL;
                PRAGMA synchronous=NORMAL;
                "#,
            )?;
            conn.busy_timeout(busy_timeout)
        });

        let max_concurrent = config.max_concurrent.max(1);
        let pool = Pool::builder()
            .max_size(max_concurrent as u32)
            .build(manager)?;

        {
            let conn = pool.get()?;
            schema::init(&conn)?;
        }

        tracing::debug!(
            db = %config.db_path.display(),
            max_concurrent,
            "Persistence gateway ready"
        );

        Ok(Self {
            pool,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            retry: config.retry_policy(),
        })
    }

    /// Run `f` against a pooled connection under a permit
    ///
    /// Busy failures are retried up to `max_retries` times (so at most
    /// `max_retries + 1` attempts) before surfacing as [`StoreError::Busy`].
    /// The permit is released when the blocking call finishes, whether it
    /// succeeded, failed or its caller went away.
    pub async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: Fn(&Connection) -> rusqlite::Result<T> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let mut failures = 0u32;

        loop {
            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| StoreError::Closed)?;
            let pool = self.pool.clone();
            let attempt_fn = f.clone();

            let outcome = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let conn = pool.get()?;
                (*attempt_fn)(&conn).map_err(StoreError::from)
            })
            .await?;

            match outcome {
                Ok(value) => return Ok(value),
                Err(StoreError::Sqlite(err)) if is_busy(&err) => {
                    failures += 1;
                    if failures > self.retry.max_retries {
                        tracing::warn!(op, attempts = failures, "Storage busy, giving up");
                        return Err(StoreError::Busy {
                            op,
                            attempts: failures,
                            source: err,
                        });
                    }

                    let delay = self.retry.delay_for(failures - 1);
                    tracing::warn!(
                        op,
                        attempt = failures,
                        max_attempts = self.retry.max_retries + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Storage busy, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn test_config(dir: &TempDir, busy_timeout_ms: u64) -> StorageConfig {
        StorageConfig {
            db_path: dir.path().join("events.sqlite"),
            max_concurrent: 3,
            max_retries: 3,
            base_delay_ms: 1,
            max_delay_ms: 4,
            jitter_ms: 1,
            busy_timeout_ms,
        }
    }

    /// Gateway over a throwaway database with near-zero retry delays
    pub(crate) fn test_gateway() -> (TempDir, PersistenceGateway) {
        let dir = tempfile::tempdir().unwrap();
        let gateway = PersistenceGateway::open(&test_config(&dir, 1_000)).unwrap();
        (dir, gateway)
    }

    /// Like [`test_gateway`], but gives up on a held lock within milliseconds
    pub(crate) fn contended_gateway() -> (TempDir, PersistenceGateway) {
        let dir = tempfile::tempdir().unwrap();
        let gateway = PersistenceGateway::open(&test_config(&dir, 10)).unwrap();
        (dir, gateway)
    }

    fn busy_error() -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        )
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let (_dir, gateway) = test_gateway();
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let writes = (0..12).map(|_| {
            let active = active.clone();
            let peak = peak.clone();
            gateway.run("slow write", move |_conn| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        });

        let results = futures::future::join_all(writes).await;

        assert!(results.iter().all(|r| r.is_ok()));
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_busy_is_attempted_four_times_then_surfaces() {
        let (_dir, gateway) = test_gateway();
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result: Result<(), _> = gateway
            .run("always busy", move |_conn| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(busy_error())
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        match result {
            Err(err @ StoreError::Busy { attempts: 4, .. }) => assert!(err.is_busy()),
            other => panic!("Expected Busy after 4 attempts, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_busy_then_success_returns_value() {
        let (_dir, gateway) = test_gateway();
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let value = gateway
            .run("flaky", move |_conn| {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(busy_error())
                } else {
                    Ok(42)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let (_dir, gateway) = test_gateway();
        let attempts = Arc::new(AtomicU32::new(0));

        let counter = attempts.clone();
        let result = gateway
            .run("bad sql", move |conn| {
                counter.fetch_add(1, Ordering::SeqCst);
                conn.execute("INSERT INTO no_such_table VALUES (1)", [])
            })
            .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(matches!(result, Err(StoreError::Sqlite(_))));
        assert!(!result.unwrap_err().is_busy());
    }

    #[tokio::test]
    async fn test_permits_are_released_after_failures() {
        let (_dir, gateway) = test_gateway();

        for _ in 0..5 {
            let _ = gateway
                .run("fails", |conn| conn.execute("NOT SQL", []))
                .await;
        }

        assert_eq!(gateway.permits.available_permits(), 3);
        let one: i64 = gateway
            .run("select one", |conn| conn.query_row("SELECT 1", [], |row| row.get(0)))
            .await
            .unwrap();
        assert_eq!(one, 1);
    }
}
