//! Storage configuration: database location and persistence gateway limits

use crate::store::RetryPolicy;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct StorageConfig {
    /// Path to the SQLite database file
    pub db_path: PathBuf,
    /// Operations allowed in flight at once
    pub max_concurrent: usize,
    /// Retries of a busy operation (attempts = retries + 1)
    pub max_retries: u32,
    /// Busy backoff is min(base * 2^attempt, max) + random(0..=jitter)
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
    /// SQLite-level wait on a locked database before reporting busy
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./db/events.sqlite"),
            max_concurrent: 3,
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
            jitter_ms: 100,
            busy_timeout_ms: 5_000,
        }
    }
}

/// Storage settings as loaded from config file
#[derive(Debug, Deserialize, Default)]
pub struct FileStorage {
    pub db_path: Option<String>,
    pub max_concurrent: Option<usize>,
    pub max_retries: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub jitter_ms: Option<u64>,
    pub busy_timeout_ms: Option<u64>,
}

impl StorageConfig {
    pub fn from_file(file: Option<FileStorage>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            db_path: file.db_path.map(PathBuf::from).unwrap_or(defaults.db_path),
            max_concurrent: file
                .max_concurrent
                .unwrap_or(defaults.max_concurrent)
                .max(1),
            max_retries: file.max_retries.unwrap_or(defaults.max_retries),
            base_delay_ms: file.base_delay_ms.unwrap_or(defaults.base_delay_ms),
            max_delay_ms: file.max_delay_ms.unwrap_or(defaults.max_delay_ms),
            jitter_ms: file.jitter_ms.unwrap_or(defaults.jitter_ms),
            busy_timeout_ms: file.busy_timeout_ms.unwrap_or(defaults.busy_timeout_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter: Duration::from_millis(self.jitter_ms),
        }
    }
}
