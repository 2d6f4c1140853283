//! Monitor configuration: supervisor timings, registry and run-signal polling,
//! simulated platform

use serde::Deserialize;
use std::time::Duration;

// ─────────────────────────────────────────────────────────────────────────────
// Supervisor
// ─────────────────────────────────────────────────────────────────────────────

/// Per-identity supervisor timings
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    /// Minimum gap between two live checks of the same identity
    pub min_check_interval_secs: u64,
    /// Failed live checks retried before the supervisor goes idle
    pub max_retries: u32,
    /// Backoff is min(base * 2^attempt, max)
    pub base_retry_delay_secs: u64,
    pub max_retry_delay_secs: u64,
    /// Delay before reconnecting after stream end, disconnect or a failed connect
    pub reconnect_cooldown_secs: u64,
    /// Pause after tearing down a stale connection
    pub teardown_grace_ms: u64,
    /// Platform events buffered per identity
    pub event_buffer: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            min_check_interval_secs: 30,
            max_retries: 3,
            base_retry_delay_secs: 60,
            max_retry_delay_secs: 300,
            reconnect_cooldown_secs: 60,
            teardown_grace_ms: 2_000,
            event_buffer: 1_000,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileSupervisor {
    pub min_check_interval_secs: Option<u64>,
    pub max_retries: Option<u32>,
    pub base_retry_delay_secs: Option<u64>,
    pub max_retry_delay_secs: Option<u64>,
    pub reconnect_cooldown_secs: Option<u64>,
    pub teardown_grace_ms: Option<u64>,
    pub event_buffer: Option<usize>,
}

impl SupervisorConfig {
    pub fn from_file(file: Option<FileSupervisor>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            min_check_interval_secs: file
                .min_check_interval_secs
                .unwrap_or(defaults.min_check_interval_secs),
            max_retries: file.max_retries.unwrap_or(defaults.max_retries),
            base_retry_delay_secs: file
                .base_retry_delay_secs
                .unwrap_or(defaults.base_retry_delay_secs),
            max_retry_delay_secs: file
                .max_retry_delay_secs
                .unwrap_or(defaults.max_retry_delay_secs),
            reconnect_cooldown_secs: file
                .reconnect_cooldown_secs
                .unwrap_or(defaults.reconnect_cooldown_secs),
            teardown_grace_ms: file.teardown_grace_ms.unwrap_or(defaults.teardown_grace_ms),
            event_buffer: file.event_buffer.unwrap_or(defaults.event_buffer).max(1),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry & control polling
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    /// How often the identity set is re-read and reconciled
    pub refresh_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileRegistry {
    pub refresh_interval_secs: Option<u64>,
}

impl RegistryConfig {
    pub fn from_file(file: Option<FileRegistry>) -> Self {
        let file = file.unwrap_or_default();
        Self {
            refresh_interval_secs: file
                .refresh_interval_secs
                .unwrap_or(Self::default().refresh_interval_secs)
                .max(1),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlConfig {
    /// How often the run signal is polled
    pub poll_interval_secs: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileControl {
    pub poll_interval_secs: Option<u64>,
}

impl ControlConfig {
    pub fn from_file(file: Option<FileControl>) -> Self {
        let file = file.unwrap_or_default();
        Self {
            poll_interval_secs: file
                .poll_interval_secs
                .unwrap_or(Self::default().poll_interval_secs)
                .max(1),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Demo platform
// ─────────────────────────────────────────────────────────────────────────────

/// Timings of the simulated platform
#[derive(Debug, Clone, PartialEq)]
pub struct DemoConfig {
    /// Length of each offline window
    pub offline_secs: u64,
    /// Length of each live window
    pub live_secs: u64,
    /// Gap between generated events while live
    pub event_interval_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            offline_secs: 90,
            live_secs: 180,
            event_interval_ms: 1_500,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct FileDemo {
    pub offline_secs: Option<u64>,
    pub live_secs: Option<u64>,
    pub event_interval_ms: Option<u64>,
}

impl DemoConfig {
    pub fn from_file(file: Option<FileDemo>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            offline_secs: file.offline_secs.unwrap_or(defaults.offline_secs),
            live_secs: file.live_secs.unwrap_or(defaults.live_secs).max(1),
            event_interval_ms: file
                .event_interval_ms
                .unwrap_or(defaults.event_interval_ms)
                .max(1),
        }
    }

    pub fn offline(&self) -> Duration {
        Duration::from_secs(self.offline_secs)
    }

    /// One offline window followed by one live window
    pub fn cycle(&self) -> Duration {
        Duration::from_secs(self.offline_secs + self.live_secs)
    }

    pub fn event_interval(&self) -> Duration {
        Duration::from_millis(self.event_interval_ms)
    }
}
