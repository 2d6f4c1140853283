//! Configuration for the monitor
//!
//! Configuration is loaded in order of precedence:
//! 1. Environment variables (highest priority)
//! 2. Config file (~/.config/livewatch/config.toml, or `LIVEWATCH_CONFIG`)
//! 3. Built-in defaults (lowest priority)

use serde::Deserialize;
use std::path::PathBuf;

// ─────────────────────────────────────────────────────────────────────────────
// Submodules
// ─────────────────────────────────────────────────────────────────────────────

mod monitor;
mod observability;
mod serialization;
mod storage;

#[cfg(test)]
mod tests;

// ─────────────────────────────────────────────────────────────────────────────
// Re-exports
// ─────────────────────────────────────────────────────────────────────────────

pub use monitor::{
    ControlConfig, DemoConfig, FileControl, FileDemo, FileRegistry, FileSupervisor,
    RegistryConfig, SupervisorConfig,
};
pub use observability::{FileLogging, LogRotation, LoggingConfig};
pub use storage::{FileStorage, StorageConfig};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Overrides the config file location
pub const CONFIG_PATH_ENV: &str = "LIVEWATCH_CONFIG";

// ─────────────────────────────────────────────────────────────────────────────
// Application Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Application configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Per-identity connection supervisor timings
    pub supervisor: SupervisorConfig,

    /// Identity registry polling
    pub registry: RegistryConfig,

    /// Run-signal polling
    pub control: ControlConfig,

    /// Database location and gateway limits
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Simulated platform timings
    pub demo: DemoConfig,
}

// ─────────────────────────────────────────────────────────────────────────────
// File Configuration (deserialization layer)
// ─────────────────────────────────────────────────────────────────────────────

/// Config file structure; every section and key is optional
#[derive(Debug, Deserialize, Default)]
pub(crate) struct FileConfig {
    /// Optional [supervisor] section
    pub supervisor: Option<FileSupervisor>,

    /// Optional [registry] section
    pub registry: Option<FileRegistry>,

    /// Optional [control] section
    pub control: Option<FileControl>,

    /// Optional [storage] section
    pub storage: Option<FileStorage>,

    /// Optional [logging] section
    pub logging: Option<FileLogging>,

    /// Optional [demo] section
    pub demo: Option<FileDemo>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration Loading
// ─────────────────────────────────────────────────────────────────────────────

impl Config {
    /// Config file path: `$LIVEWATCH_CONFIG`, else ~/.config/livewatch/config.toml
    /// Uses Unix-style ~/.config on all platforms for consistency
    pub fn config_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            if !path.trim().is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        dirs::home_dir().map(|p| p.join(".config").join("livewatch").join("config.toml"))
    }

    /// Create config file with defaults if it doesn't exist
    /// Called during startup to help users discover configuration options
    pub fn ensure_config_exists() {
        let Some(path) = Self::config_path() else {
            return;
        };

        if path.exists() {
            return;
        }

        if let Some(parent) = path.parent() {
            if std::fs::create_dir_all(parent).is_err() {
                return; // Config is optional
            }
        }

        // Config::default().to_toml() is the single source of truth
        let _ = std::fs::write(&path, Self::default().to_toml());
    }

    /// Parse config file contents
    pub(crate) fn parse_file_config(contents: &str) -> Result<FileConfig, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Load file config if it exists
    ///
    /// Exits the process if the file exists but cannot be read or parsed.
    fn load_file_config() -> FileConfig {
        let Some(path) = Self::config_path() else {
            return FileConfig::default();
        };

        match std::fs::read_to_string(&path) {
            Ok(contents) => match Self::parse_file_config(&contents) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("\n╔══════════════════════════════════════════════════════════════╗");
                    eprintln!("║  CONFIG ERROR - Failed to parse configuration file          ║");
                    eprintln!("╚══════════════════════════════════════════════════════════════╝\n");
                    eprintln!("  File: {}\n", path.display());
                    eprintln!("  Error: {}\n", e);
                    eprintln!("  Tip: Check for:\n");
                    eprintln!("    - Missing quotes around string values");
                    eprintln!("    - Negative or fractional values for counts and intervals");
                    eprintln!("    - Typos in section names\n");
                    eprintln!("  To reset, run `livewatch config --reset`.\n");
                    std::process::exit(1);
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileConfig::default(),
            Err(e) => {
                eprintln!("\n╔══════════════════════════════════════════════════════════════╗");
                eprintln!("║  CONFIG ERROR - Cannot read configuration file              ║");
                eprintln!("╚══════════════════════════════════════════════════════════════╝\n");
                eprintln!("  File: {}\n", path.display());
                eprintln!("  Error: {}\n", e);
                std::process::exit(1);
            }
        }
    }

    /// Load configuration: env vars > file > defaults
    pub fn from_env() -> Self {
        let file = Self::load_file_config();
        Self::resolve(
            file,
            std::env::var("LIVEWATCH_DB_PATH").ok(),
            std::env::var("LIVEWATCH_LOG_LEVEL").ok(),
        )
    }

    /// Merge a parsed file with environment overrides
    pub(crate) fn resolve(
        file: FileConfig,
        db_path_env: Option<String>,
        log_level_env: Option<String>,
    ) -> Self {
        let mut storage = StorageConfig::from_file(file.storage);
        if let Some(path) = db_path_env.filter(|p| !p.trim().is_empty()) {
            storage.db_path = PathBuf::from(path);
        }

        let mut logging = LoggingConfig::from_file(file.logging);
        if let Some(level) = log_level_env.filter(|l| !l.trim().is_empty()) {
            logging.level = level;
        }

        Self {
            supervisor: SupervisorConfig::from_file(file.supervisor),
            registry: RegistryConfig::from_file(file.registry),
            control: ControlConfig::from_file(file.control),
            storage,
            logging,
            demo: DemoConfig::from_file(file.demo),
        }
    }
}
