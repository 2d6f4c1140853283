//! Config serialization to TOML
//!
//! Single source of truth for config file format.

use super::Config;

impl Config {
    /// Render the config as a commented TOML file
    pub fn to_toml(&self) -> String {
        let Config {
            supervisor,
            registry,
            control,
            storage,
            logging,
            demo,
        } = self;

        format!(
            r#"# livewatch configuration
#
# Environment overrides: LIVEWATCH_DB_PATH, LIVEWATCH_LOG_LEVEL, LIVEWATCH_CONFIG

# Per-identity connection supervisor
[supervisor]
# Minimum gap between two live checks of the same identity
min_check_interval_secs = {min_check}
# Failed live checks are retried after min(base * 2^attempt, max)
max_retries = {max_retries}
base_retry_delay_secs = {base_retry}
max_retry_delay_secs = {max_retry}
# Wait before reconnecting after stream end, disconnect or a failed connect
reconnect_cooldown_secs = {cooldown}
teardown_grace_ms = {teardown}
event_buffer = {event_buffer}

# Identity registry polling
[registry]
refresh_interval_secs = {refresh}

# Run signal polling (`livewatch job start|stop`)
[control]
poll_interval_secs = {poll}

# Event database
[storage]
db_path = "{db_path}"
# Operations in flight at once; busy operations are retried with backoff
max_concurrent = {max_concurrent}
max_retries = {storage_retries}
base_delay_ms = {base_delay}
max_delay_ms = {max_delay}
jitter_ms = {jitter}
busy_timeout_ms = {busy_timeout}

# Logging configuration (RUST_LOG env var overrides)
[logging]
level = "{log_level}"
# JSON file logging (in addition to stdout)
file_enabled = {log_file_enabled}
file_dir = "{log_file_dir}"
file_rotation = "{log_file_rotation}"  # hourly, daily, never
file_prefix = "{log_file_prefix}"

# Simulated platform
[demo]
offline_secs = {demo_offline}
live_secs = {demo_live}
event_interval_ms = {demo_interval}
"#,
            min_check = supervisor.min_check_interval_secs,
            max_retries = supervisor.max_retries,
            base_retry = supervisor.base_retry_delay_secs,
            max_retry = supervisor.max_retry_delay_secs,
            cooldown = supervisor.reconnect_cooldown_secs,
            teardown = supervisor.teardown_grace_ms,
            event_buffer = supervisor.event_buffer,
            refresh = registry.refresh_interval_secs,
            poll = control.poll_interval_secs,
            db_path = toml_path(&storage.db_path),
            max_concurrent = storage.max_concurrent,
            storage_retries = storage.max_retries,
            base_delay = storage.base_delay_ms,
            max_delay = storage.max_delay_ms,
            jitter = storage.jitter_ms,
            busy_timeout = storage.busy_timeout_ms,
            log_level = logging.level,
            log_file_enabled = logging.file_enabled,
            log_file_dir = toml_path(&logging.file_dir),
            log_file_rotation = logging.file_rotation.as_str(),
            log_file_prefix = logging.file_prefix,
            demo_offline = demo.offline_secs,
            demo_live = demo.live_secs,
            demo_interval = demo.event_interval_ms,
        )
    }
}

/// Path as a TOML basic-string body (backslashes escaped for Windows paths)
fn toml_path(path: &std::path::Path) -> String {
    path.display().to_string().replace('\\', "\\\\")
}
