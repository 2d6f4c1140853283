use super::*;
use std::path::PathBuf;

#[test]
fn test_default_toml_parses_back_to_defaults() {
    let config = Config::default();
    let toml = config.to_toml();

    let file = Config::parse_file_config(&toml).expect("default config should parse");
    let resolved = Config::resolve(file, None, None);

    assert_eq!(resolved.supervisor, config.supervisor);
    assert_eq!(resolved.registry, config.registry);
    assert_eq!(resolved.control, config.control);
    assert_eq!(resolved.storage, config.storage);
    assert_eq!(resolved.logging, config.logging);
    assert_eq!(resolved.demo, config.demo);
}

#[test]
fn test_customized_toml_round_trips() {
    let mut config = Config::default();
    config.supervisor.max_retries = 7;
    config.supervisor.reconnect_cooldown_secs = 15;
    config.storage.db_path = PathBuf::from("/var/lib/livewatch/events.sqlite");
    config.storage.max_concurrent = 5;
    config.logging.file_enabled = true;
    config.logging.file_rotation = LogRotation::Hourly;
    config.demo.live_secs = 42;

    let file = Config::parse_file_config(&config.to_toml()).expect("should parse");
    let resolved = Config::resolve(file, None, None);

    assert_eq!(resolved.supervisor.max_retries, 7);
    assert_eq!(resolved.supervisor.reconnect_cooldown_secs, 15);
    assert_eq!(
        resolved.storage.db_path,
        PathBuf::from("/var/lib/livewatch/events.sqlite")
    );
    assert_eq!(resolved.storage.max_concurrent, 5);
    assert!(resolved.logging.file_enabled);
    assert_eq!(resolved.logging.file_rotation, LogRotation::Hourly);
    assert_eq!(resolved.demo.live_secs, 42);
}

#[test]
fn test_empty_file_yields_defaults() {
    let file = Config::parse_file_config("").expect("empty file is valid");
    let resolved = Config::resolve(file, None, None);

    assert_eq!(resolved.storage, StorageConfig::default());
    assert_eq!(resolved.supervisor, SupervisorConfig::default());
}

#[test]
fn test_partial_section_keeps_other_defaults() {
    let file = Config::parse_file_config(
        r#"
[supervisor]
max_retries = 5
"#,
    )
    .expect("should parse");
    let resolved = Config::resolve(file, None, None);

    assert_eq!(resolved.supervisor.max_retries, 5);
    assert_eq!(resolved.supervisor.base_retry_delay_secs, 60);
    assert_eq!(resolved.supervisor.max_retry_delay_secs, 300);
}

#[test]
fn test_env_overrides_file() {
    let file = Config::parse_file_config(
        r#"
[storage]
db_path = "from-file.sqlite"

[logging]
level = "warn"
"#,
    )
    .expect("should parse");
    let resolved = Config::resolve(
        file,
        Some("from-env.sqlite".to_string()),
        Some("debug".to_string()),
    );

    assert_eq!(resolved.storage.db_path, PathBuf::from("from-env.sqlite"));
    assert_eq!(resolved.logging.level, "debug");
}

#[test]
fn test_blank_env_values_are_ignored() {
    let resolved = Config::resolve(
        FileConfig::default(),
        Some("  ".to_string()),
        Some(String::new()),
    );

    assert_eq!(resolved.storage.db_path, StorageConfig::default().db_path);
    assert_eq!(resolved.logging.level, "info");
}

#[test]
fn test_zero_limits_are_clamped() {
    let file = Config::parse_file_config(
        r#"
[storage]
max_concurrent = 0

[registry]
refresh_interval_secs = 0

[supervisor]
event_buffer = 0
"#,
    )
    .expect("should parse");
    let resolved = Config::resolve(file, None, None);

    assert_eq!(resolved.storage.max_concurrent, 1);
    assert_eq!(resolved.registry.refresh_interval_secs, 1);
    assert_eq!(resolved.supervisor.event_buffer, 1);
}

#[test]
fn test_negative_values_are_rejected() {
    let result = Config::parse_file_config(
        r#"
[supervisor]
max_retries = -1
"#,
    );
    assert!(result.is_err());
}

#[test]
fn test_log_rotation_parse_is_lenient() {
    assert_eq!(LogRotation::parse("HOURLY"), LogRotation::Hourly);
    assert_eq!(LogRotation::parse(" never "), LogRotation::Never);
    assert_eq!(LogRotation::parse("weekly"), LogRotation::Daily);
}

#[test]
fn test_retry_policy_uses_millisecond_fields() {
    let storage = StorageConfig {
        base_delay_ms: 250,
        max_delay_ms: 1_000,
        jitter_ms: 10,
        max_retries: 2,
        ..StorageConfig::default()
    };
    let policy = storage.retry_policy();

    assert_eq!(policy.max_retries, 2);
    assert_eq!(policy.base_delay, std::time::Duration::from_millis(250));
    assert_eq!(policy.max_delay, std::time::Duration::from_millis(1_000));
    assert_eq!(policy.jitter, std::time::Duration::from_millis(10));
}

#[test]
fn test_demo_cycle_covers_both_windows() {
    let demo = DemoConfig {
        offline_secs: 10,
        live_secs: 20,
        event_interval_ms: 500,
    };
    assert_eq!(demo.cycle(), std::time::Duration::from_secs(30));
    assert_eq!(demo.offline(), std::time::Duration::from_secs(10));
    assert_eq!(demo.event_interval(), std::time::Duration::from_millis(500));
}
