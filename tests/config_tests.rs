use dblogtail::config::{
    build_config, default_config_yaml, load_config, ConfigError, CursorStoreKind, DbType,
    OutputTarget, Overrides,
};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_default_config_is_valid() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    fs::write(&config_path, default_config_yaml().unwrap()).unwrap();

    let config = load_config(&config_path).expect("Default config should be valid");
    assert_eq!(config.db_type, DbType::MySql);
    assert_eq!(config.output, OutputTarget::Stdout);
    assert_eq!(config.cursor_store.kind, CursorStoreKind::None);
    assert_eq!(config.rotation.max_backfill_gap, Duration::from_secs(3600));
}

#[test]
fn test_full_config_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    let config_yaml = r#"
instance: orders-primary
db_type: postgresql
log_file: error/postgresql.log.2024
num_lines: 500
output: file
download_dir: /var/lib/dblogtail
formatter: true
scrub_query: true
log_level: info
api:
  base_url: https://logs.internal:8443
  timeout: 1m
cursor_store:
  kind: file
  dir: /var/lib/dblogtail/cursors
timing:
  rate_limit_backoff: 10s
  poll_interval: 2s
  not_found_retry: 3s
  shutdown_grace: 20s
rotation:
  settle_minutes: 7
  max_backfill_gap: 90m
  binary_skip_bytes: 4096
"#;
    fs::write(&config_path, config_yaml).unwrap();

    let config = build_config(Some(config_path.as_path()), &Overrides::default()).unwrap();
    assert_eq!(config.instance.as_deref(), Some("orders-primary"));
    assert_eq!(config.log_file_prefix(), "error/postgresql.log.2024");
    assert_eq!(config.num_lines, 500);
    assert!(config.formatter && config.scrub_query);
    assert_eq!(config.api.timeout, Duration::from_secs(60));
    assert_eq!(config.cursor_store.kind, CursorStoreKind::File);
    assert_eq!(config.timing.rate_limit_backoff, Duration::from_secs(10));
    assert_eq!(config.timing.shutdown_grace, Duration::from_secs(20));
    assert_eq!(config.rotation.settle_minutes, 7);
    assert_eq!(config.rotation.max_backfill_gap, Duration::from_secs(5400));
    assert_eq!(config.rotation.binary_skip_bytes, 4096);
}

#[test]
fn test_cli_overrides_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");
    fs::write(&config_path, "instance: from-file\ntiming:\n  rate_limit_backoff: 10s\n").unwrap();

    let overrides = Overrides {
        instance: Some("from-cli".to_string()),
        backoff: Some(Duration::from_secs(2)),
        output: Some(OutputTarget::File),
        debug: true,
        ..Default::default()
    };
    let config = build_config(Some(config_path.as_path()), &overrides).unwrap();

    assert_eq!(config.instance.as_deref(), Some("from-cli"));
    assert_eq!(config.timing.rate_limit_backoff, Duration::from_secs(2));
    assert_eq!(config.output, OutputTarget::File);
    assert_eq!(config.log_level, "debug");
}

#[test]
fn test_invalid_values_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");
    fs::write(&config_path, "num_lines: 0\n").unwrap();

    let err = build_config(Some(config_path.as_path()), &Overrides::default()).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
    assert!(err.to_string().contains("num_lines"));
}

#[test]
fn test_malformed_yaml_names_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("broken.yml");
    fs::write(&config_path, "timing: [not, a, map]\n").unwrap();

    let err = load_config(&config_path).unwrap_err();
    assert!(err.to_string().contains("broken.yml"));
}

#[test]
fn test_env_vars_expanded() {
    std::env::set_var("DBLOGTAIL_TEST_INSTANCE", "env-instance");
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");
    fs::write(&config_path, "instance: $env{DBLOGTAIL_TEST_INSTANCE}\n").unwrap();

    let config = load_config(&config_path).unwrap();
    assert_eq!(config.instance.as_deref(), Some("env-instance"));
    std::env::remove_var("DBLOGTAIL_TEST_INSTANCE");
}

#[test]
fn test_postgres_alias_matches_cli() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");
    fs::write(&config_path, "db_type: postgres\n").unwrap();

    let config = load_config(&config_path).unwrap();
    assert_eq!(config.db_type, DbType::PostgreSql);
    assert_eq!(DbType::parse("postgres"), Some(config.db_type));
}
