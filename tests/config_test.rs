// Test configuration loading
use certstream_monitor::config::{Config, MonitorConfig};
use std::path::Path;
use std::time::Duration;

#[test]
fn test_load_test_config() {
    let config_path = Path::new("tests/test_config.toml");
    let config = Config::from_file(config_path).expect("Failed to load test config");

    // Verify certstream config
    assert_eq!(config.certstream.url, "ws://127.0.0.1:4000/full-stream");
    assert_eq!(config.certstream.reconnect_timeout_secs, 2);
    assert_eq!(config.certstream.max_reconnect_timeout_secs, 120);
    assert_eq!(config.certstream.buffer_size, 1000);
    assert_eq!(config.certstream.workers, 2);
    assert!(!config.certstream.no_backoff);

    // Verify webhook config
    assert_eq!(config.webhook.url.as_deref(), Some("https://example.com/webhook"));
    assert_eq!(config.webhook.api_token.as_deref(), Some("test_api_token_123"));
    assert_eq!(config.webhook.secret, Some("test_secret_key".to_string()));
    assert_eq!(config.webhook.timeout_secs, 10);

    // Verify stats and logging config
    assert_eq!(config.stats.interval_secs, 15);
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.logging.suppressed_errors.len(), 1);

    assert!(config.validate().is_ok());
}

#[test]
fn test_monitor_config_from_file() {
    let config = Config::from_file(Path::new("tests/test_config.toml")).unwrap();
    let monitor_config = MonitorConfig::from_config(&config);

    // Watch-list is normalised and de-duplicated, order kept
    assert_eq!(
        monitor_config.watchlist.domains(),
        &["nhn.no".to_string(), "example.com".to_string()]
    );
    assert_eq!(monitor_config.ingest_buffer_size, 3000);
    assert_eq!(monitor_config.event_buffer_size, 1000);
    assert_eq!(monitor_config.worker_count, 2);
    assert_eq!(monitor_config.reconnect_timeout, Duration::from_secs(2));
    assert_eq!(monitor_config.max_reconnect_timeout, Duration::from_secs(120));
    assert_eq!(monitor_config.connect_timeout, Duration::from_secs(10));

    assert!(monitor_config.watchlist.matches_any(&["www.nhn.no"]));
    assert!(!monitor_config.watchlist.matches_any(&["mynhn.no"]));
}

#[test]
fn test_environment_overrides_file() {
    let mut config = Config::from_file(Path::new("tests/test_config.toml")).unwrap();

    config.apply_env_from(|name| match name {
        "TARGET_DOMAINS" => Some("override.example".to_string()),
        "WORKERS" => Some("8".to_string()),
        _ => None,
    });

    assert_eq!(config.watchlist.domains, vec!["override.example"]);
    assert_eq!(config.certstream.workers, 8);
    // Untouched values come from the file
    assert_eq!(config.certstream.buffer_size, 1000);
}
