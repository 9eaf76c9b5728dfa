//! Tests for configuration validation and loading

use std::time::Duration;

use prometheus_work_queue::config::EngineConfig;

#[test]
fn test_default_config_is_valid() {
    let cfg = EngineConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.stat_threads, 1);
    assert_eq!(cfg.poll_interval_ms, 2500);
    assert_eq!(cfg.postpone_secs, 30);
}

#[test]
fn test_zero_threads_rejected() {
    let cfg = EngineConfig::new().with_threads(0, 0);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_zero_kind_limit_rejected() {
    let cfg = EngineConfig::new().with_kind_limit("DicomSend", 0);
    let err = cfg.validate().unwrap_err();
    assert!(err.to_string().contains("DicomSend"));
}

#[test]
fn test_tiny_stack_rejected() {
    let cfg = EngineConfig::new().with_thread_stack_size(4096);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_from_json_fills_defaults() {
    let cfg = EngineConfig::from_json_str(
        r#"{ "name": "archive", "stat_threads": 2, "normal_threads": 3, "kind_limits": { "DicomSend": 1 } }"#,
    )
    .unwrap();
    assert_eq!(cfg.name, "archive");
    assert_eq!(cfg.stat_threads, 2);
    assert_eq!(cfg.normal_threads, 3);
    assert_eq!(cfg.kind_limits.get("DicomSend"), Some(&1));
    assert_eq!(cfg.poll_interval_ms, 2500);
    assert_eq!(cfg.delete_delay_minutes, 60);
}

#[test]
fn test_from_json_rejects_invalid() {
    assert!(EngineConfig::from_json_str("{ not json").is_err());
    assert!(EngineConfig::from_json_str(r#"{ "stat_threads": 0, "normal_threads": 0 }"#).is_err());
}

#[test]
fn test_conversions() {
    let cfg = EngineConfig::new()
        .with_name("lane-test")
        .with_threads(2, 5)
        .with_poll_interval_ms(100)
        .with_postpone_secs(12)
        .with_delete_delay_minutes(3)
        .with_kind_limit("ReIndex", 1);

    let pool = cfg.pool_config();
    assert_eq!(pool.concurrency(), 7);
    assert_eq!(pool.thread_name, "lane-test");

    let settings = cfg.scheduler_settings();
    assert_eq!(settings.poll_interval, Duration::from_millis(100));
    assert_eq!(settings.kind_limits.get("ReIndex"), Some(&1));

    let timings = cfg.proxy_timings();
    assert_eq!(timings.postpone, chrono::Duration::seconds(12));
    assert_eq!(timings.delete_delay, chrono::Duration::minutes(3));
}

#[test]
fn test_lookup_reads_prefixed_keys_only() {
    let cfg = EngineConfig::from_lookup(|key| match key {
        "WORK_QUEUE_NAME" => Some("from-env".into()),
        "WORK_QUEUE_INTAKE_DELAY_SECS" => Some("0".into()),
        "STAT_THREADS" => Some("9".into()),
        _ => None,
    })
    .unwrap();
    assert_eq!(cfg.name, "from-env");
    assert_eq!(cfg.intake_delay_secs, 0);
    assert_eq!(cfg.stat_threads, 1);
}

#[test]
fn test_lookup_rejects_malformed_kind_limits() {
    let result = EngineConfig::from_lookup(|key| {
        (key == "WORK_QUEUE_KIND_LIMITS").then(|| "DicomSend".to_string())
    });
    assert!(result.is_err());
}
