use super::*;

#[test]
fn defaults_match_original_system() {
    let cfg = Config::default();
    assert_eq!(cfg.gateway.listen_addr, "0.0.0.0:6969");
    assert_eq!(cfg.admin.listen_addr, "0.0.0.0:8088");
    assert_eq!(cfg.gateway.max_connections, 200);
    assert_eq!(cfg.health_check.max_concurrent_checks, 200);
    assert_eq!(cfg.health_check.timeout_secs, 8);
    assert_eq!(cfg.health_check.interval_secs, 600);
    assert_eq!(cfg.scraper.refresh_interval_secs, 1800);
    assert_eq!(cfg.pool.min_pool_size, 20);
    assert_eq!(cfg.rotation.strategy, "per-request");
    assert_eq!(cfg.rotation.session_ttl, 300);
    assert_eq!(cfg.rotation.rotation_interval, 300);
    assert!(!cfg.scraper.webshare_enabled);
    assert_eq!(cfg.store.backend, "redis");
}

#[test]
fn validate_rejects_unknown_strategy() {
    let mut cfg = Config::default();
    cfg.rotation.strategy = "bogus".to_string();
    assert!(cfg.validate().is_err());
}

#[test]
fn validate_rejects_zero_width_semaphores() {
    let mut cfg = Config::default();
    cfg.gateway.max_connections = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = Config::default();
    cfg.health_check.max_concurrent_checks = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn validate_rejects_zero_min_pool_size() {
    let mut cfg = Config::default();
    cfg.pool.min_pool_size = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn validate_rejects_malformed_listen_addr() {
    let mut cfg = Config::default();
    cfg.gateway.listen_addr = "not-an-addr".to_string();
    assert!(cfg.validate().is_err());
}

#[test]
fn validate_rejects_unknown_store_backend() {
    let mut cfg = Config::default();
    cfg.store.backend = "sqlite".to_string();
    assert!(cfg.validate().is_err());
}

#[test]
fn validate_accepts_memory_backend_with_any_redis_url() {
    let mut cfg = Config::default();
    cfg.store.backend = "memory".to_string();
    cfg.store.redis_url = String::new();
    assert!(cfg.validate().is_ok());
}

#[test]
fn toml_round_trip_overrides_defaults() {
    let toml_src = r#"
        log_level = "debug"

        [gateway]
        listen_addr = "0.0.0.0:7000"
        max_connections = 50

        [rotation]
        strategy = "round-robin"
        session_ttl = 120
    "#;
    let parsed: Config = toml::from_str(toml_src).unwrap();
    assert_eq!(parsed.log_level, "debug");
    assert_eq!(parsed.gateway.listen_addr, "0.0.0.0:7000");
    assert_eq!(parsed.gateway.max_connections, 50);
    assert_eq!(parsed.rotation.strategy, "round-robin");
    assert_eq!(parsed.rotation.session_ttl, 120);
    // untouched sections keep their defaults
    assert_eq!(parsed.admin.listen_addr, "0.0.0.0:8088");
    assert_eq!(parsed.health_check.interval_secs, 600);
}

#[test]
fn load_falls_back_to_defaults_when_file_missing() {
    let path = std::path::Path::new("/tmp/gengar-config-definitely-does-not-exist.toml");
    let cfg = Config::load(path).unwrap();
    assert_eq!(cfg.gateway.listen_addr, "0.0.0.0:6969");
}
