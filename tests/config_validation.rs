//! Integration tests for configuration validation

#![allow(clippy::expect_used, clippy::unwrap_used)]

use intercept_tunnel::config::{
    AuxiliaryConfig, LicenseConfig, LoggingConfig, ModulesConfig, ProxyConfig, ServerConfig,
    TransportConfig,
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::Level;

fn has_error(config: &ProxyConfig, needle: &str) -> bool {
    config.validate().iter().any(|e| e.contains(needle))
}

#[test]
fn test_default_config_validates() {
    let config = ProxyConfig::default();
    let errors = config.validate();
    assert!(
        errors.is_empty(),
        "Default config should be valid, but got errors: {:?}",
        errors
    );
}

#[test]
fn test_invalid_listen_address() {
    let mut config = ProxyConfig::default();
    config.server.listen_address = "invalid_address".to_string();
    assert!(has_error(&config, "Invalid listen address"));
}

#[test]
fn test_empty_listen_address() {
    let mut config = ProxyConfig::default();
    config.server.listen_address = String::new();
    assert!(has_error(&config, "cannot be empty"));
}

#[test]
fn test_upstream_accepts_hostnames() {
    let mut config = ProxyConfig::default();
    config.server.upstream_address = "mc.example.net:25565".to_string();
    assert!(config.validate().is_empty());
    assert_eq!(
        config.server.upstream_host_port(),
        Some(("mc.example.net".to_string(), 25565))
    );
}

#[test]
fn test_upstream_without_port() {
    let mut config = ProxyConfig::default();
    config.server.upstream_address = "mc.example.net".to_string();
    assert!(has_error(&config, "Invalid upstream address"));
    assert_eq!(config.server.upstream_host_port(), None);
}

#[test]
fn test_short_connect_timeout() {
    let mut config = ProxyConfig::default();
    config.server.connect_timeout = Duration::from_millis(50);
    assert!(has_error(&config, "Connect timeout too short"));
}

#[test]
fn test_long_connect_timeout() {
    let mut config = ProxyConfig::default();
    config.server.connect_timeout = Duration::from_secs(400);
    assert!(has_error(&config, "Connect timeout too long"));
}

#[test]
fn test_zero_max_connections() {
    let mut config = ProxyConfig::default();
    config.server.max_connections = 0;
    assert!(has_error(&config, "Max connections must be greater than 0"));
}

#[test]
fn test_invalid_auxiliary_address() {
    let mut config = ProxyConfig::default();
    config.auxiliary.listen_address = "not:a:valid:address".to_string();
    assert!(has_error(&config, "Invalid auxiliary listen address"));
}

#[test]
fn test_keepalive_bounds() {
    let mut config = ProxyConfig::default();
    config.auxiliary.keepalive_interval = Duration::from_millis(1);
    assert!(has_error(&config, "Keep-alive interval too short"));

    config.auxiliary.keepalive_interval = Duration::from_secs(7200);
    assert!(has_error(&config, "Keep-alive interval too long"));
}

#[test]
fn test_handshake_timeout_bounds() {
    let mut config = ProxyConfig::default();
    config.auxiliary.handshake_timeout = Duration::ZERO;
    assert!(has_error(&config, "Handshake timeout too short"));

    config.auxiliary.handshake_timeout = Duration::from_secs(600);
    assert!(has_error(&config, "Handshake timeout too long"));
}

#[test]
fn test_tiny_max_packet_size() {
    let mut config = ProxyConfig::default();
    config.transport.max_packet_size = 512;
    assert!(has_error(&config, "Max packet size too small"));
}

#[test]
fn test_excessive_max_packet_size() {
    let mut config = ProxyConfig::default();
    config.transport.max_packet_size = 200 * 1024 * 1024;
    assert!(has_error(&config, "Max packet size too large"));
}

#[test]
fn test_compression_threshold_larger_than_max_packet() {
    let mut config = ProxyConfig::default();
    config.transport.max_packet_size = 2048;
    config.transport.client_compression_threshold = 4096;
    assert!(has_error(&config, "Client compression threshold cannot be larger"));
}

#[test]
fn test_negative_threshold_disables_compression() {
    let mut config = ProxyConfig::default();
    config.transport.client_compression_threshold = -1;
    assert!(config.validate().is_empty());
    assert_eq!(config.transport.client_threshold(), None);
}

#[test]
fn test_spammer_settings() {
    let mut config = ProxyConfig::default();
    config.modules.spammer_message = String::new();
    assert!(has_error(&config, "Spammer message cannot be empty"));

    config.modules.spammer_message = "a".repeat(101);
    assert!(has_error(&config, "Spammer message too long"));
}

#[test]
fn test_invalid_flight_speed() {
    let mut config = ProxyConfig::default();
    config.modules.flight_speed = 0.0;
    assert!(has_error(&config, "Invalid flight speed"));

    config.modules.flight_speed = f32::NAN;
    assert!(has_error(&config, "Invalid flight speed"));
}

#[test]
fn test_empty_app_name() {
    let mut config = ProxyConfig::default();
    config.logging.app_name = String::new();
    assert!(has_error(&config, "Application name cannot be empty"));
}

#[test]
fn test_log_to_file_without_path() {
    let mut config = ProxyConfig::default();
    config.logging.log_to_file = true;
    config.logging.log_file_path = None;
    assert!(has_error(&config, "log_file_path must be specified"));
}

#[test]
fn test_no_logging_outputs() {
    let mut config = ProxyConfig::default();
    config.logging.log_to_console = false;
    config.logging.log_to_file = false;
    assert!(has_error(&config, "At least one logging output"));
}

#[test]
fn test_validate_strict_with_invalid_config() {
    let mut config = ProxyConfig::default();
    config.server.listen_address = String::new();

    let error = config.validate_strict().unwrap_err();
    assert!(error.to_string().contains("Configuration validation failed"));
}

#[test]
fn test_multiple_validation_errors() {
    let mut config = ProxyConfig::default();
    config.server.listen_address = String::new();
    config.server.max_connections = 0;
    config.auxiliary.listen_address = String::new();
    config.transport.max_packet_size = 0;
    config.logging.app_name = String::new();

    let errors = config.validate();
    assert!(
        errors.len() >= 5,
        "Expected at least 5 errors, got {}: {:?}",
        errors.len(),
        errors
    );
}

#[test]
fn test_toml_roundtrip_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("proxy.toml");

    let config = ProxyConfig::default_with_overrides(|config| {
        config.server.upstream_address = "mc.example.net:25565".to_string();
        config.auxiliary.keepalive_interval = Duration::from_millis(1500);
        config.licenses.keys.insert("abc".to_string(), 0b1010);
    });
    config.save_to_file(&path).unwrap();

    let loaded = ProxyConfig::from_file(&path).unwrap();
    assert_eq!(loaded.server.upstream_address, "mc.example.net:25565");
    assert_eq!(loaded.auxiliary.keepalive_interval, Duration::from_millis(1500));
    assert_eq!(loaded.licenses.keys.get("abc"), Some(&0b1010));
}

#[test]
fn test_partial_toml_uses_defaults() {
    let config = ProxyConfig::from_toml(
        r#"
        [licenses]
        development_mode = true
        "#,
    )
    .unwrap();
    assert!(config.licenses.development_mode);
    assert_eq!(config.server.upstream_address, "127.0.0.1:25566");
    assert!(config.validate().is_empty());
}

#[test]
fn test_valid_production_config() {
    let config = ProxyConfig {
        server: ServerConfig {
            listen_address: "0.0.0.0:25565".to_string(),
            upstream_address: "mc.example.net:25565".to_string(),
            connect_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(10),
            max_connections: 500,
        },
        auxiliary: AuxiliaryConfig {
            listen_address: "0.0.0.0:25580".to_string(),
            keepalive_interval: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(15),
        },
        transport: TransportConfig {
            client_compression_threshold: 256,
            max_packet_size: 1024 * 1024,
        },
        modules: ModulesConfig {
            spammer_message: "gg".to_string(),
            spammer_interval: Duration::from_secs(30),
            flight_speed: 0.1,
        },
        licenses: LicenseConfig {
            development_mode: false,
            keys: HashMap::from([("key-1".to_string(), u64::MAX)]),
        },
        logging: LoggingConfig {
            app_name: "intercept-tunnel".to_string(),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: true,
        },
    };

    let errors = config.validate();
    assert!(errors.is_empty(), "Production config should be valid, got: {:?}", errors);
}
