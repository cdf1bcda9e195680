//! # Site Configuration Tests
//!
//! Loading the shipped sample configuration, JSON configs and environment
//! overrides.

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use errors::GatewayError;
use modbus_driver::{DecoderKind, RegisterKind};
use pollsrv::config::{Protocol, SiteConfig};
use pollsrv::driver::DriverCache;
use std::io::Write;
use std::path::{Path, PathBuf};

fn sample_config() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("config/pollsrv.yaml")
}

// Environment overrides are process-wide, so every load runs in this one test.
#[test]
fn test_load_sources() {
    // Shipped YAML sample
    let site = SiteConfig::load(sample_config()).unwrap();
    site.validate().unwrap();
    assert_eq!(site.site.location, "Plant 1");
    assert_eq!(site.polling.decoder, DecoderKind::Raw);
    assert_eq!(site.devices.len(), 2);
    assert_eq!(site.devices[1].protocol, Protocol::Rtu);
    assert!(site.devices[0].driver.is_absolute());
    assert!(site.has_rtu_devices());

    let mut drivers = DriverCache::new();
    drivers.load_site(&site).unwrap();
    assert_eq!(drivers.len(), 1);
    let schema = drivers.get(&site.devices[0].driver).unwrap();
    assert_eq!(schema.offset(), 40001);
    assert!(schema.points(RegisterKind::Holding).contains("Conn"));

    // JSON with defaults filled in
    let dir = tempfile::tempdir().unwrap();
    let json_path = dir.path().join("site.json");
    let mut file = std::fs::File::create(&json_path).unwrap();
    file.write_all(
        br#"{
            "site": {"tenant": "t", "location": "l"},
            "devices": [{
                "serial_number": "X1", "model": "m", "protocol": "TCP",
                "host": "127.0.0.1", "driver": "meter.json"
            }]
        }"#,
    )
    .unwrap();
    let site = SiteConfig::load(&json_path).unwrap();
    site.validate().unwrap();
    assert_eq!(site.polling.interval_ms, 5000);
    assert_eq!(site.devices[0].port, 502);
    assert_eq!(site.devices[0].slave_id, 1);
    assert_eq!(site.devices[0].driver, dir.path().join("meter.json"));

    // Environment override of a nested key
    std::env::set_var("POLLSRV_POLLING__INTERVAL_MS", "750");
    let site = SiteConfig::load(&json_path);
    std::env::remove_var("POLLSRV_POLLING__INTERVAL_MS");
    assert_eq!(site.unwrap().polling.interval_ms, 750);
}

#[test]
fn test_missing_config_file() {
    let err = SiteConfig::load("/nonexistent/pollsrv.yaml").unwrap_err();
    assert!(matches!(err, GatewayError::Configuration(_)));
    assert_eq!(err.error_code(), "CONFIGURATION_ERROR");
}

#[test]
fn test_malformed_yaml_is_config_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.yaml");
    std::fs::write(&path, "site: [unclosed\n").unwrap();
    let err = SiteConfig::load(&path).unwrap_err();
    assert_eq!(err.error_code(), "CONFIG_LOAD_ERROR");
}
