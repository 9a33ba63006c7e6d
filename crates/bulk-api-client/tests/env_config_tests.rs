//! Environment bootstrap tests.
//!
//! Kept in a single test since the process environment is shared by every
//! test in the binary.

use bulk_api_client::{ClientConfig, ClientError, DEFAULT_BASE_URL, DEFAULT_CACHE_TTL};
use std::path::PathBuf;
use std::time::Duration;

const VARS: [&str; 5] = [
    "BULK_API_TOKEN",
    "BULK_API_URL",
    "BULK_API_EXPIRATION_TIME",
    "BULK_API_CACHE_DIR",
    "BULK_API_CA_BUNDLE",
];

#[test]
fn test_config_from_env() {
    for var in VARS {
        std::env::remove_var(var);
    }

    // Missing token
    match ClientConfig::from_env() {
        Err(ClientError::Config(msg)) => {
            assert_eq!(msg, "Environment variable BULK_API_TOKEN was not found.")
        }
        other => panic!("expected config error, got {:?}", other),
    }

    // Defaults
    std::env::set_var("BULK_API_TOKEN", "abc");
    let config = ClientConfig::from_env().unwrap();
    assert_eq!(config.token, "abc");
    assert_eq!(config.base_url, DEFAULT_BASE_URL);
    assert_eq!(config.cache_ttl, DEFAULT_CACHE_TTL);
    assert_eq!(config.ca_bundle, None);

    // Overrides
    std::env::set_var("BULK_API_URL", "http://localhost:8000/bulk/api");
    std::env::set_var("BULK_API_EXPIRATION_TIME", "60");
    std::env::set_var("BULK_API_CACHE_DIR", "/tmp/bulk-test-cache");
    std::env::set_var("BULK_API_CA_BUNDLE", "/etc/ssl/bundle.pem");
    let config = ClientConfig::from_env().unwrap();
    assert_eq!(config.base_url, "http://localhost:8000/bulk/api/");
    assert_eq!(config.cache_ttl, Duration::from_secs(60));
    assert_eq!(config.cache_dir, PathBuf::from("/tmp/bulk-test-cache"));
    assert_eq!(config.ca_bundle, Some(PathBuf::from("/etc/ssl/bundle.pem")));

    // Bad expiry
    std::env::set_var("BULK_API_EXPIRATION_TIME", "two hours");
    assert!(matches!(
        ClientConfig::from_env(),
        Err(ClientError::Config(_))
    ));

    for var in VARS {
        std::env::remove_var(var);
    }
}
