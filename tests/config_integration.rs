//! Integration tests for configuration management
//!
//! These tests validate that the configuration system properly reads
//! environment variables and rejects inconsistent lease defaults.

use leasebound::{AppConfig, Result};
use std::env;
use std::sync::Mutex;
use std::time::Duration;

// Use a mutex to serialize tests that modify environment variables
static ENV_MUTEX: Mutex<()> = Mutex::new(());

const VARS: &[&str] = &[
    "LEASEBOUND_HOST",
    "LEASEBOUND_PORT",
    "LEASEBOUND_DEFAULT_LEASE_TTL",
    "LEASEBOUND_MAX_LEASE_TTL",
    "LEASEBOUND_REAPER_INTERVAL",
    "LEASEBOUND_JSON_LOGS",
    "DATABASE_URL",
];

/// Restores the saved variables when dropped.
struct EnvSnapshot(Vec<(&'static str, Option<String>)>);

impl EnvSnapshot {
    fn take() -> Self {
        let saved = VARS.iter().map(|name| (*name, env::var(name).ok())).collect();
        for name in VARS {
            env::remove_var(name);
        }
        Self(saved)
    }
}

impl Drop for EnvSnapshot {
    fn drop(&mut self) {
        for (name, value) in &self.0 {
            match value {
                Some(value) => env::set_var(name, value),
                None => env::remove_var(name),
            }
        }
    }
}

#[test]
fn test_config_environment_integration() -> Result<()> {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let _snapshot = EnvSnapshot::take();

    env::set_var("LEASEBOUND_HOST", "0.0.0.0");
    env::set_var("LEASEBOUND_PORT", "8300");
    env::set_var("LEASEBOUND_DEFAULT_LEASE_TTL", "1h");
    env::set_var("LEASEBOUND_MAX_LEASE_TTL", "24h");
    env::set_var("LEASEBOUND_REAPER_INTERVAL", "30s");
    env::set_var("LEASEBOUND_JSON_LOGS", "true");
    env::set_var("DATABASE_URL", "sqlite::memory:");

    let config = AppConfig::from_env()?;
    assert_eq!(config.server.bind_address(), "0.0.0.0:8300");
    assert_eq!(config.leases.default_ttl, Duration::from_secs(3600));
    assert_eq!(config.leases.max_ttl, Duration::from_secs(24 * 3600));
    assert_eq!(config.leases.reaper_interval, Duration::from_secs(30));
    assert!(config.observability.json_logging);
    assert_eq!(config.database.url, "sqlite::memory:");

    let limits = config.leases.limits();
    assert_eq!(limits.default_ttl, Duration::from_secs(3600));
    Ok(())
}

#[test]
fn test_config_defaults_without_environment() -> Result<()> {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let _snapshot = EnvSnapshot::take();

    let config = AppConfig::from_env()?;
    assert_eq!(config.server.bind_address(), "127.0.0.1:8200");
    assert_eq!(config.leases.reaper_interval, Duration::from_secs(60));
    Ok(())
}

#[test]
fn test_invalid_environment_is_rejected() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let _snapshot = EnvSnapshot::take();

    env::set_var("LEASEBOUND_PORT", "invalid");
    assert!(AppConfig::from_env().is_err());
    env::remove_var("LEASEBOUND_PORT");

    env::set_var("LEASEBOUND_DEFAULT_LEASE_TTL", "48h");
    env::set_var("LEASEBOUND_MAX_LEASE_TTL", "24h");
    let err = AppConfig::from_env().unwrap_err();
    assert!(err.to_string().contains("cannot exceed"));
    env::remove_var("LEASEBOUND_DEFAULT_LEASE_TTL");
    env::remove_var("LEASEBOUND_MAX_LEASE_TTL");

    env::set_var("LEASEBOUND_REAPER_INTERVAL", "soon");
    assert!(AppConfig::from_env().is_err());
}
