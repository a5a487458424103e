//! # Configuration Settings
//!
//! Defines the configuration structure for the leasebound server.

use crate::errors::{Error, Result};
use crate::secrets::duration::{canonical, parse_duration};
use crate::secrets::LeaseLimits;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct AppConfig {
    /// HTTP server configuration
    #[validate(nested)]
    pub server: ServerConfig,

    /// Storage database configuration
    #[validate(nested)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,

    /// System-wide lease defaults
    #[validate(nested)]
    pub leases: LeaseDefaults,
}

impl AppConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;
        self.validate_custom()?;
        Ok(())
    }

    fn validate_custom(&self) -> Result<()> {
        if self.leases.default_ttl > self.leases.max_ttl {
            return Err(Error::validation_field(
                "Default lease TTL cannot exceed the maximum lease TTL",
                "default_ttl",
            ));
        }

        if !self.database.is_sqlite() {
            return Err(Error::validation_field("Database URL must start with 'sqlite:'", "url"));
        }

        Ok(())
    }

    /// Load every section from the environment and validate the result.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env(),
            observability: ObservabilityConfig::from_env(),
            leases: LeaseDefaults::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    /// Server bind address
    #[validate(length(min = 1, message = "Host cannot be empty"))]
    pub host: String,

    /// Server port
    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".to_string(), port: 8200 }
    }
}

impl ServerConfig {
    /// Get the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let host = std::env::var("LEASEBOUND_HOST").unwrap_or(defaults.host);
        let port = match std::env::var("LEASEBOUND_PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|e| Error::validation_field(format!("Invalid port '{}': {}", raw, e), "port"))?,
            Err(_) => defaults.port,
        };
        Ok(Self { host, port })
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[validate(length(min = 1, message = "Database URL cannot be empty"))]
    pub url: String,

    /// Maximum number of connections in the pool
    #[validate(range(min = 1, max = 100, message = "Max connections must be between 1 and 100"))]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[validate(range(min = 0, max = 50, message = "Min connections must be between 0 and 50"))]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[validate(range(
        min = 1,
        max = 60,
        message = "Connect timeout must be between 1 and 60 seconds"
    ))]
    pub connect_timeout_seconds: u64,

    /// Idle timeout in seconds (0 = no timeout)
    pub idle_timeout_seconds: u64,

    /// Enable automatic migrations
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/leasebound.db".to_string(),
            max_connections: 10,
            min_connections: 0,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 600,
            auto_migrate: true,
        }
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Get idle timeout as Duration (None if 0)
    pub fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_seconds))
        }
    }

    pub fn is_sqlite(&self) -> bool {
        self.url.starts_with("sqlite:")
    }

    /// Create DatabaseConfig from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let url = std::env::var("DATABASE_URL").unwrap_or(defaults.url);

        let max_connections = std::env::var("DATABASE_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(defaults.max_connections);

        let min_connections = std::env::var("DATABASE_MIN_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(defaults.min_connections);

        let connect_timeout_seconds = std::env::var("DATABASE_CONNECT_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(defaults.connect_timeout_seconds);

        let idle_timeout_seconds = std::env::var("DATABASE_IDLE_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(defaults.idle_timeout_seconds);

        let auto_migrate = std::env::var("DATABASE_AUTO_MIGRATE")
            .map(|s| s.to_lowercase() == "true" || s == "1")
            .unwrap_or(defaults.auto_migrate);

        Self {
            url,
            max_connections,
            min_connections,
            connect_timeout_seconds,
            idle_timeout_seconds,
            auto_migrate,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObservabilityConfig {
    /// Log filter directive (trace, debug, info, warn, error, or a full `EnvFilter` string)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string(), json_logging: false }
    }
}

impl ObservabilityConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_level: std::env::var("LEASEBOUND_LOG_LEVEL").unwrap_or(defaults.log_level),
            json_logging: std::env::var("LEASEBOUND_JSON_LOGS")
                .map(|s| s.to_lowercase() == "true" || s == "1")
                .unwrap_or(defaults.json_logging),
        }
    }
}

/// System-wide lease defaults
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_lease_defaults"))]
pub struct LeaseDefaults {
    /// TTL applied when neither role nor backend sets one
    #[serde(with = "canonical")]
    pub default_ttl: Duration,

    /// Upper bound on any lease lifetime
    #[serde(with = "canonical")]
    pub max_ttl: Duration,

    /// How often expired leases are reaped
    #[serde(with = "canonical")]
    pub reaper_interval: Duration,
}

fn validate_lease_defaults(defaults: &LeaseDefaults) -> std::result::Result<(), validator::ValidationError> {
    if defaults.default_ttl.is_zero() || defaults.max_ttl.is_zero() {
        return Err(validator::ValidationError::new("zero_ttl")
            .with_message("Lease TTLs must be greater than zero".into()));
    }
    if defaults.reaper_interval.is_zero() {
        return Err(validator::ValidationError::new("zero_interval")
            .with_message("Reaper interval must be greater than zero".into()));
    }
    Ok(())
}

impl Default for LeaseDefaults {
    fn default() -> Self {
        let limits = LeaseLimits::default();
        Self {
            default_ttl: limits.default_ttl,
            max_ttl: limits.max_ttl,
            reaper_interval: Duration::from_secs(60),
        }
    }
}

impl LeaseDefaults {
    pub fn limits(&self) -> LeaseLimits {
        LeaseLimits { default_ttl: self.default_ttl, max_ttl: self.max_ttl }
    }

    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            default_ttl: duration_var("LEASEBOUND_DEFAULT_LEASE_TTL", defaults.default_ttl)?,
            max_ttl: duration_var("LEASEBOUND_MAX_LEASE_TTL", defaults.max_ttl)?,
            reaper_interval: duration_var("LEASEBOUND_REAPER_INTERVAL", defaults.reaper_interval)?,
        })
    }
}

fn duration_var(name: &str, default: Duration) -> Result<Duration> {
    match std::env::var(name) {
        Ok(raw) => parse_duration(&raw)
            .map_err(|_| Error::validation_field(format!("Invalid duration '{}' in {}", raw, name), name)),
        Err(_) => Ok(default),
    }
}
