//! # Configuration Management
//!
//! Server settings are read from the environment (after `.env` is loaded by
//! the binary) and validated before anything starts.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `LEASEBOUND_HOST` / `LEASEBOUND_PORT` | `127.0.0.1` / `8200` |
//! | `DATABASE_URL` | `sqlite://./data/leasebound.db` |
//! | `LEASEBOUND_LOG_LEVEL` | `info` |
//! | `LEASEBOUND_JSON_LOGS` | `false` |
//! | `LEASEBOUND_DEFAULT_LEASE_TTL` / `LEASEBOUND_MAX_LEASE_TTL` | `768h` |
//! | `LEASEBOUND_REAPER_INTERVAL` | `1m` |

pub mod settings;

pub use settings::{AppConfig, DatabaseConfig, LeaseDefaults, ObservabilityConfig, ServerConfig};
