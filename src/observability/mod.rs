//! # Observability
//!
//! Structured logging for the server: subscriber setup and the span macros
//! used by the lease manager and backends.

pub mod logging;

pub use logging::{init_logging, log_config_info};
