//! # Structured Logging
//!
//! Span helper macros and subscriber setup on top of the tracing ecosystem.
//!
//! Backend operations run inside a `backend_request` span and lease
//! lifecycle calls inside a `lease_operation` span, so every log line they
//! emit carries the mount, path or lease id it belongs to.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{AppConfig, ObservabilityConfig};
use crate::errors::{Error, Result};

/// Create a tracing span for a request routed to a mounted backend.
///
/// ```rust,ignore
/// let span = backend_span!(Operation::Read, "azuresql", "creds/web");
/// backend.handle_request(storage, request).instrument(span).await
/// ```
#[macro_export]
macro_rules! backend_span {
    ($operation:expr, $mount:expr, $path:expr) => {
        tracing::info_span!(
            "backend_request",
            operation = %$operation,
            mount = %$mount,
            path = %$path,
            request_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $mount:expr, $path:expr, $($field:tt)*) => {
        tracing::info_span!(
            "backend_request",
            operation = %$operation,
            mount = %$mount,
            path = %$path,
            request_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for a lease lifecycle operation.
#[macro_export]
macro_rules! lease_span {
    ($operation:expr, $lease_id:expr) => {
        tracing::info_span!(
            "lease_operation",
            operation = %$operation,
            lease_id = %$lease_id
        )
    };
    ($operation:expr, $lease_id:expr, $($field:tt)*) => {
        tracing::info_span!(
            "lease_operation",
            operation = %$operation,
            lease_id = %$lease_id,
            $($field)*
        )
    };
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level when set.
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| {
            Error::validation_field(format!("Invalid log level '{}': {}", config.log_level, e), "log_level")
        })?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if config.json_logging {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(false),
            )
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_target(true)).try_init()
    };

    result.map_err(|e| Error::internal(format!("Failed to initialize logging: {}", e)))
}

/// Log configuration at startup
pub fn log_config_info(config: &AppConfig) {
    tracing::info!(
        server_address = %config.server.bind_address(),
        database_url = %crate::storage::pool::sanitize_url(&config.database.url),
        auto_migrate = config.database.auto_migrate,
        default_lease_ttl = %crate::secrets::duration::format_duration(config.leases.default_ttl),
        max_lease_ttl = %crate::secrets::duration::format_duration(config.leases.max_ttl),
        reaper_interval = %crate::secrets::duration::format_duration(config.leases.reaper_interval),
        json_logging = config.observability.json_logging,
        "leasebound configuration"
    );
}
