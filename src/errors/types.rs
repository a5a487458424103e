//! # Error Types
//!
//! Error taxonomy for the lease-bound secret backends using `thiserror`.

use std::time::Duration;

use crate::secrets::duration::format_duration;

/// Custom result type for leasebound operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the secret backends and the lease subsystem
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A required configuration entry or role is absent
    #[error("Configuration missing: {message}")]
    ConfigurationMissing { message: String },

    /// Malformed request field, returned before any mutation
    #[error("Validation error: {message}")]
    Validation { message: String, field: Option<String> },

    /// A cloud or database client call failed
    #[error("Upstream error ({service}): {message}")]
    Upstream {
        service: &'static str,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The target of an idempotent delete or revoke no longer exists
    #[error("Already absent: {resource}")]
    AlreadyAbsent { resource: String },

    /// A revocation step failed after earlier steps succeeded
    #[error("Revocation failed at step '{failed_step}' after completing [{}]: {source}", join_steps(.completed))]
    PartialRevocation {
        completed: Vec<&'static str>,
        failed_step: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// A renewal asked for more time than the lease's maximum lifetime allows
    #[error("Max TTL exceeded: requested {}, at most {} remaining", go_duration(.requested), go_duration(.remaining))]
    MaxTtlExceeded { requested: Duration, remaining: Duration },

    /// Unknown role, lease or path
    #[error("Not found: {resource_type} '{id}'")]
    NotFound { resource_type: String, id: String },

    /// The path exists but does not support the requested operation
    #[error("Unsupported operation: {message}")]
    UnsupportedOperation { message: String },

    /// Storage backend errors
    #[error("Storage error: {context}")]
    Storage {
        #[source]
        source: sqlx::Error,
        context: String,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        #[source]
        source: serde_json::Error,
        context: String,
    },

    /// I/O errors with additional context
    #[error("I/O error: {context}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

fn join_steps(steps: &[&'static str]) -> String {
    steps.join(", ")
}

fn go_duration(duration: &Duration) -> String {
    format_duration(*duration)
}

impl Error {
    /// Create a configuration-missing error
    pub fn configuration_missing<S: Into<String>>(message: S) -> Self {
        Self::ConfigurationMissing { message: message.into() }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation { message: message.into(), field: None }
    }

    /// Create a validation error with field information
    pub fn validation_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Validation { message: message.into(), field: Some(field.into()) }
    }

    /// Create an upstream error without an underlying source
    pub fn upstream<S: Into<String>>(service: &'static str, message: S) -> Self {
        Self::Upstream { service, message: message.into(), source: None }
    }

    /// Create an upstream error wrapping the client's error
    pub fn upstream_with_source<S, E>(service: &'static str, message: S, source: E) -> Self
    where
        S: Into<String>,
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Upstream { service, message: message.into(), source: Some(Box::new(source)) }
    }

    /// Create an already-absent error
    pub fn already_absent<S: Into<String>>(resource: S) -> Self {
        Self::AlreadyAbsent { resource: resource.into() }
    }

    /// Create a not found error
    pub fn not_found<R: Into<String>, I: Into<String>>(resource_type: R, id: I) -> Self {
        Self::NotFound { resource_type: resource_type.into(), id: id.into() }
    }

    /// Create an unsupported-operation error
    pub fn unsupported<S: Into<String>>(message: S) -> Self {
        Self::UnsupportedOperation { message: message.into() }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Wrap a storage error with context
    pub fn storage<S: Into<String>>(source: sqlx::Error, context: S) -> Self {
        Self::Storage { source, context: context.into() }
    }

    /// Add context to an error that carries a context string
    pub fn context<S: Into<String>>(mut self, context: S) -> Self {
        let context = context.into();
        match &mut self {
            Error::Storage { context: ctx, .. }
            | Error::Serialization { context: ctx, .. }
            | Error::Io { context: ctx, .. } => {
                *ctx = format!("{}: {}", context, ctx);
            }
            Error::Upstream { message, .. } => {
                *message = format!("{}: {}", context, message);
            }
            _ => {}
        }
        self
    }

    /// Whether the error is an idempotent "target already gone" condition
    pub fn is_already_absent(&self) -> bool {
        matches!(self, Error::AlreadyAbsent { .. })
    }

    /// Get the HTTP status code that should be returned for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::ConfigurationMissing { .. } => 400,
            Error::Validation { .. } => 400,
            Error::Upstream { .. } => 502,
            Error::AlreadyAbsent { .. } => 404,
            Error::PartialRevocation { .. } => 500,
            Error::MaxTtlExceeded { .. } => 400,
            Error::NotFound { .. } => 404,
            Error::UnsupportedOperation { .. } => 405,
            Error::Storage { .. } => 500,
            Error::Serialization { .. } => 500,
            Error::Io { .. } => 500,
            Error::Internal { .. } => 500,
        }
    }

    /// Check if the caller may retry the operation.
    ///
    /// The backends never retry on their own; this only tells the lease
    /// subsystem that replaying the call is safe.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Upstream { .. }
                | Error::PartialRevocation { .. }
                | Error::Storage { .. }
                | Error::Io { .. }
        )
    }
}

// Error conversions for common external error types
impl From<sqlx::Error> for Error {
    fn from(error: sqlx::Error) -> Self {
        Self::Storage { source: error, context: "Storage operation failed".to_string() }
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Self::Io { source: error, context: "I/O operation failed".to_string() }
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization { source: error, context: "JSON serialization failed".to_string() }
    }
}

impl From<reqwest::Error> for Error {
    fn from(error: reqwest::Error) -> Self {
        let message = error.to_string();
        Self::Upstream { service: "http", message, source: Some(Box::new(error)) }
    }
}

impl From<validator::ValidationErrors> for Error {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages = Vec::new();
        collect_validation_messages("", &errors, &mut messages);
        Self::validation(format!("Validation failed: {}", messages.join("; ")))
    }
}

/// Flatten nested `validator` errors into `path: message` strings.
fn collect_validation_messages(
    prefix: &str,
    errors: &validator::ValidationErrors,
    out: &mut Vec<String>,
) {
    use validator::ValidationErrorsKind;

    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() { field.to_string() } else { format!("{}.{}", prefix, field) };
        match kind {
            ValidationErrorsKind::Field(field_errors) => {
                let error_messages: Vec<String> = field_errors
                    .iter()
                    .map(|e| {
                        e.message.as_ref().map_or("Invalid value".to_string(), |m| m.to_string())
                    })
                    .collect();
                out.push(format!("{}: {}", path, error_messages.join(", ")));
            }
            ValidationErrorsKind::Struct(nested) => collect_validation_messages(&path, nested, out),
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect_validation_messages(&format!("{}[{}]", path, index), nested, out);
                }
            }
        }
    }
    out.sort();
}
