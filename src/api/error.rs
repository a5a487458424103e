use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use tracing::error;

use crate::errors::Error;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    MethodNotAllowed(String),
    BadGateway(String),
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn bad_request<S: Into<String>>(msg: S) -> Self {
        ApiError::BadRequest(msg.into())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let (error_kind, message) = match self {
            ApiError::BadRequest(msg) => ("bad_request", msg),
            ApiError::NotFound(msg) => ("not_found", msg),
            ApiError::MethodNotAllowed(msg) => ("unsupported_operation", msg),
            ApiError::BadGateway(msg) => ("upstream_error", msg),
            ApiError::Internal(msg) => ("internal_error", msg),
        };

        (status, Json(ErrorBody { error: error_kind, message })).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err {
            Error::Validation { .. }
            | Error::ConfigurationMissing { .. }
            | Error::MaxTtlExceeded { .. } => ApiError::BadRequest(message),
            Error::NotFound { .. } | Error::AlreadyAbsent { .. } => ApiError::NotFound(message),
            Error::UnsupportedOperation { .. } => ApiError::MethodNotAllowed(message),
            Error::Upstream { .. } => ApiError::BadGateway(message),
            Error::PartialRevocation { .. }
            | Error::Storage { .. }
            | Error::Serialization { .. }
            | Error::Io { .. }
            | Error::Internal { .. } => {
                error!(error = %message, "request failed");
                ApiError::Internal(message)
            }
        }
    }
}
