//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::Error;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Library(#[from] Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::Internal(_) => "internal_error",
            Self::Library(e) => match e {
                Error::DuplicatePhoto(_) => "duplicate_photo",
                Error::NotFound(_) => "not_found",
                Error::ConversionFailed { .. } => "conversion_failed",
                Error::RenderFailed(_) => "render_failed",
                Error::InvalidFilename(_) => "invalid_filename",
                Error::UnsupportedType(_) => "unsupported_type",
                Error::Storage(_) => "storage_error",
                Error::Io(_) => "io_error",
            },
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Library(e) => match e {
                Error::DuplicatePhoto(_) => StatusCode::CONFLICT,
                Error::NotFound(_) => StatusCode::NOT_FOUND,
                Error::InvalidFilename(_) | Error::UnsupportedType(_) => StatusCode::BAD_REQUEST,
                Error::ConversionFailed { .. }
                | Error::RenderFailed(_)
                | Error::Storage(_)
                | Error::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_errors_map_to_http() {
        let cases = [
            (Error::DuplicatePhoto("a.jpg".into()), StatusCode::CONFLICT, "duplicate_photo"),
            (Error::NotFound("photo a.jpg".into()), StatusCode::NOT_FOUND, "not_found"),
            (Error::InvalidFilename("..".into()), StatusCode::BAD_REQUEST, "invalid_filename"),
            (Error::UnsupportedType("a.txt".into()), StatusCode::BAD_REQUEST, "unsupported_type"),
            (Error::RenderFailed("busy".into()), StatusCode::INTERNAL_SERVER_ERROR, "render_failed"),
        ];
        for (err, status, code) in cases {
            let api = ApiError::from(err);
            assert_eq!(api.status_code(), status);
            assert_eq!(api.code(), code);
        }
    }

    #[test]
    fn test_conversion_failure_is_server_error() {
        let api = ApiError::from(Error::conversion("a.jpg", "bad header"));
        assert_eq!(api.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.to_string(), "conversion failed for a.jpg: bad header");
    }
}
