use crate::registry::RegistryError;
use crate::store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json as AxumJson, Response},
};
use serde_json::json;
use thiserror::Error;

/// Structured error types for HTTP status code mapping
#[derive(Error, Debug)]
pub enum AppError {
    #[error("File too large. Maximum allowed is {} MB.", .limit / (1024 * 1024))]
    PayloadTooLarge { limit: u64 },

    #[error("No invite codes available, try again later")]
    CapacityExhausted,

    /// Unknown, expired and already used codes all look the same to clients
    #[error("Invalid or expired code")]
    NotFound,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Insufficient storage: {0}")]
    InsufficientStorage(String),

    #[error("Uploads are temporarily disabled")]
    StorageUnavailable,

    #[error("Storage failure")]
    Storage(#[from] StoreError),

    /// Catch-all for unexpected errors - logs full context internally
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::CapacityExhausted | AppError::StorageUnavailable => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            AppError::InsufficientStorage(_) => StatusCode::INSUFFICIENT_STORAGE,
            AppError::Storage(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::PayloadTooLarge { .. } => "payload_too_large",
            AppError::CapacityExhausted => "capacity_exhausted",
            AppError::NotFound => "not_found",
            AppError::BadRequest(_) => "bad_request",
            AppError::Timeout(_) => "timeout",
            AppError::InsufficientStorage(_) => "insufficient_storage",
            AppError::StorageUnavailable => "storage_unavailable",
            AppError::Storage(_) => "storage_failure",
            AppError::Internal(_) => "internal_error",
        }
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound | RegistryError::Expired | RegistryError::AlreadyConsumed => {
                AppError::NotFound
            }
            RegistryError::CapacityExhausted => AppError::CapacityExhausted,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_type = self.error_type();

        let message = match &self {
            AppError::Storage(err) => {
                tracing::error!(error = %err, fatal = err.is_fatal(), "Storage failure");
                "An internal error occurred".to_string()
            }
            AppError::Internal(err) => {
                // Log full error with backtrace server-side
                tracing::error!(
                    error = ?err,
                    backtrace = ?err.backtrace(),
                    "Internal server error"
                );
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let body = AxumJson(json!({
            "error": {
                "type": error_type,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_refusals_are_indistinguishable() {
        let responses: Vec<(StatusCode, String)> = [
            RegistryError::NotFound,
            RegistryError::Expired,
            RegistryError::AlreadyConsumed,
        ]
        .into_iter()
        .map(AppError::from)
        .map(|err| (err.status(), err.to_string()))
        .collect();

        assert!(responses.iter().all(|r| r == &responses[0]));
        assert_eq!(responses[0].0, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_payload_message_in_megabytes() {
        let err = AppError::PayloadTooLarge {
            limit: 500 * 1024 * 1024,
        };
        assert_eq!(err.to_string(), "File too large. Maximum allowed is 500 MB.");
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn test_capacity_maps_to_unavailable() {
        let err = AppError::from(RegistryError::CapacityExhausted);
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.error_type(), "capacity_exhausted");
    }
}
