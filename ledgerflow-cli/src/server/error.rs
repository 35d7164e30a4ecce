//! HTTP error type with `{status, message}` JSON bodies

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(detail) => {
                tracing::error!(detail = %detail, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = json!({
            "status": "error",
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<ledgerflow_core::Error> for ApiError {
    fn from(err: ledgerflow_core::Error) -> Self {
        if err.is_client_error() {
            ApiError::BadRequest(err.to_string())
        } else {
            ApiError::Internal(err.to_string())
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("worker task failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_validation_errors_are_bad_requests() {
        let err = ApiError::from(ledgerflow_core::Error::validation("missing columns"));
        assert!(matches!(err, ApiError::BadRequest(_)));

        for core in [
            ledgerflow_core::Error::internal("cannot move from DONE back to LOADING"),
            ledgerflow_core::Error::upstream("bucket down"),
            ledgerflow_core::Error::config("no project"),
        ] {
            let status = ApiError::from(core).into_response().status();
            assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        }
    }
}
