// crates/server/src/error.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use evalhub_core::{NameError, OutputError};
use serde::Serialize;
use thiserror::Error;

/// Structured JSON error response for API errors
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}

/// API error types that map to HTTP status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid name: {0}")]
    Name(#[from] NameError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            ApiError::Name(name_err) => {
                tracing::warn!(error = %name_err, "Rejected evaluation name");
                (
                    StatusCode::BAD_REQUEST,
                    ErrorResponse::with_details("Invalid evaluation name", name_err.to_string()),
                )
            }
            ApiError::Output(output_err) => {
                let (status, error_msg) = match output_err {
                    OutputError::UnknownFormat(format) => {
                        tracing::warn!(format = %format, "Unknown output format");
                        (StatusCode::BAD_REQUEST, "Unknown output format")
                    }
                    OutputError::NotFound { job, format } => {
                        tracing::info!(evaluation = %job, format = %format, "Output not found");
                        (StatusCode::NOT_FOUND, "Output not found")
                    }
                    OutputError::Unavailable => {
                        tracing::warn!("Output requested while artifact storage is disabled");
                        (StatusCode::SERVICE_UNAVAILABLE, "Artifact storage unavailable")
                    }
                    OutputError::Storage(message) => {
                        tracing::error!(message = %message, "Artifact storage error");
                        (StatusCode::INTERNAL_SERVER_ERROR, "Artifact storage error")
                    }
                };
                (
                    status,
                    ErrorResponse::with_details(error_msg, output_err.to_string()),
                )
            }
            ApiError::BadRequest(msg) => {
                tracing::warn!(message = %msg, "Bad request");
                (StatusCode::BAD_REQUEST, ErrorResponse::new(msg.clone()))
            }
        };

        (status, Json(error_response)).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
