use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::backend::BackendError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("Model {0} not found")]
    NotFound(String),
    #[error("{0}")]
    BackendUnavailable(String),
    #[error("{body}")]
    Backend { status: u16, body: String },
    #[error("{0}")]
    Internal(String),
}

impl From<BackendError> for AppError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::Unavailable(_) | BackendError::Timeout(_) => {
                AppError::BackendUnavailable(error.to_string())
            }
            BackendError::Status { status, body } => AppError::Backend { status, body },
            BackendError::InvalidResponse(_) | BackendError::Misconfigured(_) => {
                AppError::Internal(error.to_string())
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OpenAiErrorEnvelope {
    pub error: OpenAiError,
}

#[derive(Debug, Serialize)]
pub struct OpenAiError {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: &'static str,
    pub code: u16,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Backend { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "invalid_request_error",
            AppError::NotFound(_) => "model_not_found",
            AppError::BackendUnavailable(_) => "backend_unavailable",
            AppError::Backend { .. } => "backend_error",
            AppError::Internal(_) => "server_error",
        }
    }

    /// The body sent to clients, both as an HTTP error and as an in-band
    /// stream frame.
    pub fn envelope(&self) -> OpenAiErrorEnvelope {
        OpenAiErrorEnvelope {
            error: OpenAiError {
                message: self.to_string(),
                error_type: self.error_type(),
                code: self.status().as_u16(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.envelope())).into_response()
    }
}
