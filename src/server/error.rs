use axum::{
    extract::rejection::JsonRejection,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
};
use tokio::task::JoinError;

use crate::sql::CompileError;

use super::api::error_response::{ErrorResponse, ErrorResponseType};

#[derive(Debug)]
pub enum ServerError {
    NotFound(Uri),
    UncaughtError {
        details: Option<serde_json::Value>,
        message: String,
        error_type: ErrorResponseType,
    },
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        match self {
            Self::UncaughtError {
                details,
                message,
                error_type,
            } => (
                StatusCode::BAD_REQUEST,
                axum::Json(ErrorResponse {
                    details,
                    message,
                    error_type,
                }),
            )
                .into_response(),
            Self::NotFound(uri) => (
                StatusCode::NOT_FOUND,
                format!("Path not found: {}", uri.path()),
            )
                .into_response(),
        }
    }
}

impl From<CompileError> for ServerError {
    fn from(err: CompileError) -> Self {
        tracing::debug!(error = %err, "compilation failed");
        Self::UncaughtError {
            details: None,
            message: err.to_string(),
            error_type: ErrorResponseType::CompileError,
        }
    }
}

impl From<JsonRejection> for ServerError {
    fn from(err: JsonRejection) -> Self {
        Self::UncaughtError {
            details: None,
            message: err.to_string(),
            error_type: ErrorResponseType::UncaughtError,
        }
    }
}

impl From<JoinError> for ServerError {
    fn from(err: JoinError) -> Self {
        Self::UncaughtError {
            details: None,
            message: err.to_string(),
            error_type: ErrorResponseType::UncaughtError,
        }
    }
}
