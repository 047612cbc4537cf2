//! Error types for the material page server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::render::RenderError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

const INTERNAL_MESSAGE: &str = "An internal error occurred";

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            AppError::Render(e) => match e {
                RenderError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
                RenderError::PageOutOfRange { .. } => {
                    (StatusCode::NOT_FOUND, "page_out_of_range", e.to_string())
                }
                RenderError::Conversion(msg) => {
                    tracing::error!(error = %msg, "Page conversion failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "conversion_error",
                        INTERNAL_MESSAGE.to_string(),
                    )
                }
                RenderError::Io(msg) => {
                    tracing::error!(error = %msg, "Source materialization failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "io_error",
                        INTERNAL_MESSAGE.to_string(),
                    )
                }
            },
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    INTERNAL_MESSAGE.to_string(),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "database_error",
                    INTERNAL_MESSAGE.to_string(),
                )
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "io_error",
                    INTERNAL_MESSAGE.to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}
