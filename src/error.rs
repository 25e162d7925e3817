use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::locator::LocateError;
use crate::reference::ReferenceError;

/// Shown for every failure other than an oversized upload.
pub const UNEXPECTED_ERROR_MESSAGE: &str = "予期せぬエラーが発生しました。";

pub fn file_size_message(limit_bytes: usize) -> String {
    format!("ファイルサイズは{}Mbまでアップロードできます。", limit_bytes / (1024 * 1024))
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("upload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },

    #[error("invalid request: {0}")]
    Validation(String),

    #[error(transparent)]
    Locate(#[from] LocateError),

    #[error("request timed out")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error_message: String,
}

impl ApiError {
    /// Client mistakes map to 422; broken reference data and runtime
    /// failures are the server's fault.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::PayloadTooLarge { .. } | ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Timeout => StatusCode::REQUEST_TIMEOUT,
            ApiError::Locate(LocateError::Decode(_))
            | ApiError::Locate(LocateError::Reference(ReferenceError::UnknownMap(_))) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Locate(LocateError::Reference(_))
            | ApiError::Locate(LocateError::Rank(_))
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::PayloadTooLarge { limit } => file_size_message(*limit),
            _ => UNEXPECTED_ERROR_MESSAGE.to_owned(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        } else {
            tracing::warn!("request rejected: {self}");
        }

        let body = ErrorBody {
            error_message: self.message(),
        };
        (status, Json(body)).into_response()
    }
}
