//! Mapping of taxonomy errors to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use entropy_core::{Error, ErrorKind};
use serde::Serialize;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Error returned by every handler.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.0.kind().http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// JSON error body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub grpc_code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl ErrorResponse {
    pub fn from_error(err: &Error) -> Self {
        let kind = err.kind();
        Self {
            code: kind.code(),
            grpc_code: kind.grpc_code(),
            message: err.message().to_string(),
            // Causes of internal errors stay in the logs.
            cause: match kind {
                ErrorKind::Internal => None,
                _ => err.cause().map(str::to_string),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(ErrorResponse::from_error(&self.0))).into_response()
    }
}
