use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use engine::EngineError;

pub mod codes {
    pub const INVALID_NONCE: &str = "invalid_nonce";
    pub const FORBIDDEN: &str = "forbidden";
    pub const NOT_FOUND: &str = "not_found";
    pub const INVALID_INPUT: &str = "invalid_input";
    pub const INTERNAL: &str = "internal_error";
}

/// Every response body: `{"success": ..., "data": ...}`.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: T,
}

pub fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope { success: true, data })
}

#[derive(Debug, Serialize)]
pub struct ErrorData {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid or missing nonce")]
    InvalidNonce,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::InvalidNonce => (StatusCode::FORBIDDEN, codes::INVALID_NONCE),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, codes::FORBIDDEN),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, codes::NOT_FOUND),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, codes::INVALID_INPUT),
            Self::Engine(e) => match e {
                EngineError::InvalidWorkflow(_) | EngineError::InvalidInput(_) => {
                    (StatusCode::BAD_REQUEST, codes::INVALID_INPUT)
                }
                EngineError::WorkflowNotFound(_)
                | EngineError::LogEntryNotFound(_)
                | EngineError::PostNotFound(_)
                | EngineError::UserNotFound(_) => (StatusCode::NOT_FOUND, codes::NOT_FOUND),
                EngineError::Forbidden(_) => (StatusCode::FORBIDDEN, codes::FORBIDDEN),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, codes::INTERNAL),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("request failed: {self}");
            "internal error".to_owned()
        } else {
            self.to_string()
        };

        let body = Envelope { success: false, data: ErrorData { code, message } };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_errors_map_to_http_statuses() {
        let cases = [
            (ApiError::from(EngineError::InvalidWorkflow("x".into())), StatusCode::BAD_REQUEST),
            (ApiError::from(EngineError::WorkflowNotFound(3)), StatusCode::NOT_FOUND),
            (ApiError::from(EngineError::Forbidden("x".into())), StatusCode::FORBIDDEN),
            (ApiError::from(EngineError::Corrupt("x".into())), StatusCode::INTERNAL_SERVER_ERROR),
            (ApiError::InvalidNonce, StatusCode::FORBIDDEN),
        ];
        for (err, expected) in cases {
            assert_eq!(err.status_and_code().0, expected);
        }
    }
}
