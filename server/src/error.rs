use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

/// Errors surfaced synchronously to an HTTP caller.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("bad token")]
    Unauthorized,
    #[error("expected {expected}, got {got:?}")]
    UnsupportedMediaType { expected: String, got: String },
    #[error("{0}")]
    BadRequest(String),
    #[error("no frame yet")]
    NotFound,
    #[error("bad token")]
    Forbidden,
}

impl RelayError {
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::Unauthorized => StatusCode::UNAUTHORIZED,
            RelayError::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            RelayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::NotFound => StatusCode::NOT_FOUND,
            RelayError::Forbidden => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        (status, Json(json!({ "ok": false, "detail": self.to_string() }))).into_response()
    }
}
