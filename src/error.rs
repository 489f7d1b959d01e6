use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// The main error type for the HTTP surface.
///
/// Domain code works with [`crate::ledger::LedgerError`]; conversions into
/// this type happen at the handler boundary, where each variant carries the
/// HTTP status it maps to.
#[derive(Debug, thiserror::Error)]
pub enum GymLedgerError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl GymLedgerError {
    /// HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Internal(_) | Self::Anyhow(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Message safe to expose to clients. Server-side details stay in logs.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::NotFound(msg)
            | Self::BadRequest(msg)
            | Self::Unauthorized(msg)
            | Self::Forbidden(msg) => msg.clone(),
            Self::Internal(_) | Self::Anyhow(_) => "Internal server error".to_string(),
            Self::ServiceUnavailable(_) => "Service unavailable".to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    status: u16,
}

impl IntoResponse for GymLedgerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(target: "gymledger::http", error = %self, "request failed");
        }
        let body = ErrorBody {
            error: self.public_message(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, GymLedgerError>;

impl From<serde_json::Error> for GymLedgerError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            GymLedgerError::BadRequest(format!("JSON error: {}", err))
        } else {
            GymLedgerError::Internal(format!("JSON serialization error: {}", err))
        }
    }
}
