use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Unified application error type.
///
/// Every variant maps to an HTTP status and a short, non-technical message.
/// Diagnostic detail stays in the server logs; it is never placed in a
/// response body or a redirect URL.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("User not found")]
    NotFound,

    #[error("Failed to refresh token")]
    RefreshFailed,

    #[error("Database error")]
    Database(#[source] rusqlite::Error),

    #[error("Internal error")]
    Internal(String),
}

/// JSON error body: `{"error": "<message>"}`.
///
/// The refresh path deliberately returns the same body shape for a missing
/// Authorization header and a failed verification so the two causes cannot
/// be distinguished by a caller.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized | Self::AuthenticationFailed => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::RefreshFailed | Self::Database(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.to_string(),
        };
        (status, axum::Json(body)).into_response()
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        tracing::error!(error = %err, "Database error");
        Self::Database(err)
    }
}
