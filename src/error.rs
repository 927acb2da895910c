use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::services::mailer::MailerError;

/// Error type shared by every handler. Variants map onto the HTTP status
/// codes the API exposes; server-side failures are logged and surfaced as a
/// generic message.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Insufficient stock for medication ID: {0}")]
    InsufficientStock(i32),
    #[error("Too many attempts, please try again later")]
    TooManyRequests,
    #[error("token error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("upload error: {0}")]
    Multipart(#[from] axum::extract::multipart::MultipartError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("password hashing error: {0}")]
    Hash(#[from] bcrypt::BcryptError),
    #[error("mail error: {0}")]
    Mail(#[from] MailerError),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_)
            | ApiError::InsufficientStock(_)
            | ApiError::Multipart(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) | ApiError::Jwt(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Database(_)
            | ApiError::Io(_)
            | ApiError::Hash(_)
            | ApiError::Mail(_)
            | ApiError::Json(_)
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::Jwt(_) => "Token is not valid".to_string(),
            ApiError::Mail(_) => "Failed to send verification email".to_string(),
            ApiError::Database(_)
            | ApiError::Io(_)
            | ApiError::Hash(_)
            | ApiError::Json(_)
            | ApiError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("request failed: {}", self);
        }
        (status, Json(json!({ "message": self.public_message() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_keep_their_message() {
        let err = ApiError::BadRequest("Price must be a valid positive number".into());
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.public_message(), "Price must be a valid positive number");
    }

    #[test]
    fn server_errors_are_masked() {
        let err = ApiError::Internal("connection pool exhausted".into());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Internal server error");
    }

    #[test]
    fn token_errors_are_unauthorized() {
        let err = ApiError::Jwt(jsonwebtoken::errors::ErrorKind::InvalidToken.into());
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.public_message(), "Token is not valid");
    }
}
