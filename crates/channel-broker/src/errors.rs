//! Channel Broker error types.
//!
//! All errors map to appropriate HTTP status codes via the `IntoResponse` impl.
//! Messages for caller mistakes (bad input, unknown passphrase, wrong role)
//! are returned as-is. Upstream, database and generation failures are logged
//! server-side and the client only sees a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::jwt::MediaTokenError;
use serde::Serialize;
use thiserror::Error;

/// Channel Broker error type.
///
/// Maps to HTTP status codes:
/// - BadRequest: 400 Bad Request
/// - InvalidToken: 401 Unauthorized
/// - Forbidden: 403 Forbidden
/// - NotFound: 404 Not Found
/// - Conflict: 409 Conflict
/// - Upstream, Database, Generation, Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Upstream service error: {0}")]
    Upstream(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Internal server error")]
    Internal,
}

impl BrokerError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            BrokerError::BadRequest(_) => 400,
            BrokerError::InvalidToken(_) => 401,
            BrokerError::Forbidden(_) => 403,
            BrokerError::NotFound(_) => 404,
            BrokerError::Conflict(_) => 409,
            BrokerError::Upstream(_)
            | BrokerError::Database(_)
            | BrokerError::Generation(_)
            | BrokerError::Internal => 500,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            BrokerError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone())
            }
            BrokerError::InvalidToken(reason) => {
                (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", reason.clone())
            }
            BrokerError::Forbidden(reason) => (StatusCode::FORBIDDEN, "FORBIDDEN", reason.clone()),
            BrokerError::NotFound(resource) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", resource.clone())
            }
            BrokerError::Conflict(reason) => (StatusCode::CONFLICT, "CONFLICT", reason.clone()),
            BrokerError::Upstream(err) => {
                tracing::error!(target: "broker.upstream", error = %err, "Upstream call failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "UPSTREAM_ERROR",
                    "An upstream service request failed".to_string(),
                )
            }
            BrokerError::Database(err) => {
                tracing::error!(target: "broker.database", error = %err, "Database operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "An internal database error occurred".to_string(),
                )
            }
            BrokerError::Generation(err) => {
                tracing::error!(target: "broker.generation", error = %err, "Identifier generation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
            BrokerError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            if let Ok(header_value) =
                "Bearer realm=\"channel-broker\", error=\"invalid_token\"".parse()
            {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}

/// Convert sqlx errors to BrokerError.
///
/// Unique violations become `Conflict` so identifier generation can retry.
impl From<sqlx::Error> for BrokerError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.is_unique_violation() {
                return BrokerError::Conflict(
                    db_err
                        .constraint()
                        .map(|c| format!("Duplicate value for {}", c))
                        .unwrap_or_else(|| "Duplicate value".to_string()),
                );
            }
        }
        BrokerError::Database(err.to_string())
    }
}

/// Token signing failures are internal; the cause is logged, never returned.
impl From<MediaTokenError> for BrokerError {
    fn from(err: MediaTokenError) -> Self {
        tracing::error!(target: "broker.credentials", error = %err, "Credential issuance failed");
        BrokerError::Internal
    }
}
