//! Error taxonomy for the relayer.
//!
//! Ineligibility is deliberately absent: an interaction that does not qualify
//! for a tip is a normal outcome (see [`crate::domain::Eligibility`]), not an error.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use super::types::{ErrorDetail, ErrorResponse};

/// Top-level application error
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("External service error: {0}")]
    ExternalService(#[from] ExternalServiceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Not supported: {0}")]
    NotSupported(String),
}

/// Persistence failures
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound(err.to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::Duplicate(db_err.message().to_string())
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Connection(err.to_string())
            }
            _ => Self::Query(err.to_string()),
        }
    }
}

/// How the RPC governor must react to a chain error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainErrorKind {
    /// Provider throttled us: exponential backoff, then retry the same call
    RateLimited,
    /// Network or node hiccup: short linear backoff, then retry
    Transient,
    /// Retrying cannot help (revert, bad input, auth)
    Fatal,
}

/// Chain node and transaction failures
#[derive(Debug, Error)]
pub enum ChainError {
    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Execution reverted: {0}")]
    Reverted(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Insufficient funds for transfer")]
    InsufficientFunds,

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Transaction {0} not confirmed in time")]
    ConfirmationTimeout(String),
}

impl ChainError {
    /// Classify this error for retry purposes
    #[must_use]
    pub fn kind(&self) -> ChainErrorKind {
        match self {
            Self::RateLimited(_) => ChainErrorKind::RateLimited,
            Self::Connection(_) | Self::Timeout(_) | Self::Rpc(_) => ChainErrorKind::Transient,
            Self::Reverted(_)
            | Self::InvalidRequest(_)
            | Self::InsufficientFunds
            | Self::Signing(_)
            | Self::ConfirmationTimeout(_) => ChainErrorKind::Fatal,
        }
    }

    /// Build an error from a raw provider message, classifying it by content.
    pub fn from_rpc_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();

        if lower.contains("429")
            || lower.contains("rate limit")
            || lower.contains("too many requests")
            || lower.contains("compute units per second")
            || lower.contains("throughput")
        {
            return Self::RateLimited(message);
        }
        if lower.contains("insufficient funds") || lower.contains("exceeds balance") {
            return Self::InsufficientFunds;
        }
        if lower.contains("execution reverted") || lower.contains("revert") {
            return Self::Reverted(message);
        }
        let invalid = [
            "method not found",
            "-32601",
            "invalid params",
            "-32602",
            "invalid address",
            "parse error",
            "-32700",
            "nonce too low",
            "already known",
            "replacement transaction underpriced",
        ];
        if invalid.iter().any(|needle| lower.contains(needle)) {
            return Self::InvalidRequest(message);
        }
        if lower.contains("timed out") || lower.contains("timeout") {
            return Self::Timeout(message);
        }
        if lower.contains("connection") || lower.contains("dns") || lower.contains("error sending request") {
            return Self::Connection(message);
        }
        Self::Rpc(message)
    }
}

/// Failures of the social-graph oracle or the event-source filter API
#[derive(Debug, Error)]
pub enum ExternalServiceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Service not configured: {0}")]
    Configuration(String),
}

/// Fatal configuration problems
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing configuration: {0}")]
    Missing(String),

    #[error("Invalid configuration for {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Input validation failures
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing field: {0}")]
    MissingField(String),

    #[error("Invalid field {field}: {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid amount '{0}'")]
    InvalidAmount(String),

    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    #[error("{0}")]
    Multiple(String),
}

impl AppError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Database(DatabaseError::NotFound(_)) => (StatusCode::NOT_FOUND, "not_found"),
            Self::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
            Self::Chain(ChainError::RateLimited(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "chain_rate_limited")
            }
            Self::Chain(_) => (StatusCode::BAD_GATEWAY, "chain_error"),
            Self::ExternalService(_) => (StatusCode::BAD_GATEWAY, "external_service_error"),
            Self::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "configuration_error"),
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            Self::NotSupported(_) => (StatusCode::SERVICE_UNAVAILABLE, "not_supported"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();
        let body = ErrorResponse {
            error: ErrorDetail {
                r#type: error_type.to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_messages_are_classified() {
        for msg in [
            "HTTP error 429 with body: Too Many Requests",
            "your app has exceeded its compute units per second capacity",
            "rate limit exceeded",
        ] {
            let err = ChainError::from_rpc_message(msg);
            assert_eq!(err.kind(), ChainErrorKind::RateLimited, "{msg}");
        }
    }

    #[test]
    fn test_reverts_and_bad_input_are_fatal() {
        let revert = ChainError::from_rpc_message("execution reverted: ERC20: insufficient allowance");
        assert!(matches!(revert, ChainError::Reverted(_)));
        assert_eq!(revert.kind(), ChainErrorKind::Fatal);

        let bad = ChainError::from_rpc_message("invalid params: invalid address");
        assert_eq!(bad.kind(), ChainErrorKind::Fatal);

        let funds = ChainError::from_rpc_message("insufficient funds for gas * price + value");
        assert!(matches!(funds, ChainError::InsufficientFunds));
    }

    #[test]
    fn test_network_failures_are_transient() {
        assert_eq!(
            ChainError::from_rpc_message("error sending request for url").kind(),
            ChainErrorKind::Transient
        );
        assert_eq!(
            ChainError::from_rpc_message("request timed out").kind(),
            ChainErrorKind::Transient
        );
        assert_eq!(
            ChainError::from_rpc_message("502 Bad Gateway").kind(),
            ChainErrorKind::Transient
        );
    }

    #[test]
    fn test_app_error_status_mapping() {
        let (status, kind) =
            AppError::Database(DatabaseError::NotFound("x".into())).status_and_type();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(kind, "not_found");

        let (status, _) =
            AppError::Validation(ValidationError::MissingField("limit".into())).status_and_type();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
