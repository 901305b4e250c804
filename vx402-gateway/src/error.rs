//! HTTP error mapping for the gateway.
//!
//! Every error body has the same shape:
//! `{"error": {"error_code": ..., "message": ..., "retryable": ...}}`.
//! Payment-level verification failures do not pass through here; the verify
//! handler reports them as `200 {is_valid: false, ...}` so clients can poll
//! without treating a pending payment as a transport fault.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use vx402::error::{TokenError, VerifyError};

/// Machine-readable error payload.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    /// Stable SCREAMING_SNAKE code.
    pub error_code: String,
    /// Human-readable detail.
    pub message: String,
    /// Whether retrying the same request may succeed.
    pub retryable: bool,
}

impl ErrorBody {
    pub(crate) fn new(error_code: &str, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            error_code: error_code.to_owned(),
            message: message.into(),
            retryable,
        }
    }
}

/// Errors surfaced as HTTP status codes.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Verification infrastructure failure (chain RPC down, store fault).
    #[error(transparent)]
    Verify(#[from] VerifyError),

    /// Token issuance failure.
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Missing or wrong admin key.
    #[error("unauthorized")]
    Unauthorized,

    /// Malformed request input.
    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Verify(err) => match err {
                VerifyError::ChainUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                VerifyError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
                VerifyError::UnsupportedChain(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::UNPROCESSABLE_ENTITY,
            },
            Self::Token(err) => match err {
                TokenError::PaymentNotFound(_) | TokenError::TokenNotFound => {
                    StatusCode::NOT_FOUND
                }
                TokenError::PaymentNotVerified(_) | TokenError::TokenAlreadyIssued(_) => {
                    StatusCode::CONFLICT
                }
                TokenError::TokenExpired | TokenError::NoRequestsRemaining => {
                    StatusCode::PAYMENT_REQUIRED
                }
                TokenError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            Self::Verify(err) => ErrorBody::new(err.error_code(), err.to_string(), err.is_retryable()),
            Self::Token(err) => ErrorBody::new(err.error_code(), err.to_string(), false),
            Self::Unauthorized => ErrorBody::new("UNAUTHORIZED", "unauthorized", false),
            Self::BadRequest(msg) => ErrorBody::new("BAD_REQUEST", msg.clone(), false),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = serde_json::json!({ "error": self.body() });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vx402::chain::Chain;

    #[test]
    fn chain_unavailable_is_503() {
        let err = ApiError::Verify(VerifyError::ChainUnavailable {
            chain: Chain::Base,
            reason: "connection refused".into(),
        });
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.body().retryable);
    }

    #[test]
    fn second_token_issuance_is_409() {
        let err = ApiError::Token(TokenError::TokenAlreadyIssued(vx402::PaymentId(7)));
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.body().error_code, "TOKEN_ALREADY_ISSUED");
    }
}
