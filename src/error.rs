use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("order {0} has already been taken")]
    AlreadyTaken(i64),

    #[error("order {0} already has a pending proposal from another courier")]
    ProposalInProgress(i64),

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("out of bounds: {0}")]
    OutOfBounds(String),

    #[error("verification code does not match")]
    BadVerificationCode,

    #[error("verification locked for order {0} after too many failed attempts")]
    VerificationLocked(i64),

    #[error("insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        requested: Decimal,
        available: Decimal,
    },

    #[error("transaction {0} has already been processed")]
    AlreadyProcessed(i64),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::InvalidState(_) => "invalid_state",
            AppError::AlreadyTaken(_) => "already_taken",
            AppError::ProposalInProgress(_) => "proposal_in_progress",
            AppError::LimitExceeded(_) => "limit_exceeded",
            AppError::OutOfBounds(_) => "out_of_bounds",
            AppError::BadVerificationCode => "bad_verification_code",
            AppError::VerificationLocked(_) => "verification_locked",
            AppError::InsufficientBalance { .. } => "insufficient_balance",
            AppError::AlreadyProcessed(_) => "already_processed",
            AppError::Validation(_) => "validation_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidState(_) => StatusCode::CONFLICT,
            AppError::AlreadyTaken(_) => StatusCode::CONFLICT,
            AppError::ProposalInProgress(_) => StatusCode::CONFLICT,
            AppError::LimitExceeded(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::OutOfBounds(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadVerificationCode => StatusCode::FORBIDDEN,
            AppError::VerificationLocked(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::AlreadyProcessed(_) => StatusCode::CONFLICT,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            AppError::Internal(detail) => {
                tracing::error!(error = %detail, "request failed with internal error");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "success": false,
            "error": self.code(),
            "message": message,
        }));

        (status, body).into_response()
    }
}
