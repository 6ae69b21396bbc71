use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use escrow_types::api::MessageResponse;
use escrow_types::models::TransactionStatus;
use thiserror::Error;
use tracing::error;

/// Every failure a handler or engine can surface.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Seller does not exist")]
    InvalidParticipant,

    #[error("{0}")]
    Authentication(&'static str),

    #[error("Access denied")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("No active reset code")]
    NoActiveToken,

    #[error("Reset code does not match")]
    InvalidCode,

    #[error("Reset code has expired")]
    Expired,

    #[error("Cannot move transaction from {from} to {to}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Payment notification could not be verified")]
    VerificationFailed,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// One message for every OTP failure so callers cannot tell a missing code
/// from a wrong one.
const RESET_FAILURE: &str = "Invalid or expired code";

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_)
            | Self::InvalidAmount
            | Self::InvalidParticipant
            | Self::NoActiveToken
            | Self::InvalidCode
            | Self::Expired
            | Self::VerificationFailed => StatusCode::BAD_REQUEST,
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) | Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Internal(e) => {
                error!("Internal error: {:#}", e);
                "Server error".to_string()
            }
            Self::NoActiveToken | Self::InvalidCode | Self::Expired => RESET_FAILURE.to_string(),
            other => other.to_string(),
        };
        (status, Json(MessageResponse::new(message))).into_response()
    }
}

/// Run blocking work (SQLite, password hashing) off the async runtime.
pub async fn blocking<F, T>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("spawn_blocking join error: {}", e)))?
}
