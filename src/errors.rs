use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;

/// Error body returned by every endpoint on failure.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Bad Request",
    "message": "Coupon has expired",
    "timestamp": "2025-11-04T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Bad Request", "Forbidden")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// ISO 8601 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid items: {0}")]
    InvalidItems(String),

    #[error("Customer email is required")]
    MissingEmail,

    #[error("Invalid coupon code")]
    InvalidCoupon,

    #[error("Coupon is not yet valid")]
    CouponNotYetValid,

    #[error("Coupon has expired")]
    CouponExpired,

    #[error("Coupon usage limit reached")]
    CouponUsageLimitReached,

    #[error("Minimum purchase amount of {minimum} not met")]
    MinimumPurchaseNotMet { minimum: Decimal },

    #[error("Payment gateway error: {0}")]
    PaymentGatewayError(String),

    /// The charge intent exists at the processor but the order could not be
    /// persisted. The intent metadata is sufficient to reconstruct the order;
    /// this must reach the logs for manual reconciliation.
    #[error("charge intent {payment_intent_id} created but order was not persisted: {message}")]
    PartialFailure {
        payment_intent_id: String,
        message: String,
    },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid download token")]
    InvalidToken,

    #[error("Download link has expired")]
    TokenExpired,

    #[error("Download limit reached")]
    DownloadLimitReached,

    #[error("Email error: {0}")]
    EmailError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Whether this error is a user-facing coupon rejection; the quote path
    /// reports these alongside undiscounted totals instead of failing.
    pub fn is_coupon_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidCoupon
                | Self::CouponNotYetValid
                | Self::CouponExpired
                | Self::CouponUsageLimitReached
                | Self::MinimumPurchaseNotMet { .. }
        )
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::InvalidInput(_)
            | Self::InvalidItems(_)
            | Self::MissingEmail
            | Self::InvalidCoupon
            | Self::CouponNotYetValid
            | Self::CouponExpired
            | Self::CouponUsageLimitReached
            | Self::MinimumPurchaseNotMet { .. }
            | Self::PaymentGatewayError(_)
            | Self::InvalidToken
            | Self::TokenExpired
            | Self::DownloadLimitReached => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::DatabaseError(_)
            | Self::PartialFailure { .. }
            | Self::EmailError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::EmailError(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            // The intent id stays in the logs, not in the response body.
            Self::PartialFailure { .. } => {
                "Payment was initiated but the order could not be recorded".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        (status, Json(err)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn coupon_rejections_map_to_bad_request() {
        for err in [
            ServiceError::InvalidCoupon,
            ServiceError::CouponNotYetValid,
            ServiceError::CouponExpired,
            ServiceError::CouponUsageLimitReached,
            ServiceError::MinimumPurchaseNotMet { minimum: dec!(25) },
        ] {
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn minimum_purchase_message_includes_required_minimum() {
        let err = ServiceError::MinimumPurchaseNotMet { minimum: dec!(25) };
        assert!(err.to_string().contains("25"));
    }

    #[test]
    fn partial_failure_keeps_intent_id_out_of_response() {
        let err = ServiceError::PartialFailure {
            payment_intent_id: "pi_123".to_string(),
            message: "insert failed".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.response_message().contains("pi_123"));
        assert!(err.to_string().contains("pi_123"));
    }
}
