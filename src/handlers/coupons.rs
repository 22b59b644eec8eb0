use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    entities::coupon::DiscountType,
    errors::ServiceError,
    handlers::common::{success_response, validate_input},
    AppState,
};

pub fn coupon_routes() -> Router<Arc<AppState>> {
    Router::new().route("/validate", post(validate_coupon))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCouponRequest {
    #[validate(length(min = 1))]
    pub code: String,
    /// Current cart subtotal the coupon would apply to.
    pub subtotal: Decimal,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCouponResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_type: Option<DiscountType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discount_value: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_discount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Advisory coupon check for cart display. Consumes nothing: usage counts
/// move only when an order is created.
#[utoipa::path(
    post,
    path = "/api/v1/coupons/validate",
    request_body = ValidateCouponRequest,
    responses(
        (status = 200, description = "Validation outcome", body = ValidateCouponResponse),
        (status = 400, description = "Malformed request", body = crate::errors::ErrorResponse)
    ),
    tag = "Coupons"
)]
pub async fn validate_coupon(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ValidateCouponRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    match state
        .services
        .coupons
        .validate(&payload.code, payload.subtotal, Utc::now())
        .await
    {
        Ok(coupon) => Ok(success_response(ValidateCouponResponse {
            valid: true,
            code: Some(coupon.code),
            discount_type: Some(coupon.discount_type),
            discount_value: Some(coupon.discount_value),
            max_discount: coupon.max_discount,
            reason: None,
        })),
        Err(e) if e.is_coupon_rejection() => Ok(success_response(ValidateCouponResponse {
            valid: false,
            code: None,
            discount_type: None,
            discount_value: None,
            max_discount: None,
            reason: Some(e.response_message()),
        })),
        Err(e) => Err(e),
    }
}
