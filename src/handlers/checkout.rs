use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    errors::ServiceError,
    handlers::common::{created_response, success_response, validate_input},
    services::checkout::{CheckoutItem, CheckoutRequest},
    AppState,
};

pub fn checkout_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/payment-intent", post(create_payment_intent))
        .route("/quote", post(quote))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1))]
    pub quantity: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentIntentRequest {
    #[validate]
    pub items: Vec<CheckoutItemRequest>,
    #[validate(email)]
    pub customer_email: String,
    pub customer_name: Option<String>,
    #[validate(length(min = 2, max = 2))]
    pub country: String,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentIntentResponse {
    pub client_secret: String,
    pub order_id: Uuid,
    /// Charged amount in currency minor units.
    pub amount: i64,
}

impl CreatePaymentIntentRequest {
    fn into_service_request(self) -> CheckoutRequest {
        CheckoutRequest {
            items: self
                .items
                .into_iter()
                .map(|i| CheckoutItem {
                    product_id: i.product_id,
                    quantity: i.quantity,
                })
                .collect(),
            customer_email: self.customer_email,
            customer_name: self.customer_name,
            country: self.country,
            coupon_code: self.coupon_code,
        }
    }
}

/// Create a charge intent and the matching pending order.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/payment-intent",
    request_body = CreatePaymentIntentRequest,
    responses(
        (status = 201, description = "Charge intent created", body = CreatePaymentIntentResponse),
        (status = 400, description = "Invalid cart, email, or coupon", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn create_payment_intent(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreatePaymentIntentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let outcome = state
        .services
        .checkout
        .create_payment_intent(payload.into_service_request())
        .await?;

    Ok(created_response(CreatePaymentIntentResponse {
        client_secret: outcome.client_secret,
        order_id: outcome.order_id,
        amount: outcome.amount_minor,
    }))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuoteRequest {
    #[validate]
    pub items: Vec<CheckoutItemRequest>,
    #[validate(length(min = 2, max = 2))]
    pub country: String,
    pub coupon_code: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    #[serde(flatten)]
    pub breakdown: crate::services::pricing::PriceBreakdown,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_applied: Option<String>,
    /// Why the requested coupon was not applied; totals above are then the
    /// undiscounted ones.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coupon_rejection: Option<String>,
}

/// Price a cart for display. Advisory only: the same arithmetic is re-run
/// authoritatively when the payment intent is created.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/quote",
    request_body = QuoteRequest,
    responses(
        (status = 200, description = "Pricing breakdown", body = QuoteResponse),
        (status = 400, description = "Invalid cart", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn quote(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<QuoteRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let items: Vec<CheckoutItem> = payload
        .items
        .iter()
        .map(|i| CheckoutItem {
            product_id: i.product_id,
            quantity: i.quantity,
        })
        .collect();
    let outcome = state
        .services
        .checkout
        .quote(&items, &payload.country, payload.coupon_code)
        .await?;

    Ok(success_response(QuoteResponse {
        breakdown: outcome.breakdown,
        coupon_applied: outcome.coupon_applied,
        coupon_rejection: outcome.coupon_rejection,
    }))
}
