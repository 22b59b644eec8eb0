use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    modifiers(&SecurityAddon),
    info(
        title = "ebookstore-api",
        description = "Digital bookstore backend: pricing, coupons, checkout, fulfillment, downloads"
    ),
    paths(
        crate::handlers::health::health,
        crate::handlers::checkout::create_payment_intent,
        crate::handlers::checkout::quote,
        crate::handlers::coupons::validate_coupon,
        crate::handlers::webhooks::payment_webhook,
        crate::handlers::downloads::generate_download,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::handlers::checkout::CheckoutItemRequest,
        crate::handlers::checkout::CreatePaymentIntentRequest,
        crate::handlers::checkout::CreatePaymentIntentResponse,
        crate::handlers::checkout::QuoteRequest,
        crate::handlers::checkout::QuoteResponse,
        crate::handlers::coupons::ValidateCouponRequest,
        crate::handlers::coupons::ValidateCouponResponse,
        crate::handlers::downloads::GenerateDownloadRequest,
        crate::handlers::downloads::GenerateDownloadResponse,
        crate::services::pricing::PriceBreakdown,
        crate::entities::coupon::DiscountType,
    ))
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
