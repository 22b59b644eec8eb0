//! Payment processor client.
//!
//! The orchestrator talks to the processor through the [`PaymentGateway`]
//! trait; [`StripeGateway`] is the production implementation speaking the
//! Stripe payment-intent wire format. Every call carries a bounded timeout
//! and failures surface as `PaymentGatewayError` for the caller to map.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{error, instrument};

use crate::errors::ServiceError;

/// Request to commit an amount with the processor before the customer
/// authorizes payment.
#[derive(Debug, Clone)]
pub struct CreateIntentRequest {
    /// Amount in currency minor units (e.g. cents).
    pub amount_minor: i64,
    pub currency: String,
    pub receipt_email: String,
    /// Attached verbatim to the intent. Carries everything needed to
    /// reconstruct the order without a database lookup, as the reconciliation
    /// fallback when persistence fails after the intent succeeds.
    pub metadata: BTreeMap<String, String>,
}

/// Processor-side charge intent, as much of it as the backend needs.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(
        &self,
        request: CreateIntentRequest,
    ) -> Result<PaymentIntent, ServiceError>;
}

/// Stripe payment-intents client.
pub struct StripeGateway {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    message: Option<String>,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

impl StripeGateway {
    pub fn new(api_base: String, secret_key: String, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client construction is infallible with static options");
        Self {
            http,
            api_base,
            secret_key,
        }
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(amount_minor = request.amount_minor, currency = %request.currency))]
    async fn create_intent(
        &self,
        request: CreateIntentRequest,
    ) -> Result<PaymentIntent, ServiceError> {
        let mut form: Vec<(String, String)> = vec![
            ("amount".to_string(), request.amount_minor.to_string()),
            ("currency".to_string(), request.currency.clone()),
            ("receipt_email".to_string(), request.receipt_email.clone()),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
        ];
        for (key, value) in &request.metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
        }

        let response = self
            .http
            .post(format!("{}/v1/payment_intents", self.api_base))
            .basic_auth(&self.secret_key, Option::<&str>::None)
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "payment intent request failed");
                if e.is_timeout() {
                    ServiceError::PaymentGatewayError("payment processor timed out".to_string())
                } else {
                    ServiceError::PaymentGatewayError(
                        "payment processor unreachable".to_string(),
                    )
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .json::<StripeErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error.message.or(body.error.error_type))
                .unwrap_or_else(|| format!("processor returned {}", status));
            error!(%status, %message, "payment intent rejected");
            return Err(ServiceError::PaymentGatewayError(message));
        }

        response.json::<PaymentIntent>().await.map_err(|e| {
            error!(error = %e, "malformed payment intent response");
            ServiceError::PaymentGatewayError("malformed processor response".to_string())
        })
    }
}
