//! Customer email dispatch.
//!
//! Fulfillment sends the order confirmation through the [`Mailer`] trait.
//! [`HttpMailer`] posts to a transactional-email HTTP API with a bounded
//! timeout; [`NoopMailer`] logs and succeeds, for development and tests.
//! Callers treat dispatch as a non-critical side effect: a failed send is
//! logged and never rolls back a paid order.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::errors::ServiceError;

/// One purchased item inside a confirmation email.
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationLine {
    pub title: String,
    pub quantity: i32,
    pub download_url: Option<String>,
    pub license_key: Option<String>,
}

/// Everything the confirmation template needs.
#[derive(Debug, Clone, Serialize)]
pub struct OrderConfirmation {
    pub order_id: Uuid,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub total: String,
    pub currency: String,
    pub lines: Vec<ConfirmationLine>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_order_confirmation(
        &self,
        confirmation: OrderConfirmation,
    ) -> Result<(), ServiceError>;
}

/// Mailer backed by a transactional-email HTTP API.
pub struct HttpMailer {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    from_address: String,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    from: &'a str,
    to: &'a str,
    subject: String,
    template: &'static str,
    data: &'a OrderConfirmation,
}

impl HttpMailer {
    pub fn new(endpoint: String, api_key: String, from_address: String, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client construction is infallible with static options");
        Self {
            http,
            endpoint,
            api_key,
            from_address,
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    #[instrument(skip(self, confirmation), fields(order_id = %confirmation.order_id))]
    async fn send_order_confirmation(
        &self,
        confirmation: OrderConfirmation,
    ) -> Result<(), ServiceError> {
        let request = SendRequest {
            from: &self.from_address,
            to: &confirmation.customer_email,
            subject: format!("Your order {}", confirmation.order_id),
            template: "order-confirmation",
            data: &confirmation,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ServiceError::EmailError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ServiceError::EmailError(format!(
                "email API returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Logs instead of sending. Used when no email API is configured.
pub struct NoopMailer;

#[async_trait]
impl Mailer for NoopMailer {
    async fn send_order_confirmation(
        &self,
        confirmation: OrderConfirmation,
    ) -> Result<(), ServiceError> {
        info!(
            order_id = %confirmation.order_id,
            to = %confirmation.customer_email,
            lines = confirmation.lines.len(),
            "email dispatch disabled; confirmation not sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn confirmation() -> OrderConfirmation {
        OrderConfirmation {
            order_id: Uuid::new_v4(),
            customer_email: "reader@example.com".to_string(),
            customer_name: Some("Ada".to_string()),
            total: "23.40".to_string(),
            currency: "eur".to_string(),
            lines: vec![ConfirmationLine {
                title: "The Worked Example".to_string(),
                quantity: 1,
                download_url: Some("https://files.example.com/d/abc".to_string()),
                license_key: Some("ABCD-EFGH-IJKL-MNOP".to_string()),
            }],
        }
    }

    #[tokio::test]
    async fn posts_confirmation_with_bearer_auth() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .and(header("authorization", "Bearer key_123"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let mailer = HttpMailer::new(
            format!("{}/send", server.uri()),
            "key_123".to_string(),
            "orders@example.com".to_string(),
            Duration::from_secs(5),
        );
        mailer.send_order_confirmation(confirmation()).await.unwrap();
    }

    #[tokio::test]
    async fn api_failure_maps_to_email_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mailer = HttpMailer::new(
            format!("{}/send", server.uri()),
            "key_123".to_string(),
            "orders@example.com".to_string(),
            Duration::from_secs(5),
        );
        let err = mailer
            .send_order_confirmation(confirmation())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::EmailError(_)));
    }
}
