pub mod checkout;
pub mod common;
pub mod coupons;
pub mod downloads;
pub mod health;
pub mod webhooks;

use std::sync::Arc;
use std::time::Duration;

use crate::{
    cache::BoundedCache,
    config::AppConfig,
    db::DbPool,
    events::EventSender,
    notifications::{HttpMailer, Mailer, NoopMailer},
    services::{
        audit::AuditService,
        checkout::CheckoutService,
        coupons::CouponService,
        downloads::DownloadService,
        fulfillment::FulfillmentService,
        payments::{PaymentGateway, StripeGateway},
    },
};

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutService>,
    pub coupons: CouponService,
    pub fulfillment: Arc<FulfillmentService>,
    pub downloads: Arc<DownloadService>,
}

impl AppServices {
    /// Wire up the service graph from configuration. The payment gateway
    /// and mailer come from config-selected implementations; tests build
    /// services directly with their own doubles instead.
    pub fn build(db: Arc<DbPool>, config: &AppConfig, event_sender: EventSender) -> Self {
        let gateway: Arc<dyn PaymentGateway> = Arc::new(StripeGateway::new(
            config.payment_api_base.clone(),
            config.payment_api_key.clone(),
            config.external_timeout(),
        ));
        let mailer: Arc<dyn Mailer> = match (&config.email_api_url, &config.email_api_key) {
            (Some(url), Some(key)) => Arc::new(HttpMailer::new(
                url.clone(),
                key.clone(),
                config.email_from.clone(),
                config.external_timeout(),
            )),
            _ => Arc::new(NoopMailer),
        };
        Self::with_collaborators(db, config, event_sender, gateway, mailer)
    }

    pub fn with_collaborators(
        db: Arc<DbPool>,
        config: &AppConfig,
        event_sender: EventSender,
        gateway: Arc<dyn PaymentGateway>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let audit = AuditService::new(db.clone());
        let coupons = CouponService::new(db.clone());
        let product_cache = Arc::new(BoundedCache::new(
            config.product_cache_capacity,
            Duration::from_secs(config.product_cache_ttl_secs),
        ));

        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            coupons.clone(),
            gateway,
            audit.clone(),
            event_sender.clone(),
            product_cache,
            config.currency.clone(),
        ));
        let fulfillment = Arc::new(FulfillmentService::new(
            db.clone(),
            audit.clone(),
            event_sender.clone(),
            mailer,
            chrono::Duration::days(config.download_link_ttl_days),
            config.public_base_url.clone(),
        ));
        let downloads = Arc::new(DownloadService::new(
            db,
            audit,
            event_sender,
            config.download_signing_secret.clone(),
            chrono::Duration::seconds(config.signed_url_ttl_secs),
        ));

        Self {
            checkout,
            coupons,
            fulfillment,
            downloads,
        }
    }
}
