//! Webhook-triggered order fulfillment.
//!
//! `pending -> paid` is the only legal transition and happens here, exactly
//! once per order. The transition and the download-link mint run in one
//! transaction guarded by a conditional update, so at-least-once webhook
//! delivery (including concurrent duplicates) produces one paid order, one
//! set of links, and one email.

use chrono::{Duration, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    entities::{
        download_link::{self, Entity as DownloadLink},
        order::{self, Entity as Order, PaymentStatus},
        order_item::{self, Entity as OrderItem},
        product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    notifications::{ConfirmationLine, Mailer, OrderConfirmation},
    services::{audit::AuditService, downloads},
};

/// How a webhook notification was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookDisposition {
    Processed { order_id: Uuid },
    AlreadyProcessed { order_id: Uuid },
    /// No order carries this intent id. Logged for reconciliation; the
    /// intent metadata at the processor is the recovery source.
    UnknownIntent,
}

#[derive(Clone)]
pub struct FulfillmentService {
    db: Arc<DatabaseConnection>,
    audit: AuditService,
    events: EventSender,
    mailer: Arc<dyn Mailer>,
    /// How long minted download links stay redeemable.
    link_ttl: Duration,
    /// Base URL for customer-facing download pages in the email.
    public_base_url: String,
}

impl FulfillmentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        audit: AuditService,
        events: EventSender,
        mailer: Arc<dyn Mailer>,
        link_ttl: Duration,
        public_base_url: String,
    ) -> Self {
        Self {
            db,
            audit,
            events,
            mailer,
            link_ttl,
            public_base_url,
        }
    }

    /// Handle a verified "payment succeeded" notification.
    #[instrument(skip(self), fields(payment_intent_id = %payment_intent_id))]
    pub async fn confirm_payment(
        &self,
        payment_intent_id: &str,
    ) -> Result<WebhookDisposition, ServiceError> {
        let Some(order) = self.find_order(payment_intent_id).await? else {
            warn!("payment succeeded for unknown intent; reconcile from intent metadata");
            return Ok(WebhookDisposition::UnknownIntent);
        };

        let now = Utc::now();
        let txn = self.db.begin().await?;

        // Single-winner guard: only the delivery that flips pending -> paid
        // proceeds to mint links. Re-deliveries and concurrent duplicates
        // see zero rows affected and stop here.
        let transition = Order::update_many()
            .set(order::ActiveModel {
                payment_status: Set(PaymentStatus::Paid),
                paid_at: Set(Some(now)),
                ..Default::default()
            })
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(&txn)
            .await?;
        if transition.rows_affected == 0 {
            txn.commit().await?;
            info!(order_id = %order.id, "payment notification already processed");
            return Ok(WebhookDisposition::AlreadyProcessed { order_id: order.id });
        }

        // Mint one link per purchased item that has a file. The composite
        // unique index on (order_id, product_id) makes the insert a no-op
        // if a crashed earlier attempt already minted it.
        let items = OrderItem::find()
            .filter(order_item::Column::OrderId.eq(order.id))
            .find_also_related(product::Entity)
            .all(&txn)
            .await?;

        let mut lines = Vec::with_capacity(items.len());
        let mut minted = 0usize;
        for (item, maybe_product) in &items {
            let Some(product) = maybe_product else {
                warn!(order_id = %order.id, product_id = %item.product_id, "order item without catalog row");
                continue;
            };
            let Some(file_url) = product.file_url.clone() else {
                lines.push(ConfirmationLine {
                    title: item.title.clone(),
                    quantity: item.quantity,
                    download_url: None,
                    license_key: None,
                });
                continue;
            };

            let token = downloads::generate_token();
            let license_key = downloads::generate_license_key();
            let insert = DownloadLink::insert(download_link::ActiveModel {
                id: Set(Uuid::new_v4()),
                token: Set(token.clone()),
                order_id: Set(order.id),
                product_id: Set(product.id),
                download_url: Set(file_url),
                license_key: Set(license_key.clone()),
                expires_at: Set(now + self.link_ttl),
                max_downloads: Set(product.max_downloads),
                download_count: Set(0),
                is_active: Set(true),
                created_at: Set(now),
            })
            .on_conflict(
                OnConflict::columns([
                    download_link::Column::OrderId,
                    download_link::Column::ProductId,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec(&txn)
            .await;

            match insert {
                Ok(_) => {
                    minted += 1;
                    lines.push(ConfirmationLine {
                        title: item.title.clone(),
                        quantity: item.quantity,
                        download_url: Some(format!("{}/downloads/{}", self.public_base_url, token)),
                        license_key: Some(license_key),
                    });
                }
                Err(DbErr::RecordNotInserted) => {
                    lines.push(ConfirmationLine {
                        title: item.title.clone(),
                        quantity: item.quantity,
                        download_url: None,
                        license_key: None,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        txn.commit().await?;
        info!(order_id = %order.id, minted, "order marked paid");

        self.events.send(Event::OrderPaid { order_id: order.id });
        self.events.send(Event::DownloadLinksIssued {
            order_id: order.id,
            link_count: minted,
        });
        self.audit
            .record_best_effort(
                "payment_confirmed",
                "order",
                order.id,
                serde_json::json!({
                    "payment_intent_id": payment_intent_id,
                    "links_minted": minted,
                }),
            )
            .await;

        // Email dispatch never unwinds the paid transition.
        let confirmation = OrderConfirmation {
            order_id: order.id,
            customer_email: order.customer_email.clone(),
            customer_name: order.customer_name.clone(),
            total: order.total_amount.to_string(),
            currency: order.currency.clone(),
            lines,
        };
        match self.mailer.send_order_confirmation(confirmation).await {
            Ok(()) => {
                self.events
                    .send(Event::ConfirmationEmailSent { order_id: order.id });
                self.audit
                    .record_best_effort(
                        "email_sent",
                        "order",
                        order.id,
                        serde_json::json!({ "template": "order-confirmation" }),
                    )
                    .await;
            }
            Err(e) => {
                warn!(error = %e, order_id = %order.id, "confirmation email failed");
            }
        }

        Ok(WebhookDisposition::Processed { order_id: order.id })
    }

    /// Handle a verified "payment failed" notification.
    #[instrument(skip(self), fields(payment_intent_id = %payment_intent_id))]
    pub async fn mark_failed(
        &self,
        payment_intent_id: &str,
    ) -> Result<WebhookDisposition, ServiceError> {
        let Some(order) = self.find_order(payment_intent_id).await? else {
            warn!("payment failed for unknown intent");
            return Ok(WebhookDisposition::UnknownIntent);
        };

        let transition = Order::update_many()
            .set(order::ActiveModel {
                payment_status: Set(PaymentStatus::Failed),
                ..Default::default()
            })
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(&*self.db)
            .await?;
        if transition.rows_affected == 0 {
            return Ok(WebhookDisposition::AlreadyProcessed { order_id: order.id });
        }

        self.events.send(Event::PaymentFailed { order_id: order.id });
        self.audit
            .record_best_effort(
                "payment_failed",
                "order",
                order.id,
                serde_json::json!({ "payment_intent_id": payment_intent_id }),
            )
            .await;
        Ok(WebhookDisposition::Processed { order_id: order.id })
    }

    async fn find_order(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        Ok(Order::find()
            .filter(order::Column::PaymentIntentId.eq(payment_intent_id))
            .one(&*self.db)
            .await?)
    }
}
