//! Payment-intent orchestration: the authoritative checkout path.
//!
//! Everything the client sent is re-derived here — unit prices come from
//! the catalog, the coupon is re-validated, and totals are recomputed —
//! before any money is committed. All validation runs before the processor
//! call, so a rejected request has no side effects; a persistence failure
//! after the intent succeeds surfaces as `PartialFailure` carrying the
//! orphaned intent id for reconciliation.

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set, TransactionTrait};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::{
    cache::BoundedCache,
    entities::{
        order, order_item,
        product::{self, Entity as Product},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        audit::AuditService,
        coupons::CouponService,
        payments::{CreateIntentRequest, PaymentGateway},
        pricing::{self, Discount, LineAmount, PriceBreakdown},
    },
};

/// One requested cart line; the unit price is looked up server-side.
#[derive(Debug, Clone)]
pub struct CheckoutItem {
    pub product_id: Uuid,
    pub quantity: i32,
}

/// Validated input for [`CheckoutService::create_payment_intent`].
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub items: Vec<CheckoutItem>,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub country: String,
    pub coupon_code: Option<String>,
}

/// Result of a successful orchestration.
#[derive(Debug, Clone)]
pub struct PaymentIntentOutcome {
    pub client_secret: String,
    pub order_id: Uuid,
    pub amount_minor: i64,
}

/// Advisory pricing preview for cart display.
#[derive(Debug, Clone)]
pub struct QuoteOutcome {
    pub breakdown: PriceBreakdown,
    /// Code of the coupon reflected in the breakdown, if one applied.
    pub coupon_applied: Option<String>,
    /// Why the requested coupon did not apply; the breakdown is then the
    /// undiscounted one.
    pub coupon_rejection: Option<String>,
}

/// A cart line joined with its catalog row.
struct ResolvedLine {
    product: product::Model,
    quantity: i32,
}

#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    coupons: CouponService,
    gateway: Arc<dyn PaymentGateway>,
    audit: AuditService,
    events: EventSender,
    product_cache: Arc<BoundedCache<product::Model>>,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        coupons: CouponService,
        gateway: Arc<dyn PaymentGateway>,
        audit: AuditService,
        events: EventSender,
        product_cache: Arc<BoundedCache<product::Model>>,
        currency: String,
    ) -> Self {
        Self {
            db,
            coupons,
            gateway,
            audit,
            events,
            product_cache,
            currency,
        }
    }

    /// Create a processor charge intent and the matching pending order.
    #[instrument(skip(self, request), fields(customer_email = %request.customer_email, country = %request.country))]
    pub async fn create_payment_intent(
        &self,
        request: CheckoutRequest,
    ) -> Result<PaymentIntentOutcome, ServiceError> {
        validate_request(&request)?;

        // Authoritative path: prices always come straight from the catalog.
        let lines = self.resolve_lines(&request.items, false).await?;
        let now = Utc::now();
        let subtotal: Decimal = lines
            .iter()
            .map(|l| l.product.price * Decimal::from(l.quantity))
            .sum();

        let coupon = match normalized_code(&request.coupon_code) {
            Some(code) => Some(self.coupons.validate(&code, subtotal, now).await?),
            None => None,
        };

        let amounts: Vec<LineAmount> = lines
            .iter()
            .map(|l| LineAmount {
                unit_price: l.product.price,
                quantity: l.quantity,
            })
            .collect();
        let breakdown = pricing::calculate(
            &amounts,
            &request.country,
            coupon.as_ref().map(Discount::from_coupon),
        );
        let amount_minor = breakdown
            .charge_minor_units()
            .ok_or_else(|| ServiceError::InvalidInput("order total out of range".to_string()))?;

        let intent = self
            .gateway
            .create_intent(CreateIntentRequest {
                amount_minor,
                currency: self.currency.clone(),
                receipt_email: request.customer_email.clone(),
                metadata: intent_metadata(&request, &lines, &breakdown, coupon.as_ref().map(|c| c.code.as_str())),
            })
            .await?;

        let order_id = Uuid::new_v4();
        if let Err(e) = self
            .persist_order(order_id, &request, &lines, &breakdown, coupon.as_ref(), &intent.id, now)
            .await
        {
            // The processor holds a live intent with no order behind it; the
            // metadata on the intent is the reconciliation source.
            error!(
                payment_intent_id = %intent.id,
                error = %e,
                "order persistence failed after charge intent creation"
            );
            return Err(ServiceError::PartialFailure {
                payment_intent_id: intent.id,
                message: e.to_string(),
            });
        }

        self.audit
            .record_best_effort(
                "payment_intent_created",
                "order",
                order_id,
                serde_json::json!({
                    "payment_intent_id": intent.id,
                    "amount_minor": amount_minor,
                    "customer_email": request.customer_email,
                }),
            )
            .await;
        self.events.send(Event::PaymentIntentCreated {
            order_id,
            payment_intent_id: intent.id.clone(),
            amount_minor,
        });
        info!(%order_id, payment_intent_id = %intent.id, amount_minor, "payment intent created");

        Ok(PaymentIntentOutcome {
            client_secret: intent.client_secret,
            order_id,
            amount_minor,
        })
    }

    /// Price a cart for display. Never trusted for charging; the same
    /// arithmetic runs again in [`Self::create_payment_intent`]. A coupon
    /// that does not apply leaves the totals untouched and reports why.
    #[instrument(skip(self, items), fields(country = %country))]
    pub async fn quote(
        &self,
        items: &[CheckoutItem],
        country: &str,
        coupon_code: Option<String>,
    ) -> Result<QuoteOutcome, ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::InvalidItems("cart is empty".to_string()));
        }
        let lines = self.resolve_lines(items, true).await?;
        let amounts: Vec<LineAmount> = lines
            .iter()
            .map(|l| LineAmount {
                unit_price: l.product.price,
                quantity: l.quantity,
            })
            .collect();
        let subtotal: Decimal = amounts.iter().map(LineAmount::total).sum();

        let mut coupon_applied = None;
        let mut coupon_rejection = None;
        let mut discount = None;
        if let Some(code) = normalized_code(&coupon_code) {
            match self.coupons.validate(&code, subtotal, Utc::now()).await {
                Ok(coupon) => {
                    discount = Some(Discount::from_coupon(&coupon));
                    coupon_applied = Some(coupon.code);
                }
                Err(e) if e.is_coupon_rejection() => {
                    coupon_rejection = Some(e.response_message());
                }
                Err(e) => return Err(e),
            }
        }

        Ok(QuoteOutcome {
            breakdown: pricing::calculate(&amounts, country, discount),
            coupon_applied,
            coupon_rejection,
        })
    }

    /// Look up the catalog rows behind a set of cart lines. The bounded
    /// cache only serves the advisory quote path; the charge path reads
    /// the database every time.
    async fn resolve_lines(
        &self,
        items: &[CheckoutItem],
        use_cache: bool,
    ) -> Result<Vec<ResolvedLine>, ServiceError> {
        let mut found: HashMap<Uuid, product::Model> = HashMap::new();
        let mut missing: Vec<Uuid> = Vec::new();
        for item in items {
            if use_cache {
                if let Some(product) = self.product_cache.get(&item.product_id.to_string()) {
                    found.insert(item.product_id, product);
                    continue;
                }
            }
            missing.push(item.product_id);
        }

        if !missing.is_empty() {
            let fetched = Product::find()
                .filter(product::Column::Id.is_in(missing))
                .all(&*self.db)
                .await?;
            for product in fetched {
                self.product_cache
                    .insert(product.id.to_string(), product.clone());
                found.insert(product.id, product);
            }
        }

        items
            .iter()
            .map(|item| {
                let product = found.get(&item.product_id).cloned().ok_or_else(|| {
                    ServiceError::InvalidItems(format!("unknown product {}", item.product_id))
                })?;
                if !product.is_active {
                    return Err(ServiceError::InvalidItems(format!(
                        "product {} is not available",
                        product.id
                    )));
                }
                Ok(ResolvedLine {
                    product,
                    quantity: item.quantity,
                })
            })
            .collect()
    }

    /// Steps 6-8 of the orchestration, atomically: order row, item rows,
    /// and the coupon usage increment commit or roll back together.
    #[allow(clippy::too_many_arguments)]
    async fn persist_order(
        &self,
        order_id: Uuid,
        request: &CheckoutRequest,
        lines: &[ResolvedLine],
        breakdown: &PriceBreakdown,
        coupon: Option<&crate::entities::coupon::Model>,
        payment_intent_id: &str,
        now: chrono::DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        order::ActiveModel {
            id: Set(order_id),
            customer_email: Set(request.customer_email.clone()),
            customer_name: Set(request.customer_name.clone()),
            subtotal_amount: Set(breakdown.subtotal),
            discount_amount: Set(breakdown.discount),
            vat_rate: Set(breakdown.vat_rate),
            vat_amount: Set(breakdown.vat),
            total_amount: Set(breakdown.total),
            currency: Set(self.currency.clone()),
            payment_status: Set(order::PaymentStatus::Pending),
            payment_intent_id: Set(payment_intent_id.to_string()),
            country: Set(request.country.trim().to_ascii_uppercase()),
            coupon_code: Set(coupon.map(|c| c.code.clone())),
            created_at: Set(now),
            paid_at: Set(None),
        }
        .insert(&txn)
        .await?;

        for line in lines {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product.id),
                title: Set(line.product.title.clone()),
                quantity: Set(line.quantity),
                unit_price: Set(line.product.price),
                total_price: Set(line.product.price * Decimal::from(line.quantity)),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        if let Some(coupon) = coupon {
            self.coupons.redeem(&txn, coupon.id).await?;
        }

        txn.commit().await?;
        Ok(())
    }
}

fn validate_request(request: &CheckoutRequest) -> Result<(), ServiceError> {
    if request.customer_email.trim().is_empty() {
        return Err(ServiceError::MissingEmail);
    }
    if !request.customer_email.contains('@') {
        return Err(ServiceError::InvalidInput(
            "customer email is malformed".to_string(),
        ));
    }
    if request.items.is_empty() {
        return Err(ServiceError::InvalidItems("cart is empty".to_string()));
    }
    for item in &request.items {
        if item.quantity < 1 {
            return Err(ServiceError::InvalidItems(format!(
                "quantity for product {} must be at least 1",
                item.product_id
            )));
        }
    }
    Ok(())
}

fn normalized_code(code: &Option<String>) -> Option<String> {
    code.as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

/// Metadata attached to the charge intent: enough to rebuild the order
/// without a database lookup if persistence fails after the intent exists.
fn intent_metadata(
    request: &CheckoutRequest,
    lines: &[ResolvedLine],
    breakdown: &PriceBreakdown,
    coupon_code: Option<&str>,
) -> BTreeMap<String, String> {
    let items: Vec<serde_json::Value> = lines
        .iter()
        .map(|l| {
            serde_json::json!({
                "product_id": l.product.id,
                "quantity": l.quantity,
                "unit_price": l.product.price,
            })
        })
        .collect();

    let mut metadata = BTreeMap::new();
    metadata.insert("customer_email".to_string(), request.customer_email.clone());
    metadata.insert("country".to_string(), request.country.clone());
    metadata.insert("subtotal".to_string(), breakdown.subtotal.to_string());
    metadata.insert("discount".to_string(), breakdown.discount.to_string());
    metadata.insert("vat".to_string(), breakdown.vat.to_string());
    metadata.insert("total".to_string(), breakdown.total.to_string());
    if let Some(code) = coupon_code {
        metadata.insert("coupon_code".to_string(), code.to_string());
    }
    metadata.insert(
        "items".to_string(),
        serde_json::Value::Array(items).to_string(),
    );
    metadata
}
