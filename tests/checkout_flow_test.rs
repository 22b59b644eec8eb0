//! End-to-end service tests over an in-memory SQLite database.
//!
//! Covers the order lifecycle: authoritative checkout with coupon
//! redemption, webhook-confirmed fulfillment with duplicate deliveries,
//! and download-link redemption up to its limits.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, Database, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, Set,
};
use sea_orm_migration::MigratorTrait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

use ebookstore_api::{
    cache::BoundedCache,
    entities::{audit_log, coupon, download_link, order, order_item, product},
    errors::ServiceError,
    events::EventSender,
    migrator::Migrator,
    notifications::NoopMailer,
    services::{
        audit::AuditService,
        checkout::{CheckoutItem, CheckoutRequest, CheckoutService},
        coupons::CouponService,
        downloads::DownloadService,
        fulfillment::{FulfillmentService, WebhookDisposition},
        payments::{CreateIntentRequest, PaymentGateway, PaymentIntent},
    },
};

/// Gateway double: hands out sequential intent ids and records requests.
struct StaticGateway {
    requests: Mutex<Vec<CreateIntentRequest>>,
}

impl StaticGateway {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            requests: Mutex::new(Vec::new()),
        })
    }

    fn last_request(&self) -> CreateIntentRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl PaymentGateway for StaticGateway {
    async fn create_intent(
        &self,
        request: CreateIntentRequest,
    ) -> Result<PaymentIntent, ServiceError> {
        let mut requests = self.requests.lock().unwrap();
        let id = format!("pi_test_{}", requests.len() + 1);
        requests.push(request);
        Ok(PaymentIntent {
            client_secret: format!("{}_secret", id),
            id,
        })
    }
}

struct TestApp {
    db: Arc<DatabaseConnection>,
    gateway: Arc<StaticGateway>,
    checkout: CheckoutService,
    fulfillment: FulfillmentService,
    downloads: DownloadService,
    coupons: CouponService,
    _event_rx: mpsc::Receiver<ebookstore_api::events::Event>,
}

impl TestApp {
    async fn new() -> Self {
        let mut opt = ConnectOptions::new("sqlite::memory:".to_owned());
        opt.max_connections(1).sqlx_logging(false);
        let db = Arc::new(Database::connect(opt).await.expect("sqlite connection"));
        Migrator::up(&*db, None).await.expect("migrations");

        let (tx, rx) = mpsc::channel(256);
        let events = EventSender::new(tx);
        let audit = AuditService::new(db.clone());
        let coupons = CouponService::new(db.clone());
        let gateway = StaticGateway::new();
        let checkout = CheckoutService::new(
            db.clone(),
            coupons.clone(),
            gateway.clone(),
            audit.clone(),
            events.clone(),
            Arc::new(BoundedCache::new(64, std::time::Duration::from_secs(60))),
            "eur".to_string(),
        );
        let fulfillment = FulfillmentService::new(
            db.clone(),
            audit.clone(),
            events.clone(),
            Arc::new(NoopMailer),
            Duration::days(7),
            "http://localhost:8080".to_string(),
        );
        let downloads = DownloadService::new(
            db.clone(),
            audit,
            events,
            "test-signing-secret".to_string(),
            Duration::hours(1),
        );

        Self {
            db,
            gateway,
            checkout,
            fulfillment,
            downloads,
            coupons,
            _event_rx: rx,
        }
    }

    async fn seed_product(&self, sku: &str, price: Decimal, file: Option<&str>) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            sku: Set(sku.to_string()),
            title: Set(format!("Book {}", sku)),
            author: Set("Test Author".to_string()),
            description: Set(None),
            price: Set(price),
            currency: Set("eur".to_string()),
            file_url: Set(file.map(str::to_string)),
            file_name: Set(file.map(|_| format!("{}.epub", sku.to_lowercase()))),
            file_size_bytes: Set(file.map(|_| 2_048_000)),
            max_downloads: Set(3),
            download_count: Set(0),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed product")
    }

    async fn seed_coupon(&self, code: &str, max_uses: Option<i32>) -> coupon::Model {
        let now = Utc::now();
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_string()),
            discount_type: Set(coupon::DiscountType::Percentage),
            discount_value: Set(dec!(50)),
            max_discount: Set(Some(dec!(5.00))),
            min_purchase_amount: Set(None),
            valid_from: Set(None),
            valid_until: Set(None),
            max_uses: Set(max_uses),
            times_used: Set(0),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed coupon")
    }

    fn request(&self, items: Vec<(Uuid, i32)>, coupon: Option<&str>) -> CheckoutRequest {
        CheckoutRequest {
            items: items
                .into_iter()
                .map(|(product_id, quantity)| CheckoutItem {
                    product_id,
                    quantity,
                })
                .collect(),
            customer_email: "reader@example.com".to_string(),
            customer_name: Some("Ada Reader".to_string()),
            country: "LU".to_string(),
            coupon_code: coupon.map(str::to_string),
        }
    }
}

#[tokio::test]
async fn checkout_recomputes_totals_and_redeems_the_coupon_once() {
    let app = TestApp::new().await;
    let book = app
        .seed_product("BK-001", dec!(10.00), Some("https://files.test/bk-001.epub"))
        .await;
    let coupon = app.seed_coupon("SUMMER50", Some(10)).await;

    let outcome = app
        .checkout
        .create_payment_intent(app.request(vec![(book.id, 2)], Some("summer50")))
        .await
        .expect("checkout succeeds");

    // 20.00 subtotal, 50% capped at 5.00, VAT 17% on 15.00 -> 17.55
    assert_eq!(outcome.amount_minor, 1755);

    let stored = order::Entity::find_by_id(outcome.order_id)
        .one(&*app.db)
        .await
        .unwrap()
        .expect("order persisted");
    assert_eq!(stored.payment_status, order::PaymentStatus::Pending);
    assert_eq!(stored.subtotal_amount, dec!(20.00));
    assert_eq!(stored.discount_amount, dec!(5.00));
    assert_eq!(stored.vat_amount, dec!(2.55));
    assert_eq!(stored.total_amount, dec!(17.55));
    assert_eq!(stored.coupon_code.as_deref(), Some("SUMMER50"));

    // Item rows carry the catalog price and sum to the subtotal
    let items = order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(outcome.order_id))
        .all(&*app.db)
        .await
        .unwrap();
    let item_total: Decimal = items.iter().map(|i| i.total_price).sum();
    assert_eq!(item_total, stored.subtotal_amount);

    // The usage counter moved exactly once, at order creation
    let coupon = coupon::Entity::find_by_id(coupon.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(coupon.times_used, 1);

    // Intent metadata can rebuild the order without the database
    let request = app.gateway.last_request();
    assert_eq!(request.amount_minor, 1755);
    assert_eq!(request.metadata["customer_email"], "reader@example.com");
    assert_eq!(request.metadata["total"], "17.55");
    assert_eq!(request.metadata["coupon_code"], "SUMMER50");
}

#[tokio::test]
async fn exhausted_coupon_rejects_before_any_side_effect() {
    let app = TestApp::new().await;
    let book = app.seed_product("BK-002", dec!(10.00), None).await;
    app.seed_coupon("ONCE", Some(1)).await;

    app.checkout
        .create_payment_intent(app.request(vec![(book.id, 1)], Some("ONCE")))
        .await
        .expect("first redemption");

    let err = app
        .checkout
        .create_payment_intent(app.request(vec![(book.id, 1)], Some("ONCE")))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::CouponUsageLimitReached));

    // The rejected attempt created neither an order nor a charge intent
    assert_eq!(
        order::Entity::find().count(&*app.db).await.unwrap(),
        1,
        "only the first checkout persisted an order"
    );
    assert_eq!(app.gateway.requests.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_product_rejects_the_cart() {
    let app = TestApp::new().await;
    let err = app
        .checkout
        .create_payment_intent(app.request(vec![(Uuid::new_v4(), 1)], None))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidItems(_)));
}

#[tokio::test]
async fn duplicate_confirmation_processes_exactly_once() {
    let app = TestApp::new().await;
    let with_file = app
        .seed_product("BK-010", dec!(12.00), Some("https://files.test/bk-010.epub"))
        .await;
    let without_file = app.seed_product("BK-011", dec!(6.00), None).await;

    let outcome = app
        .checkout
        .create_payment_intent(app.request(vec![(with_file.id, 1), (without_file.id, 1)], None))
        .await
        .unwrap();

    // Intent ids from the gateway double are sequential: this one is pi_test_1
    let first = app.fulfillment.confirm_payment("pi_test_1").await.unwrap();
    assert_eq!(
        first,
        WebhookDisposition::Processed {
            order_id: outcome.order_id
        }
    );

    let second = app.fulfillment.confirm_payment("pi_test_1").await.unwrap();
    assert_eq!(
        second,
        WebhookDisposition::AlreadyProcessed {
            order_id: outcome.order_id
        }
    );

    let stored = order::Entity::find_by_id(outcome.order_id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.payment_status, order::PaymentStatus::Paid);
    assert!(stored.paid_at.is_some());

    // One link for the downloadable item, none for the file-less one, and
    // the re-delivery minted nothing extra
    let links = download_link::Entity::find()
        .filter(download_link::Column::OrderId.eq(outcome.order_id))
        .all(&*app.db)
        .await
        .unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].product_id, with_file.id);
    assert_eq!(links[0].max_downloads, 3);
    assert_eq!(links[0].download_count, 0);
    assert!(links[0].is_active);
}

#[tokio::test]
async fn confirmation_for_unknown_intent_is_acknowledged_not_processed() {
    let app = TestApp::new().await;
    let disposition = app
        .fulfillment
        .confirm_payment("pi_never_created")
        .await
        .unwrap();
    assert_eq!(disposition, WebhookDisposition::UnknownIntent);
}

#[tokio::test]
async fn failed_payment_marks_the_order_failed() {
    let app = TestApp::new().await;
    let book = app.seed_product("BK-020", dec!(9.00), None).await;
    let outcome = app
        .checkout
        .create_payment_intent(app.request(vec![(book.id, 1)], None))
        .await
        .unwrap();

    let disposition = app.fulfillment.mark_failed("pi_test_1").await.unwrap();
    assert_eq!(
        disposition,
        WebhookDisposition::Processed {
            order_id: outcome.order_id
        }
    );

    let stored = order::Entity::find_by_id(outcome.order_id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.payment_status, order::PaymentStatus::Failed);

    // A success notification after failure does not resurrect the order
    let after = app.fulfillment.confirm_payment("pi_test_1").await.unwrap();
    assert_eq!(
        after,
        WebhookDisposition::AlreadyProcessed {
            order_id: outcome.order_id
        }
    );
}

#[tokio::test]
async fn download_limit_is_enforced_and_the_count_never_overshoots() {
    let app = TestApp::new().await;
    let book = app
        .seed_product("BK-030", dec!(15.00), Some("https://files.test/bk-030.epub"))
        .await;
    let outcome = app
        .checkout
        .create_payment_intent(app.request(vec![(book.id, 1)], None))
        .await
        .unwrap();
    app.fulfillment.confirm_payment("pi_test_1").await.unwrap();

    let link = download_link::Entity::find()
        .filter(download_link::Column::OrderId.eq(outcome.order_id))
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();

    for expected_remaining in (0..3).rev() {
        let grant = app
            .downloads
            .redeem(&link.token, "reader@example.com")
            .await
            .expect("redemption within limit");
        assert_eq!(grant.remaining_downloads, expected_remaining);
        assert!(grant.download_url.contains("signature="));
        assert_eq!(grant.file_name, "bk-030.epub");
    }

    let err = app
        .downloads
        .redeem(&link.token, "reader@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::DownloadLimitReached));

    let stored = download_link::Entity::find_by_id(link.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.download_count, 3);
    assert!(!stored.is_active);

    // Product aggregate moved once per successful redemption
    let stored_product = product::Entity::find_by_id(book.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored_product.download_count, 3);
}

#[tokio::test]
async fn downloads_require_the_owning_customer() {
    let app = TestApp::new().await;
    let book = app
        .seed_product("BK-040", dec!(15.00), Some("https://files.test/bk-040.epub"))
        .await;
    app.checkout
        .create_payment_intent(app.request(vec![(book.id, 1)], None))
        .await
        .unwrap();
    app.fulfillment.confirm_payment("pi_test_1").await.unwrap();

    let link = download_link::Entity::find().one(&*app.db).await.unwrap().unwrap();

    let err = app
        .downloads
        .redeem(&link.token, "stranger@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Forbidden(_)));

    // Ownership comparison ignores case
    app.downloads
        .redeem(&link.token, "Reader@Example.COM")
        .await
        .expect("owner email matching is case-insensitive");
}

#[tokio::test]
async fn expired_link_is_rejected_and_deactivated() {
    let app = TestApp::new().await;
    let book = app
        .seed_product("BK-050", dec!(15.00), Some("https://files.test/bk-050.epub"))
        .await;
    let outcome = app
        .checkout
        .create_payment_intent(app.request(vec![(book.id, 1)], None))
        .await
        .unwrap();
    app.fulfillment.confirm_payment("pi_test_1").await.unwrap();

    // Age the link past its window without touching its uses
    let link = download_link::Entity::find()
        .filter(download_link::Column::OrderId.eq(outcome.order_id))
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    let mut expired: download_link::ActiveModel = link.clone().into();
    expired.expires_at = Set(Utc::now() - Duration::hours(1));
    expired.update(&*app.db).await.unwrap();

    let err = app
        .downloads
        .redeem(&link.token, "reader@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::TokenExpired));

    let stored = download_link::Entity::find_by_id(link.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert!(!stored.is_active);
    assert_eq!(stored.download_count, 0, "expired redemption consumed no use");
}

#[tokio::test]
async fn invalid_tokens_are_rejected() {
    let app = TestApp::new().await;
    let err = app
        .downloads
        .redeem("no-such-token", "reader@example.com")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidToken));
}

#[tokio::test]
async fn state_changes_leave_an_audit_trail() {
    let app = TestApp::new().await;
    let book = app
        .seed_product("BK-060", dec!(10.00), Some("https://files.test/bk-060.epub"))
        .await;
    app.checkout
        .create_payment_intent(app.request(vec![(book.id, 1)], None))
        .await
        .unwrap();
    app.fulfillment.confirm_payment("pi_test_1").await.unwrap();

    let link = download_link::Entity::find().one(&*app.db).await.unwrap().unwrap();
    app.downloads
        .redeem(&link.token, "reader@example.com")
        .await
        .unwrap();

    let actions: Vec<String> = audit_log::Entity::find()
        .all(&*app.db)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    for expected in [
        "payment_intent_created",
        "payment_confirmed",
        "email_sent",
        "file_downloaded",
    ] {
        assert!(
            actions.iter().any(|a| a == expected),
            "missing audit action {expected}, got {actions:?}"
        );
    }
}

#[tokio::test]
async fn quote_reports_coupon_rejection_without_touching_totals() {
    let app = TestApp::new().await;
    let book = app.seed_product("BK-070", dec!(10.00), None).await;

    let now = Utc::now();
    coupon::ActiveModel {
        id: Set(Uuid::new_v4()),
        code: Set("BYGONE".to_string()),
        discount_type: Set(coupon::DiscountType::Percentage),
        discount_value: Set(dec!(10)),
        max_discount: Set(None),
        min_purchase_amount: Set(None),
        valid_from: Set(None),
        valid_until: Set(Some(now - Duration::days(1))),
        max_uses: Set(None),
        times_used: Set(0),
        is_active: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&*app.db)
    .await
    .unwrap();

    let quote = app
        .checkout
        .quote(
            &[CheckoutItem {
                product_id: book.id,
                quantity: 2,
            }],
            "LU",
            Some("BYGONE".to_string()),
        )
        .await
        .unwrap();

    assert!(quote.coupon_applied.is_none());
    assert!(quote.coupon_rejection.is_some());
    assert_eq!(quote.breakdown.discount, dec!(0));
    assert_eq!(quote.breakdown.subtotal, dec!(20.00));
    assert_eq!(quote.breakdown.total, dec!(23.40));
}

#[tokio::test]
async fn validate_never_consumes_a_use() {
    let app = TestApp::new().await;
    let coupon_row = app.seed_coupon("LOOKONLY", Some(5)).await;

    for _ in 0..3 {
        app.coupons
            .validate("LOOKONLY", dec!(100), Utc::now())
            .await
            .unwrap();
    }

    let stored = coupon::Entity::find_by_id(coupon_row.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.times_used, 0);
}
