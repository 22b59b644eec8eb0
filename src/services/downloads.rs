//! Download-link redemption: token checks, atomic use counting, and
//! short-lived signed file URLs.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::{Rng, RngCore};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use sha2::Sha256;
use std::sync::Arc;
use tracing::{instrument, warn};

use crate::{
    entities::{
        download_link::{self, Entity as DownloadLink},
        order::Entity as Order,
        product::{self, Entity as Product},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::audit::AuditService,
};

type HmacSha256 = Hmac<Sha256>;

/// Everything the customer needs to fetch one file once.
#[derive(Debug, Clone)]
pub struct DownloadGrant {
    pub download_url: String,
    pub file_name: String,
    pub file_size_bytes: Option<i64>,
    pub remaining_downloads: i32,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct DownloadService {
    db: Arc<DatabaseConnection>,
    audit: AuditService,
    events: EventSender,
    signing_secret: String,
    signed_url_ttl: Duration,
}

impl DownloadService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        audit: AuditService,
        events: EventSender,
        signing_secret: String,
        signed_url_ttl: Duration,
    ) -> Self {
        Self {
            db,
            audit,
            events,
            signing_secret,
            signed_url_ttl,
        }
    }

    /// Redeem a download token for a short-lived signed file URL.
    ///
    /// Checks run in order: token exists and is active, the requester owns
    /// the parent order, the link has not expired, and uses remain. The use
    /// count moves through a conditional increment so concurrent
    /// redemptions of the same token cannot exceed `max_downloads`.
    // skip_all: the token is a credential and stays out of the span.
    #[instrument(skip_all)]
    pub async fn redeem(
        &self,
        token: &str,
        requester_email: &str,
    ) -> Result<DownloadGrant, ServiceError> {
        let link = DownloadLink::find()
            .filter(download_link::Column::Token.eq(token))
            .one(&*self.db)
            .await?
            .ok_or(ServiceError::InvalidToken)?;
        if !link.is_active {
            return Err(ServiceError::InvalidToken);
        }

        let order = Order::find_by_id(link.order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {}", link.order_id)))?;
        if !order
            .customer_email
            .eq_ignore_ascii_case(requester_email.trim())
        {
            return Err(ServiceError::Forbidden(
                "download belongs to a different customer".to_string(),
            ));
        }

        let now = Utc::now();
        if now > link.expires_at {
            self.deactivate(link.id).await;
            return Err(ServiceError::TokenExpired);
        }

        // Claim one use. The guards are re-stated here so two concurrent
        // redemptions cannot both pass the read above and race past the cap.
        let claimed = DownloadLink::update_many()
            .col_expr(
                download_link::Column::DownloadCount,
                Expr::col(download_link::Column::DownloadCount).add(1),
            )
            .filter(download_link::Column::Id.eq(link.id))
            .filter(download_link::Column::IsActive.eq(true))
            .filter(download_link::Column::ExpiresAt.gte(now))
            .filter(
                Expr::col(download_link::Column::DownloadCount)
                    .lt(Expr::col(download_link::Column::MaxDownloads)),
            )
            .exec(&*self.db)
            .await?;
        if claimed.rows_affected == 0 {
            // Either the cap was already reached or a concurrent redemption
            // claimed the final use between our read and this update.
            self.deactivate(link.id).await;
            return Err(ServiceError::DownloadLimitReached);
        }

        let used = link.download_count + 1;
        let remaining = (link.max_downloads - used).max(0);
        if remaining == 0 {
            self.deactivate(link.id).await;
        }

        let product = Product::find_by_id(link.product_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("product {}", link.product_id)))?;
        if let Err(e) = Product::update_many()
            .col_expr(
                product::Column::DownloadCount,
                Expr::col(product::Column::DownloadCount).add(1),
            )
            .filter(product::Column::Id.eq(product.id))
            .exec(&*self.db)
            .await
        {
            warn!(error = %e, product_id = %product.id, "failed to bump product download counter");
        }

        let url_expires_at = now + self.signed_url_ttl;
        let download_url = sign_file_url(
            &link.download_url,
            url_expires_at.timestamp(),
            &self.signing_secret,
        );

        self.audit
            .record_best_effort(
                "file_downloaded",
                "download_link",
                link.id,
                serde_json::json!({
                    "order_id": link.order_id,
                    "product_id": link.product_id,
                    "remaining_downloads": remaining,
                }),
            )
            .await;
        self.events.send(Event::FileDownloaded {
            order_id: link.order_id,
            product_id: link.product_id,
            remaining_downloads: remaining,
        });

        Ok(DownloadGrant {
            download_url,
            file_name: product
                .file_name
                .unwrap_or_else(|| format!("{}.epub", product.sku)),
            file_size_bytes: product.file_size_bytes,
            remaining_downloads: remaining,
            expires_at: url_expires_at,
        })
    }

    async fn deactivate(&self, link_id: uuid::Uuid) {
        let result = DownloadLink::update_many()
            .col_expr(download_link::Column::IsActive, Expr::value(false))
            .filter(download_link::Column::Id.eq(link_id))
            .exec(&*self.db)
            .await;
        if let Err(e) = result {
            warn!(error = %e, link_id = %link_id, "failed to deactivate download link");
        }
    }
}

/// 256-bit unguessable token, URL-safe.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Customer-facing license key, `XXXX-XXXX-XXXX-XXXX`.
pub fn generate_license_key() -> String {
    let mut rng = rand::thread_rng();
    let block = |rng: &mut rand::rngs::ThreadRng| {
        (0..4)
            .map(|_| rng.sample(Alphanumeric).to_ascii_uppercase() as char)
            .collect::<String>()
    };
    format!(
        "{}-{}-{}-{}",
        block(&mut rng),
        block(&mut rng),
        block(&mut rng),
        block(&mut rng)
    )
}

/// Append an expiry and an HMAC signature to a storage file URL. The
/// storage front verifies the same MAC, so only URLs minted here resolve.
pub fn sign_file_url(file_url: &str, expires_at_unix: i64, secret: &str) -> String {
    let signature = url_signature(file_url, expires_at_unix, secret);
    let separator = if file_url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}expires={}&signature={}",
        file_url, separator, expires_at_unix, signature
    )
}

fn url_signature(file_url: &str, expires_at_unix: i64, secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(format!("{}.{}", expires_at_unix, file_url).as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_long_and_unique() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        // 32 bytes base64url without padding
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn license_keys_have_the_expected_shape() {
        let key = generate_license_key();
        let blocks: Vec<&str> = key.split('-').collect();
        assert_eq!(blocks.len(), 4);
        for block in blocks {
            assert_eq!(block.len(), 4);
            assert!(block.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }

    #[test]
    fn signed_url_carries_expiry_and_signature() {
        let url = sign_file_url("https://files.example.com/books/a.epub", 1_700_000_000, "s3cret");
        assert!(url.starts_with("https://files.example.com/books/a.epub?expires=1700000000&signature="));
        let signature = url.rsplit('=').next().unwrap();
        assert_eq!(
            signature,
            url_signature("https://files.example.com/books/a.epub", 1_700_000_000, "s3cret")
        );
    }

    #[test]
    fn signature_depends_on_expiry_and_secret() {
        let base = url_signature("https://f/x", 100, "a");
        assert_ne!(base, url_signature("https://f/x", 101, "a"));
        assert_ne!(base, url_signature("https://f/x", 100, "b"));
        assert_ne!(base, url_signature("https://f/y", 100, "a"));
    }

    #[test]
    fn existing_query_string_is_extended_not_replaced() {
        let url = sign_file_url("https://f/x?v=2", 100, "a");
        assert!(url.starts_with("https://f/x?v=2&expires=100&signature="));
    }
}
