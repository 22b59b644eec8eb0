//! Coupon lookup, validation, and redemption.
//!
//! Validation is side-effect free: the usage counter moves only at
//! successful order creation, through [`CouponService::redeem`], so
//! abandoned checkouts never consume a use.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    entities::coupon::{self, Entity as Coupon},
    errors::ServiceError,
};

#[derive(Clone)]
pub struct CouponService {
    db: Arc<DatabaseConnection>,
}

impl CouponService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Find an applicable coupon for a cart, or the reason it does not apply.
    ///
    /// Lookup is case-insensitive against the uppercase-stored code and
    /// requires `is_active`; the remaining checks run in [`check_coupon`].
    #[instrument(skip(self), fields(code = %code))]
    pub async fn validate(
        &self,
        code: &str,
        subtotal: Decimal,
        now: DateTime<Utc>,
    ) -> Result<coupon::Model, ServiceError> {
        let normalized = code.trim().to_uppercase();
        let found = Coupon::find()
            .filter(coupon::Column::Code.eq(normalized))
            .filter(coupon::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?;

        let coupon = found.ok_or(ServiceError::InvalidCoupon)?;
        match check_coupon(&coupon, subtotal, now) {
            None => Ok(coupon),
            Some(rejection) => {
                debug!(code = %coupon.code, %rejection, "coupon rejected");
                Err(rejection)
            }
        }
    }

    /// Consume one use of a coupon, called only after order creation.
    /// Runs on the caller's connection so it can join the order-creation
    /// transaction.
    ///
    /// Issued as a single conditional increment so concurrent redemptions
    /// cannot race past `max_uses`; zero rows affected means another
    /// checkout exhausted the coupon since validation.
    #[instrument(skip(self, conn), fields(coupon_id = %coupon_id))]
    pub async fn redeem<C: ConnectionTrait>(
        &self,
        conn: &C,
        coupon_id: Uuid,
    ) -> Result<(), ServiceError> {
        let result = Coupon::update_many()
            .col_expr(
                coupon::Column::TimesUsed,
                Expr::col(coupon::Column::TimesUsed).add(1),
            )
            .col_expr(coupon::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(coupon::Column::Id.eq(coupon_id))
            .filter(coupon::Column::IsActive.eq(true))
            .filter(
                Condition::any()
                    .add(coupon::Column::MaxUses.is_null())
                    .add(
                        Expr::col(coupon::Column::TimesUsed)
                            .lt(Expr::col(coupon::Column::MaxUses)),
                    ),
            )
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::CouponUsageLimitReached);
        }
        Ok(())
    }
}

/// Ordered redeemability checks; the first failing check wins.
/// Returns `None` when the coupon applies.
pub fn check_coupon(
    coupon: &coupon::Model,
    subtotal: Decimal,
    now: DateTime<Utc>,
) -> Option<ServiceError> {
    if let Some(valid_from) = coupon.valid_from {
        if now < valid_from {
            return Some(ServiceError::CouponNotYetValid);
        }
    }
    if let Some(valid_until) = coupon.valid_until {
        if now > valid_until {
            return Some(ServiceError::CouponExpired);
        }
    }
    if let Some(max_uses) = coupon.max_uses {
        if coupon.times_used >= max_uses {
            return Some(ServiceError::CouponUsageLimitReached);
        }
    }
    if let Some(minimum) = coupon.min_purchase_amount {
        if subtotal < minimum {
            return Some(ServiceError::MinimumPurchaseNotMet { minimum });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::coupon::DiscountType;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn sample_coupon() -> coupon::Model {
        let now = Utc::now();
        coupon::Model {
            id: Uuid::new_v4(),
            code: "SUMMER10".to_string(),
            discount_type: DiscountType::Percentage,
            discount_value: dec!(10),
            max_discount: None,
            min_purchase_amount: None,
            valid_from: None,
            valid_until: None,
            max_uses: None,
            times_used: 0,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn unconstrained_coupon_applies() {
        let coupon = sample_coupon();
        assert!(check_coupon(&coupon, dec!(20), Utc::now()).is_none());
    }

    #[test]
    fn not_yet_valid_wins_over_everything_after_lookup() {
        let now = Utc::now();
        let mut coupon = sample_coupon();
        coupon.valid_from = Some(now + Duration::days(1));
        coupon.valid_until = Some(now - Duration::days(1));
        coupon.max_uses = Some(0);
        assert_matches!(
            check_coupon(&coupon, dec!(20), now),
            Some(ServiceError::CouponNotYetValid)
        );
    }

    #[test]
    fn expired_coupon_rejected() {
        let now = Utc::now();
        let mut coupon = sample_coupon();
        coupon.valid_until = Some(now - Duration::hours(1));
        assert_matches!(
            check_coupon(&coupon, dec!(20), now),
            Some(ServiceError::CouponExpired)
        );
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let now = Utc::now();
        let mut coupon = sample_coupon();
        coupon.valid_from = Some(now);
        coupon.valid_until = Some(now);
        assert!(check_coupon(&coupon, dec!(20), now).is_none());
    }

    #[test]
    fn usage_limit_checked_before_minimum_purchase() {
        let mut coupon = sample_coupon();
        coupon.max_uses = Some(3);
        coupon.times_used = 3;
        coupon.min_purchase_amount = Some(dec!(100));
        assert_matches!(
            check_coupon(&coupon, dec!(20), Utc::now()),
            Some(ServiceError::CouponUsageLimitReached)
        );
    }

    #[test]
    fn minimum_purchase_rejection_carries_the_minimum() {
        let mut coupon = sample_coupon();
        coupon.min_purchase_amount = Some(dec!(25));
        assert_matches!(
            check_coupon(&coupon, dec!(20), Utc::now()),
            Some(ServiceError::MinimumPurchaseNotMet { minimum }) if minimum == dec!(25)
        );
    }

    #[test]
    fn remaining_uses_allow_redemption() {
        let mut coupon = sample_coupon();
        coupon.max_uses = Some(3);
        coupon.times_used = 2;
        assert!(check_coupon(&coupon, dec!(20), Utc::now()).is_none());
    }
}
