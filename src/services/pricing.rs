//! Pure order pricing: subtotal, coupon discount, destination VAT, total.
//!
//! No I/O happens here. The checkout orchestrator and the advisory quote
//! endpoint both call [`calculate`], so the displayed breakdown and the
//! authoritative charge are computed by the same arithmetic. Rounding to
//! currency minor units happens only at the charge boundary via
//! [`PriceBreakdown::charge_minor_units`].

use once_cell::sync::Lazy;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

use crate::entities::coupon::{self, DiscountType};

/// Destination-country VAT table, two-letter code to integer percentage.
/// Shared verbatim by the quote (display) and charge (authoritative) paths.
/// Countries not listed are charged 0%.
static VAT_RATES: Lazy<HashMap<&'static str, i64>> = Lazy::new(|| {
    HashMap::from([
        ("AT", 20),
        ("BE", 21),
        ("BG", 20),
        ("CY", 19),
        ("CZ", 21),
        ("DE", 19),
        ("DK", 25),
        ("EE", 22),
        ("ES", 21),
        ("FI", 24),
        ("FR", 20),
        ("GB", 20),
        ("GR", 24),
        ("HR", 25),
        ("HU", 27),
        ("IE", 23),
        ("IT", 22),
        ("LT", 21),
        ("LU", 17),
        ("LV", 21),
        ("MT", 18),
        ("NL", 21),
        ("PL", 23),
        ("PT", 23),
        ("RO", 19),
        ("SE", 25),
        ("SI", 22),
        ("SK", 23),
    ])
});

/// VAT percentage for a destination country; unknown countries pay 0%.
pub fn vat_rate(country: &str) -> Decimal {
    let code = country.trim().to_ascii_uppercase();
    VAT_RATES
        .get(code.as_str())
        .map(|pct| Decimal::from(*pct))
        .unwrap_or(Decimal::ZERO)
}

/// A cart line reduced to what pricing needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineAmount {
    pub unit_price: Decimal,
    pub quantity: i32,
}

impl LineAmount {
    pub fn total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// Coupon discount, one evaluation rule per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discount {
    /// Percentage of the subtotal, optionally capped at a fixed amount.
    Percentage { value: Decimal, cap: Option<Decimal> },
    /// Fixed monetary amount.
    Fixed { value: Decimal },
}

impl Discount {
    pub fn from_coupon(coupon: &coupon::Model) -> Self {
        match coupon.discount_type {
            DiscountType::Percentage => Discount::Percentage {
                value: coupon.discount_value,
                cap: coupon.max_discount,
            },
            DiscountType::Fixed => Discount::Fixed {
                value: coupon.discount_value,
            },
        }
    }

    /// Discount amount for a given subtotal. The result is clamped at the
    /// subtotal so the post-discount amount can never go negative; a fixed
    /// coupon worth more than the cart zeroes it out rather than implying a
    /// negative balance.
    pub fn amount(&self, subtotal: Decimal) -> Decimal {
        let raw = match *self {
            Discount::Percentage { value, cap } => {
                let pct = subtotal * value / Decimal::ONE_HUNDRED;
                match cap {
                    Some(cap) => pct.min(cap),
                    None => pct,
                }
            }
            Discount::Fixed { value } => value,
        };
        raw.min(subtotal).max(Decimal::ZERO)
    }
}

/// Full pricing breakdown for a cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PriceBreakdown {
    pub subtotal: Decimal,
    pub discount: Decimal,
    pub vat_rate: Decimal,
    pub vat: Decimal,
    pub total: Decimal,
}

impl PriceBreakdown {
    /// Total in currency minor units, rounded half away from zero.
    /// This is the only place an amount is rounded; the breakdown itself
    /// stays exact so client and server renditions agree bit for bit.
    pub fn charge_minor_units(&self) -> Option<i64> {
        (self.total * Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_i64()
    }
}

/// Price a cart for a destination country with an optional applied coupon.
///
/// Steps, in order: subtotal over all lines, discount (clamped at the
/// subtotal), VAT on the post-discount amount at the destination rate,
/// total. Unknown countries are taxed at 0%.
pub fn calculate(items: &[LineAmount], country: &str, discount: Option<Discount>) -> PriceBreakdown {
    let subtotal: Decimal = items.iter().map(LineAmount::total).sum();
    let discount_amount = discount
        .map(|d| d.amount(subtotal))
        .unwrap_or(Decimal::ZERO);
    let after_discount = subtotal - discount_amount;
    let rate = vat_rate(country);
    let vat = after_discount * rate / Decimal::ONE_HUNDRED;
    PriceBreakdown {
        subtotal,
        discount: discount_amount,
        vat_rate: rate,
        vat,
        total: after_discount + vat,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(price: Decimal, qty: i32) -> LineAmount {
        LineAmount {
            unit_price: price,
            quantity: qty,
        }
    }

    #[test]
    fn two_copies_shipped_to_luxembourg() {
        // 2 x 10.00 to LU (17%): subtotal 20.00, vat 3.40, total 23.40
        let breakdown = calculate(&[line(dec!(10.00), 2)], "LU", None);
        assert_eq!(breakdown.subtotal, dec!(20.00));
        assert_eq!(breakdown.discount, dec!(0));
        assert_eq!(breakdown.vat_rate, dec!(17));
        assert_eq!(breakdown.vat, dec!(3.4000));
        assert_eq!(breakdown.total, dec!(23.4000));
        assert_eq!(breakdown.charge_minor_units(), Some(2340));
    }

    #[test]
    fn percentage_discount_capped_at_max() {
        // 50% of 20.00 would be 10.00, capped at 5.00; vat 17% on 15.00
        let discount = Discount::Percentage {
            value: dec!(50),
            cap: Some(dec!(5.00)),
        };
        let breakdown = calculate(&[line(dec!(10.00), 2)], "LU", Some(discount));
        assert_eq!(breakdown.discount, dec!(5.00));
        assert_eq!(breakdown.vat, dec!(2.5500));
        assert_eq!(breakdown.total, dec!(17.5500));
        assert_eq!(breakdown.charge_minor_units(), Some(1755));
    }

    #[test]
    fn percentage_discount_uncapped() {
        let discount = Discount::Percentage {
            value: dec!(10),
            cap: None,
        };
        let breakdown = calculate(&[line(dec!(30.00), 1)], "DE", Some(discount));
        assert_eq!(breakdown.discount, dec!(3.000));
    }

    #[test]
    fn fixed_discount_clamped_at_subtotal() {
        let discount = Discount::Fixed { value: dec!(50.00) };
        let breakdown = calculate(&[line(dec!(7.99), 1)], "FR", Some(discount));
        assert_eq!(breakdown.discount, dec!(7.99));
        assert_eq!(breakdown.vat, dec!(0));
        assert_eq!(breakdown.total, dec!(0));
    }

    #[test]
    fn unknown_country_pays_no_vat() {
        let breakdown = calculate(&[line(dec!(12.50), 1)], "US", None);
        assert_eq!(breakdown.vat_rate, dec!(0));
        assert_eq!(breakdown.total, dec!(12.50));
    }

    #[test]
    fn country_lookup_is_case_insensitive() {
        assert_eq!(vat_rate("lu"), dec!(17));
        assert_eq!(vat_rate(" de "), dec!(19));
        assert_eq!(vat_rate("ZZ"), dec!(0));
    }

    #[test]
    fn empty_cart_prices_to_zero() {
        let breakdown = calculate(&[], "LU", None);
        assert_eq!(breakdown.subtotal, dec!(0));
        assert_eq!(breakdown.total, dec!(0));
        assert_eq!(breakdown.charge_minor_units(), Some(0));
    }

    #[test]
    fn minor_units_round_half_away_from_zero() {
        // 3 x 3.335 = 10.005 -> 1001 minor units, not 1000
        let breakdown = calculate(&[line(dec!(3.335), 3)], "US", None);
        assert_eq!(breakdown.charge_minor_units(), Some(1001));
    }
}
