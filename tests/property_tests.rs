//! Property-based tests for pricing invariants.
//!
//! Totals must be reproducible from the same inputs and keep the
//! subtotal / tax / grand total relationship for any cart.

use orderdesk::services::commerce::pricing_service::{
    compute_totals, compute_totals_for_currency, line_total, round_money, PricedLine,
    DEFAULT_MINOR_UNITS,
};
use proptest::prelude::*;
use rust_decimal::Decimal;

// Strategies for generating test data
fn price_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..10_000_000, 0u32..=4).prop_map(|(units, scale)| Decimal::new(units, scale))
}

fn quantity_strategy() -> impl Strategy<Value = i32> {
    1i32..1_000
}

fn line_strategy() -> impl Strategy<Value = PricedLine> {
    (price_strategy(), quantity_strategy()).prop_map(|(price, qty)| PricedLine::new(price, qty))
}

fn tax_rate_strategy() -> impl Strategy<Value = Decimal> {
    (0i64..=1_000_000).prop_map(|millionths| Decimal::new(millionths, 6))
}

proptest! {
    #[test]
    fn subtotal_is_sum_of_line_totals(
        lines in prop::collection::vec(line_strategy(), 0..12),
        rate in tax_rate_strategy(),
    ) {
        let totals = compute_totals(&lines, rate).unwrap();
        let sum: Decimal = lines
            .iter()
            .map(|l| line_total(l.unit_price, l.quantity, DEFAULT_MINOR_UNITS).unwrap())
            .sum();
        prop_assert_eq!(totals.subtotal, sum);
    }

    #[test]
    fn grand_total_is_subtotal_plus_tax(
        lines in prop::collection::vec(line_strategy(), 0..12),
        rate in tax_rate_strategy(),
    ) {
        let totals = compute_totals(&lines, rate).unwrap();
        prop_assert_eq!(totals.grand_total, totals.subtotal + totals.tax_amount);
        prop_assert_eq!(
            totals.tax_amount,
            round_money(totals.subtotal * rate, DEFAULT_MINOR_UNITS)
        );
    }

    #[test]
    fn amounts_are_rounded_to_minor_units(
        lines in prop::collection::vec(line_strategy(), 1..8),
        rate in tax_rate_strategy(),
        currency in prop_oneof![Just("INR"), Just("JPY"), Just("KWD")],
    ) {
        let totals = compute_totals_for_currency(&lines, rate, currency).unwrap();
        let dp = match currency {
            "JPY" => 0,
            "KWD" => 3,
            _ => 2,
        };
        prop_assert!(totals.subtotal.scale() <= dp);
        prop_assert!(totals.tax_amount.scale() <= dp);
        prop_assert!(totals.grand_total.scale() <= dp);
    }

    #[test]
    fn totals_are_idempotent(
        lines in prop::collection::vec(line_strategy(), 0..12),
        rate in tax_rate_strategy(),
    ) {
        let first = compute_totals(&lines, rate).unwrap();
        let second = compute_totals(&lines, rate).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn totals_are_never_negative(
        lines in prop::collection::vec(line_strategy(), 0..12),
        rate in tax_rate_strategy(),
    ) {
        let totals = compute_totals(&lines, rate).unwrap();
        prop_assert!(!totals.subtotal.is_sign_negative() || totals.subtotal.is_zero());
        prop_assert!(totals.grand_total >= totals.subtotal);
    }

    #[test]
    fn non_positive_quantity_is_rejected(price in price_strategy(), qty in -1_000i32..=0) {
        prop_assert!(line_total(price, qty, DEFAULT_MINOR_UNITS).is_err());
    }
}
