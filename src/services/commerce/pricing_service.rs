use crate::errors::ServiceError;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Minor-unit precision used when no currency is given
pub const DEFAULT_MINOR_UNITS: u32 = 2;

/// One priced line fed into the totals computation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PricedLine {
    pub unit_price: Decimal,
    pub quantity: i32,
}

impl PricedLine {
    pub fn new(unit_price: Decimal, quantity: i32) -> Self {
        Self {
            unit_price,
            quantity,
        }
    }
}

/// Derived money amounts for a cart or an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub grand_total: Decimal,
}

impl Totals {
    pub fn zero() -> Self {
        Self {
            subtotal: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            grand_total: Decimal::ZERO,
        }
    }
}

/// ISO 4217 minor units for `currency`.
pub fn minor_units(currency: &str) -> u32 {
    match currency.to_ascii_uppercase().as_str() {
        "JPY" | "KRW" | "VND" | "CLP" | "ISK" | "UGX" => 0,
        "BHD" | "KWD" | "OMR" | "JOD" | "TND" => 3,
        _ => DEFAULT_MINOR_UNITS,
    }
}

/// Rounds half away from zero, which is round-half-up for the non-negative
/// amounts handled here.
pub fn round_money(amount: Decimal, minor_units: u32) -> Decimal {
    amount.round_dp_with_strategy(minor_units, RoundingStrategy::MidpointAwayFromZero)
}

fn overflow() -> ServiceError {
    ServiceError::ValidationError("amount exceeds supported range".to_string())
}

/// Line total `unit_price × quantity`, rounded to the currency minor unit.
pub fn line_total(
    unit_price: Decimal,
    quantity: i32,
    minor_units: u32,
) -> Result<Decimal, ServiceError> {
    if quantity < 1 {
        return Err(ServiceError::InvalidQuantity(quantity));
    }
    if unit_price.is_sign_negative() && !unit_price.is_zero() {
        return Err(ServiceError::ValidationError(format!(
            "unit price cannot be negative: {}",
            unit_price
        )));
    }
    let raw = unit_price
        .checked_mul(Decimal::from(quantity))
        .ok_or_else(overflow)?;
    Ok(round_money(raw, minor_units))
}

/// Computes subtotal, tax and grand total with two-decimal minor units.
///
/// # Arguments
/// * `lines` - Priced lines; every quantity must be at least 1
/// * `tax_rate` - Flat rate, e.g. `0.18`
pub fn compute_totals(lines: &[PricedLine], tax_rate: Decimal) -> Result<Totals, ServiceError> {
    compute_with_precision(lines, tax_rate, DEFAULT_MINOR_UNITS)
}

/// Same as [`compute_totals`] with the minor units of `currency`.
pub fn compute_totals_for_currency(
    lines: &[PricedLine],
    tax_rate: Decimal,
    currency: &str,
) -> Result<Totals, ServiceError> {
    compute_with_precision(lines, tax_rate, minor_units(currency))
}

fn compute_with_precision(
    lines: &[PricedLine],
    tax_rate: Decimal,
    minor_units: u32,
) -> Result<Totals, ServiceError> {
    if tax_rate.is_sign_negative() && !tax_rate.is_zero() {
        return Err(ServiceError::ValidationError(format!(
            "tax rate cannot be negative: {}",
            tax_rate
        )));
    }

    let mut subtotal = Decimal::ZERO;
    for line in lines {
        let total = line_total(line.unit_price, line.quantity, minor_units)?;
        subtotal = subtotal.checked_add(total).ok_or_else(overflow)?;
    }

    let tax_amount = round_money(
        subtotal.checked_mul(tax_rate).ok_or_else(overflow)?,
        minor_units,
    );
    let grand_total = subtotal.checked_add(tax_amount).ok_or_else(overflow)?;

    Ok(Totals {
        subtotal,
        tax_amount,
        grand_total,
    })
}

/// Pricing bound to the configured flat tax rate. Cart display and order
/// assembly share one instance so both round identically.
#[derive(Debug, Clone, Copy)]
pub struct PricingEngine {
    tax_rate: Decimal,
}

impl PricingEngine {
    pub fn new(tax_rate: Decimal) -> Self {
        Self { tax_rate }
    }

    pub fn tax_rate(&self) -> Decimal {
        self.tax_rate
    }

    pub fn totals(&self, lines: &[PricedLine], currency: &str) -> Result<Totals, ServiceError> {
        compute_totals_for_currency(lines, self.tax_rate, currency)
    }

    pub fn line_total(
        &self,
        unit_price: Decimal,
        quantity: i32,
        currency: &str,
    ) -> Result<Decimal, ServiceError> {
        line_total(unit_price, quantity, minor_units(currency))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    // ==================== Totals Tests ====================

    #[test]
    fn gst_registration_example() {
        let totals = compute_totals(&[PricedLine::new(dec!(2499.00), 1)], dec!(0.18)).unwrap();
        assert_eq!(totals.subtotal, dec!(2499.00));
        assert_eq!(totals.tax_amount, dec!(449.82));
        assert_eq!(totals.grand_total, dec!(2948.82));
    }

    #[test]
    fn multiple_lines_sum_before_tax() {
        let lines = [
            PricedLine::new(dec!(999.00), 2),
            PricedLine::new(dec!(1499.50), 1),
        ];
        let totals = compute_totals(&lines, dec!(0.18)).unwrap();
        assert_eq!(totals.subtotal, dec!(3497.50));
        // 629.55 exactly
        assert_eq!(totals.tax_amount, dec!(629.55));
        assert_eq!(totals.grand_total, dec!(4127.05));
    }

    #[test]
    fn empty_lines_give_zero_totals() {
        let totals = compute_totals(&[], dec!(0.18)).unwrap();
        assert_eq!(totals, Totals::zero());
    }

    #[test]
    fn zero_priced_service_is_allowed() {
        let totals = compute_totals(&[PricedLine::new(Decimal::ZERO, 3)], dec!(0.18)).unwrap();
        assert_eq!(totals.grand_total, Decimal::ZERO);
    }

    // ==================== Rounding Tests ====================

    #[test]
    fn tax_rounds_half_up() {
        // 0.25 * 0.18 = 0.045 -> 0.05
        let totals = compute_totals(&[PricedLine::new(dec!(0.25), 1)], dec!(0.18)).unwrap();
        assert_eq!(totals.tax_amount, dec!(0.05));
        assert_eq!(totals.grand_total, dec!(0.30));
    }

    #[test]
    fn zero_decimal_currency_rounds_to_whole_units() {
        let totals = compute_totals_for_currency(
            &[PricedLine::new(dec!(1250), 1)],
            dec!(0.10),
            "JPY",
        )
        .unwrap();
        assert_eq!(totals.tax_amount, dec!(125));

        let totals =
            compute_totals_for_currency(&[PricedLine::new(dec!(5), 1)], dec!(0.10), "JPY")
                .unwrap();
        // 0.5 -> 1
        assert_eq!(totals.tax_amount, dec!(1));
    }

    #[test]
    fn three_decimal_currency_keeps_fils() {
        let totals = compute_totals_for_currency(
            &[PricedLine::new(dec!(1.005), 1)],
            dec!(0.05),
            "KWD",
        )
        .unwrap();
        assert_eq!(totals.subtotal, dec!(1.005));
        // 0.05025 -> 0.050
        assert_eq!(totals.tax_amount, dec!(0.050));
    }

    #[test]
    fn minor_units_lookup() {
        assert_eq!(minor_units("INR"), 2);
        assert_eq!(minor_units("jpy"), 0);
        assert_eq!(minor_units("BHD"), 3);
    }

    // ==================== Validation Tests ====================

    #[test]
    fn quantity_below_one_is_rejected() {
        let result = compute_totals(&[PricedLine::new(dec!(10), 0)], dec!(0.18));
        assert_matches!(result, Err(ServiceError::InvalidQuantity(0)));
    }

    #[test]
    fn negative_price_is_rejected() {
        let result = compute_totals(&[PricedLine::new(dec!(-1), 1)], dec!(0.18));
        assert_matches!(result, Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn negative_tax_rate_is_rejected() {
        let result = compute_totals(&[PricedLine::new(dec!(1), 1)], dec!(-0.18));
        assert_matches!(result, Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn overflow_is_reported_not_panicking() {
        let result = compute_totals(&[PricedLine::new(Decimal::MAX, 2)], dec!(0.18));
        assert_matches!(result, Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn engine_uses_configured_rate() {
        let engine = PricingEngine::new(dec!(0.05));
        let totals = engine
            .totals(&[PricedLine::new(dec!(100), 1)], "INR")
            .unwrap();
        assert_eq!(totals.tax_amount, dec!(5.00));
        assert_eq!(engine.tax_rate(), dec!(0.05));
    }
}
