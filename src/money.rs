//! Exact decimal helpers for BRL amounts.
//!
//! All monetary values in the crate are [`Decimal`]s carried at two decimal
//! places. Rounding is half-up (away from zero on the midpoint), which is what
//! Brazilian payment processors use for fees.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// The only currency the store settles in.
pub const CURRENCY: &str = "BRL";

/// Number of decimal places kept for stored amounts.
pub const MONEY_SCALE: u32 = 2;

/// Largest amount a single payment may carry. Boleto barcodes hold the
/// amount as ten digits of cents.
pub const MAX_AMOUNT: Decimal = dec!(99999999.99);

/// Rounds an amount to cents using half-up rounding.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Returns `rate_percent` percent of `amount`, rounded to cents.
///
/// `percentage_of(dec!(100), dec!(0.5))` is `0.50`.
pub fn percentage_of(amount: Decimal, rate_percent: Decimal) -> Decimal {
    round_money(amount * rate_percent / dec!(100))
}

/// Multiplies a unit price by a quantity and rounds to cents.
pub fn line_total(unit_price: Decimal, quantity: i32) -> Decimal {
    round_money(unit_price * Decimal::from(quantity))
}

/// Sums amounts and rounds the result to cents.
pub fn sum<I>(amounts: I) -> Decimal
where
    I: IntoIterator<Item = Decimal>,
{
    round_money(amounts.into_iter().fold(Decimal::ZERO, |acc, a| acc + a))
}

/// Rounds to cents and checks the result is a payable amount: positive and
/// no larger than [`MAX_AMOUNT`].
pub fn payable_amount(amount: Decimal) -> Result<Decimal, &'static str> {
    let rounded = round_money(amount);
    if rounded <= Decimal::ZERO {
        Err("amount_must_be_positive")
    } else if rounded > MAX_AMOUNT {
        Err("amount_too_large")
    } else {
        Ok(rounded)
    }
}

/// Integer number of cents in `amount`, after rounding. `None` when it does
/// not fit an `i64`.
pub fn to_cents(amount: Decimal) -> Option<i64> {
    round_money(amount)
        .checked_mul(dec!(100))?
        .trunc()
        .to_i64()
}

/// Amount digits without the decimal separator, e.g. `100.00` -> `"10000"`.
pub fn digits(amount: Decimal) -> String {
    let mut cents = round_money(amount);
    cents.rescale(MONEY_SCALE);
    cents.mantissa().to_string()
}

/// Formats an amount for display, e.g. `R$ 1234.50`.
pub fn format_brl(amount: Decimal) -> String {
    let rounded = round_money(amount);
    format!("R$ {:.2}", rounded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(dec!(100), dec!(0.5), dec!(0.50))]
    #[case(dec!(100), dec!(3.5), dec!(3.50))]
    #[case(dec!(10.01), dec!(2.5), dec!(0.25))]
    #[case(dec!(10.10), dec!(2.5), dec!(0.25))]
    #[case(dec!(0.30), dec!(2.5), dec!(0.01))]
    #[case(dec!(0.20), dec!(2.5), dec!(0.01))]
    #[case(dec!(59.99), dec!(0), dec!(0))]
    fn percentage_rounds_half_up(
        #[case] amount: Decimal,
        #[case] rate: Decimal,
        #[case] expected: Decimal,
    ) {
        assert_eq!(percentage_of(amount, rate), expected);
    }

    #[test]
    fn line_total_multiplies_quantity() {
        assert_eq!(line_total(dec!(10.00), 2), dec!(20.00));
        assert_eq!(line_total(dec!(0.333), 3), dec!(1.00));
    }

    #[test]
    fn sum_of_nothing_is_zero() {
        assert_eq!(sum(Vec::new()), Decimal::ZERO);
        assert_eq!(sum(vec![dec!(20.00), dec!(5.00)]), dec!(25.00));
    }

    #[rstest]
    #[case(dec!(100.00), 10000)]
    #[case(dec!(32.5), 3250)]
    #[case(dec!(0.005), 1)]
    #[case(dec!(7), 700)]
    fn cents_conversion(#[case] amount: Decimal, #[case] cents: i64) {
        assert_eq!(to_cents(amount), Some(cents));
    }

    #[test]
    fn cents_overflow_is_none() {
        assert_eq!(to_cents(Decimal::MAX), None);
    }

    #[rstest]
    #[case(dec!(0.004), Err("amount_must_be_positive"))]
    #[case(dec!(0), Err("amount_must_be_positive"))]
    #[case(dec!(-1), Err("amount_must_be_positive"))]
    #[case(dec!(0.005), Ok(dec!(0.01)))]
    #[case(dec!(99999999.99), Ok(dec!(99999999.99)))]
    #[case(dec!(99999999.995), Err("amount_too_large"))]
    #[case(dec!(100000000), Err("amount_too_large"))]
    fn payable_amount_is_checked_after_rounding(
        #[case] amount: Decimal,
        #[case] expected: Result<Decimal, &'static str>,
    ) {
        assert_eq!(payable_amount(amount), expected);
    }

    #[test]
    fn formatting() {
        assert_eq!(format_brl(dec!(32.5)), "R$ 32.50");
        assert_eq!(digits(dec!(100.00)), "10000");
        assert_eq!(digits(dec!(7)), "700");
        assert_eq!(digits(dec!(0.05)), "5");
    }
}
