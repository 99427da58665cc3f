use rust_decimal::Decimal;

use crate::model::{Charges, DateSpan, PricingPolicy};

use super::BookingError;

/// Price a stay: `nights × night_price`, plus tax, rounded to cents
/// (banker's rounding). Exact decimal arithmetic throughout.
///
/// A validated policy cannot overflow here; the checked arithmetic covers
/// policies built by hand.
pub fn compute_charges(pricing: &PricingPolicy, span: &DateSpan) -> Result<Charges, BookingError> {
    let nights = span.nights();
    let subtotal = pricing
        .night_price
        .checked_mul(Decimal::from(nights))
        .ok_or(BookingError::InvalidPolicy("stay price out of range"))?;
    let total = Decimal::ONE
        .checked_add(pricing.tax_rate)
        .and_then(|rate| subtotal.checked_mul(rate))
        .ok_or(BookingError::InvalidPolicy("stay price out of range"))?
        .round_dp(2);
    Ok(Charges {
        nights,
        night_price: pricing.night_price,
        subtotal,
        tax_rate: pricing.tax_rate,
        total,
    })
}
