//! Minor/major currency unit conversion
//!
//! The provider reports every amount in minor units (cents). Amounts are stored
//! as exact decimals in major units, so conversion never goes through floats.

use rust_decimal::Decimal;

/// Scale of the two-decimal currencies we bill in.
const MINOR_UNIT_SCALE: u32 = 2;

/// Convert a provider amount in minor units to an exact major-unit decimal.
///
/// `12000` becomes `120.00`.
pub fn minor_to_major(minor: i64) -> Decimal {
    Decimal::new(minor, MINOR_UNIT_SCALE)
}

/// Convert a major-unit amount back to minor units.
///
/// Returns `None` when the amount carries sub-cent precision or overflows.
pub fn major_to_minor(major: Decimal) -> Option<i64> {
    let scaled = major.checked_mul(Decimal::ONE_HUNDRED)?;
    if scaled.fract() != Decimal::ZERO {
        return None;
    }
    i64::try_from(scaled).ok()
}
