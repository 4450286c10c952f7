//! Fixed-point price/size/notional types.
//!
//! Every price, contract quantity, and USD notional that crosses a component
//! boundary is a `Decimal`. Floats are reserved for statistics that are
//! explicitly approximate (confidence scores, percentile summaries).

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// A market price in [0, 1].
pub type Price = Decimal;
/// A contract quantity.
pub type Qty = Decimal;
/// A USD (or USDC) notional amount.
pub type Usd = Decimal;

pub const ZERO: Decimal = dec!(0);
pub const ONE: Decimal = dec!(1);

/// `10_000 * |a - reference| / reference`, floored to an integer bps count.
/// Returns 0 when `reference` is zero or non-positive, matching the original
/// plumbing's "never divide by zero" rule.
pub fn slippage_bps(executable: Price, reference: Price) -> i64 {
    if reference <= ZERO || executable <= ZERO {
        return 0;
    }
    let diff = (executable - reference).abs();
    let ratio = diff / reference * Decimal::from(10_000);
    ratio.trunc().try_into().unwrap_or(i64::MAX)
}

/// `Decimal -> f64` for statistics that are explicitly approximate
/// (optimizer line search, liquidity ratios). Round-trips through string
/// formatting rather than a numeric trait impl so it never depends on a
/// particular `rust_decimal` feature flag being enabled.
pub fn to_f64(d: Decimal) -> f64 {
    d.to_string().parse().unwrap_or(0.0)
}

/// `f64 -> Decimal`, truncated to 8 fractional digits. The inverse of
/// [`to_f64`]; used only where an approximate float result needs to re-enter
/// the fixed-point domain (e.g. optimizer output).
pub fn from_f64(f: f64) -> Decimal {
    format!("{:.8}", f.max(0.0)).parse().unwrap_or(ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn slippage_zero_reference() {
        assert_eq!(slippage_bps(dec!(0.5), dec!(0)), 0);
    }

    #[test]
    fn slippage_basic() {
        // 0.51 vs 0.50 reference -> 200 bps
        assert_eq!(slippage_bps(dec!(0.51), dec!(0.50)), 200);
    }
}
