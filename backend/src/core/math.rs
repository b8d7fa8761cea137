//! Integer helpers for reward arithmetic.
//!
//! Rates arrive as `f64` in [0, 1] from configuration. They are converted to
//! fixed point once so that `amount × rate` is exact integer math and every
//! caller rounds the same way (toward zero).

/// Fixed-point scale used for rates (8 decimal places).
pub const RATE_PRECISION: i128 = 100_000_000;

/// Convert a rate in [0, 1] to its fixed-point representation.
pub fn rate_to_fixed(rate: f64) -> i128 {
    (rate * RATE_PRECISION as f64).round() as i128
}

/// `amount × rate`, truncated.
///
/// # Example
///
/// ```
/// use baker_payouts_core_rs::core::math::apply_rate;
///
/// assert_eq!(apply_rate(10_000_000, 0.05), 500_000);
/// assert_eq!(apply_rate(10_000_000, 1.0), 10_000_000);
/// ```
pub fn apply_rate(amount: i64, rate: f64) -> i64 {
    ((amount as i128) * rate_to_fixed(rate) / RATE_PRECISION) as i64
}

/// `amount × percentage / 100`, truncated. `percentage` is in [0, 100].
pub fn apply_percentage(amount: i64, percentage: f64) -> i64 {
    apply_rate(amount, percentage / 100.0)
}

/// `value × numerator / denominator` without intermediate overflow.
///
/// Multiplication happens before division to keep rounding loss to a single
/// truncation. Returns 0 when `denominator` is not positive.
pub fn mul_div(value: i64, numerator: i64, denominator: i64) -> i64 {
    if denominator <= 0 {
        return 0;
    }
    ((value as i128) * (numerator as i128) / (denominator as i128)) as i64
}

/// Ceiling division for non-negative operands.
pub fn ceil_div(value: i64, divisor: i64) -> i64 {
    if divisor <= 0 {
        return 0;
    }
    (value + divisor - 1) / divisor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_rate_is_exact_for_decimal_rates() {
        assert_eq!(apply_rate(10_000_000, 0.05), 500_000);
        assert_eq!(apply_rate(3, 0.1), 0);
        assert_eq!(apply_rate(1_000_000_000_000, 0.075), 75_000_000_000);
    }

    #[test]
    fn test_apply_percentage() {
        assert_eq!(apply_percentage(1_000, 25.0), 250);
        assert_eq!(apply_percentage(1_000, 100.0), 1_000);
        assert_eq!(apply_percentage(999, 50.0), 499);
    }

    #[test]
    fn test_mul_div_multiplies_first() {
        // 11000 * 500000 / 4500000 = 1222.2
        assert_eq!(mul_div(11_000, 500_000, 4_500_000), 1_222);
        // divide-then-multiply would have produced 0
        assert_eq!(mul_div(7, 3, 10), 2);
        assert_eq!(mul_div(7, 3, 0), 0);
    }

    #[test]
    fn test_mul_div_does_not_overflow() {
        let huge = i64::MAX / 2;
        assert_eq!(mul_div(huge, 4, 4), huge);
    }

    #[test]
    fn test_ceil_div() {
        assert_eq!(ceil_div(10, 10), 1);
        assert_eq!(ceil_div(11, 10), 2);
        assert_eq!(ceil_div(0, 10), 0);
    }
}
