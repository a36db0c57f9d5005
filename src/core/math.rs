//! Decimal helpers shared by the scorers.
//!
//! Everything persisted or compared against a threshold goes through
//! `Decimal`, never binary floating point.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Scale used when rounding stored scores
pub const SCORE_DP: u32 = 4;

pub fn hundred() -> Decimal {
    Decimal::ONE_HUNDRED
}

/// Clamp into `[lo, hi]`
pub fn clamp(value: Decimal, lo: Decimal, hi: Decimal) -> Decimal {
    value.max(lo).min(hi)
}

/// Clamp into the score range `[0, 100]`
pub fn clamp_score(value: Decimal) -> Decimal {
    clamp(value, Decimal::ZERO, hundred())
}

/// Sample variance (n - 1 denominator); 0 for fewer than two values
pub fn sample_variance(values: &[Decimal]) -> Decimal {
    if values.len() <= 1 {
        return Decimal::ZERO;
    }
    let n = Decimal::from(values.len() as u64);
    let mean = values.iter().copied().sum::<Decimal>() / n;
    let sum_sq: Decimal = values
        .iter()
        .map(|v| {
            let diff = *v - mean;
            diff * diff
        })
        .sum();
    sum_sq / (n - Decimal::ONE)
}

/// `part / whole`, or `None` when `whole` is zero
pub fn ratio(part: Decimal, whole: Decimal) -> Option<Decimal> {
    if whole.is_zero() {
        None
    } else {
        part.checked_div(whole)
    }
}

/// Round a score for storage in integer profile fields
pub fn to_score_u8(value: Decimal) -> u8 {
    clamp_score(value).round().to_u8().unwrap_or(100)
}

/// Exponential blend `old * (1 - alpha) + new * alpha`
pub fn blend(old: Decimal, new: Decimal, alpha: Decimal) -> Decimal {
    (old * (Decimal::ONE - alpha) + new * alpha).round_dp(SCORE_DP * 2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(Decimal::from(150)), Decimal::from(100));
        assert_eq!(clamp_score(Decimal::from(-3)), Decimal::ZERO);
        assert_eq!(clamp_score(Decimal::new(425, 1)), Decimal::new(425, 1));
    }

    #[test]
    fn test_sample_variance() {
        assert_eq!(sample_variance(&[]), Decimal::ZERO);
        assert_eq!(sample_variance(&[Decimal::from(5)]), Decimal::ZERO);
        let values = [2, 4, 4, 4, 5, 5, 7, 9].map(Decimal::from);
        // mean 5, sum of squares 32, n-1 = 7
        assert_eq!(sample_variance(&values), Decimal::from(32) / Decimal::from(7));
    }

    #[test]
    fn test_ratio_and_blend() {
        assert_eq!(ratio(Decimal::ONE, Decimal::ZERO), None);
        assert_eq!(ratio(Decimal::from(3), Decimal::from(2)), Some(Decimal::new(15, 1)));
        assert_eq!(blend(Decimal::from(100), Decimal::ZERO, Decimal::new(2, 1)), Decimal::from(80));
        assert_eq!(to_score_u8(Decimal::new(4449, 2)), 44);
    }
}
