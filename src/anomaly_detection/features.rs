//! The five factor scores. All results are clamped to `[0, 100]`.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::history::{within, TxRecord};
use super::profile::UserBehaviorProfile;
use crate::core::config::FactorWeights;
use crate::core::math::{clamp_score, ratio, sample_variance};

pub const PATTERN_WINDOW_SECS: i64 = 600;
const BURST_COUNT: usize = 5;
const ROUND_UNIT: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FactorScores {
    pub velocity: Decimal,
    pub pattern: Decimal,
    pub amount: Decimal,
    pub geography: Decimal,
    pub history: Decimal,
}

impl FactorScores {
    pub fn as_array(&self) -> [Decimal; 5] {
        [self.velocity, self.pattern, self.amount, self.geography, self.history]
    }

    /// Weighted sum, clamped
    pub fn composite(&self, w: &FactorWeights) -> Decimal {
        clamp_score(
            self.velocity * w.velocity
                + self.pattern * w.pattern
                + self.amount * w.amount
                + self.geography * w.geography
                + self.history * w.history,
        )
    }

    /// Agreement between factors: `100 - 10 * variance`, clamped
    pub fn confidence(&self) -> Decimal {
        let variance = sample_variance(&self.as_array());
        clamp_score(Decimal::ONE_HUNDRED - variance * Decimal::TEN)
    }
}

/// Step table for the hourly frequency ratio
pub fn frequency_step(ratio: Decimal) -> Decimal {
    if ratio > Decimal::from(3) {
        Decimal::ONE_HUNDRED
    } else if ratio > Decimal::TWO {
        Decimal::from(70)
    } else if ratio > Decimal::new(15, 1) {
        Decimal::from(40)
    } else {
        Decimal::ZERO
    }
}

/// Step table for the daily volume ratio
pub fn amount_step(ratio: Decimal) -> Decimal {
    if ratio > Decimal::from(5) {
        Decimal::ONE_HUNDRED
    } else if ratio > Decimal::from(3) {
        Decimal::from(70)
    } else if ratio > Decimal::TWO {
        Decimal::from(40)
    } else {
        Decimal::ZERO
    }
}

/// Hourly count of `prior` plus the current transaction
pub fn hourly_count(prior: &[TxRecord], now: DateTime<Utc>) -> u64 {
    within(prior, now, Duration::hours(1)).len() as u64 + 1
}

/// Velocity against the profile baseline.
///
/// Needs at least two prior transactions inside 24 hours.
pub fn velocity_score(
    prior: &[TxRecord],
    profile: &UserBehaviorProfile,
    amount: Decimal,
    now: DateTime<Utc>,
) -> Decimal {
    let day = within(prior, now, Duration::hours(24));
    if day.len() < 2 {
        return Decimal::ZERO;
    }
    let hour_count = Decimal::from(hourly_count(prior, now));
    let day_amount = day.iter().fold(amount, |acc, r| acc.saturating_add(r.amount));

    let freq = ratio(hour_count, profile.typical_frequency)
        .map(frequency_step)
        .unwrap_or(Decimal::ZERO);
    let volume = ratio(day_amount, profile.typical_amount)
        .map(amount_step)
        .unwrap_or(Decimal::ZERO);

    clamp_score(freq * Decimal::new(6, 1) + volume * Decimal::new(4, 1))
}

pub fn is_round_amount(amount: Decimal) -> bool {
    amount.fract().is_zero() && (amount % Decimal::from(ROUND_UNIT)).is_zero()
}

/// `(time, amount)` of the trailing pattern window, current transaction last
pub fn pattern_window(prior: &[TxRecord], amount: Decimal, now: DateTime<Utc>) -> Vec<(DateTime<Utc>, Decimal)> {
    let mut window: Vec<(DateTime<Utc>, Decimal)> = within(prior, now, Duration::seconds(PATTERN_WINDOW_SECS))
        .into_iter()
        .map(|r| (r.time, r.amount))
        .collect();
    window.push((now, amount));
    window
}

/// At least 70% of three or more transactions share the first amount
pub fn has_identical_amounts(window: &[(DateTime<Utc>, Decimal)]) -> bool {
    if window.len() < 3 {
        return false;
    }
    let first = window[0].1;
    let same = window.iter().filter(|(_, a)| *a == first).count();
    same * 10 >= window.len() * 7
}

/// Interval variance of three or more transactions is below `threshold`
pub fn has_regular_timing(window: &[(DateTime<Utc>, Decimal)], threshold: Decimal) -> bool {
    if window.len() < 3 {
        return false;
    }
    let intervals: Vec<Decimal> = window
        .windows(2)
        .map(|w| Decimal::from((w[1].0 - w[0].0).num_seconds()))
        .collect();
    sample_variance(&intervals) < threshold
}

/// Pattern heuristics over the trailing ten minutes
pub fn pattern_score(
    prior: &[TxRecord],
    amount: Decimal,
    now: DateTime<Utc>,
    low_variance_threshold: Decimal,
) -> Decimal {
    let window = pattern_window(prior, amount, now);
    let mut score = Decimal::ZERO;
    if is_round_amount(amount) {
        score += Decimal::from(20);
    }
    if window.len() > BURST_COUNT {
        score += Decimal::from(30);
    }
    if has_identical_amounts(&window) {
        score += Decimal::from(25);
    }
    if has_regular_timing(&window, low_variance_threshold) {
        score += Decimal::from(25);
    }
    clamp_score(score)
}

/// `min(100, 50 * |amount - typical| / typical)`; zero without history
pub fn amount_score(amount: Decimal, typical: Decimal) -> Decimal {
    match ratio((amount - typical).abs(), typical) {
        Some(dev) => clamp_score(dev.saturating_mul(Decimal::from(50))),
        None => Decimal::ZERO,
    }
}

/// Location against the profile's known set.
///
/// Unknown or unresolvable location 10, known 0, new 40. When
/// `known_regions` is non-empty, codes outside it are unresolvable.
pub fn geography_score(
    location: Option<&str>,
    profile: &UserBehaviorProfile,
    known_regions: &[String],
) -> Decimal {
    let loc = match location.map(str::trim).filter(|l| !l.is_empty()) {
        Some(l) => l,
        None => return Decimal::TEN,
    };
    if profile.knows_location(loc) {
        return Decimal::ZERO;
    }
    if !known_regions.is_empty() && !known_regions.iter().any(|r| r == loc) {
        return Decimal::TEN;
    }
    Decimal::from(40)
}

/// Prior risk plus account-age and incident surcharges
pub fn history_score(profile: &UserBehaviorProfile, now: DateTime<Utc>) -> Decimal {
    let mut score = profile.risk_score;
    let age = profile.account_age(now);
    if age < Duration::days(1) {
        score += Decimal::from(50);
    } else if age < Duration::days(7) {
        score += Decimal::from(20);
    }
    score += Decimal::from(profile.incident_count.min(100)) * Decimal::from(15);
    clamp_score(score)
}
