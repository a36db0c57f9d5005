use chrono::{DateTime, Duration, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::errors::Result;
use crate::core::math::{blend, clamp_score};
use crate::storage::{codec, keys, KvStore};

/// Rolling per-address baseline.
///
/// Created lazily on first observation and never deleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBehaviorProfile {
    pub address: String,
    pub typical_amount: Decimal,
    /// Typical number of transactions in a trailing hour
    pub typical_frequency: Decimal,
    /// UTC hours seen, ascending
    pub preferred_hours: Vec<u32>,
    /// Known locations, ascending
    pub geo_pattern: Vec<String>,
    pub risk_score: Decimal,
    pub confidence_level: Decimal,
    pub transaction_count: u64,
    pub incident_count: u64,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
}

/// One transaction as seen by the profile fold
#[derive(Debug, Clone)]
pub struct Observation<'a> {
    pub amount: Decimal,
    /// Transactions in the trailing hour, current one included
    pub hourly_count: u64,
    pub location: Option<&'a str>,
    pub threat_score: Decimal,
    pub time: DateTime<Utc>,
}

impl UserBehaviorProfile {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            typical_amount: Decimal::ZERO,
            typical_frequency: Decimal::ZERO,
            preferred_hours: Vec::new(),
            geo_pattern: Vec::new(),
            risk_score: Decimal::ZERO,
            confidence_level: Decimal::ZERO,
            transaction_count: 0,
            incident_count: 0,
            first_seen: None,
            last_update: None,
        }
    }

    /// Zero for an address never observed
    pub fn account_age(&self, now: DateTime<Utc>) -> Duration {
        match self.first_seen {
            Some(first) if now > first => now - first,
            _ => Duration::zero(),
        }
    }

    pub fn knows_location(&self, location: &str) -> bool {
        self.geo_pattern.binary_search_by(|l| l.as_str().cmp(location)).is_ok()
    }

    /// Fold one transaction into the baseline.
    ///
    /// The first observation is taken as-is; later ones are blended as
    /// `old * (1 - alpha) + new * alpha`.
    pub fn fold(&mut self, obs: &Observation<'_>, alpha: Decimal, max_locations: usize) {
        let hourly = Decimal::from(obs.hourly_count);
        if self.transaction_count == 0 {
            self.typical_amount = obs.amount;
            self.typical_frequency = hourly;
            self.risk_score = clamp_score(obs.threat_score);
        } else {
            self.typical_amount = blend(self.typical_amount, obs.amount, alpha);
            self.typical_frequency = blend(self.typical_frequency, hourly, alpha);
            self.risk_score = clamp_score(blend(self.risk_score, obs.threat_score, alpha));
        }
        if self.first_seen.is_none() {
            self.first_seen = Some(obs.time);
        }

        let hour = obs.time.hour();
        if let Err(pos) = self.preferred_hours.binary_search(&hour) {
            self.preferred_hours.insert(pos, hour);
        }

        if let Some(loc) = obs.location.filter(|l| !l.is_empty()) {
            if let Err(pos) = self.geo_pattern.binary_search_by(|l| l.as_str().cmp(loc)) {
                if self.geo_pattern.len() < max_locations {
                    self.geo_pattern.insert(pos, loc.to_string());
                }
            }
        }

        self.transaction_count += 1;
        self.confidence_level =
            Decimal::from(self.transaction_count.saturating_mul(10)).min(Decimal::ONE_HUNDRED);
        self.last_update = Some(obs.time);
    }
}

/// Stored profile, or a fresh one for an unseen address
pub fn load_profile<S: KvStore + ?Sized>(store: &S, address: &str) -> Result<UserBehaviorProfile> {
    Ok(codec::load(store, &keys::behavior_profile(address))?
        .unwrap_or_else(|| UserBehaviorProfile::new(address)))
}

pub fn save_profile<S: KvStore + ?Sized>(store: &mut S, profile: &UserBehaviorProfile) -> Result<()> {
    codec::save(store, &keys::behavior_profile(&profile.address), profile)
}

pub fn all_profiles<S: KvStore + ?Sized>(store: &S) -> Result<Vec<UserBehaviorProfile>> {
    codec::scan_values(store, keys::BEHAVIOR_PROFILE.as_bytes())
}
