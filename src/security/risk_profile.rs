use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::rules::RuleHit;
use crate::core::errors::{Result, SentinelError};
use crate::core::math::to_score_u8;
use crate::storage::{codec, keys, KvStore};

pub const FLAG_HIGH_RISK: &str = "high_risk";
pub const FLAG_CRITICAL_RISK: &str = "critical_risk";

/// Aggregated risk of one address.
///
/// Component scores are integers in `[0, 100]`; the overall score weights
/// them 40/25/20/15.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    pub address: String,
    pub risk_score: u8,
    pub velocity_score: u8,
    pub pattern_score: u8,
    pub compliance_score: u8,
    pub total_transactions: u64,
    pub total_volume: Decimal,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
    /// Sorted, unique
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Inputs folded into a risk profile after one transaction
#[derive(Debug, Clone)]
pub struct RiskObservation<'a> {
    pub threat_score: Decimal,
    pub velocity_score: Decimal,
    pub pattern_score: Decimal,
    /// Compliance type that was required, if any
    pub compliance_required: Option<&'a str>,
    pub amount: Decimal,
    pub hits: &'a [RuleHit],
    pub time: DateTime<Utc>,
}

impl RiskProfile {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            risk_score: 0,
            velocity_score: 0,
            pattern_score: 0,
            compliance_score: 0,
            total_transactions: 0,
            total_volume: Decimal::ZERO,
            last_activity: None,
            flags: Vec::new(),
            updated_at: None,
        }
    }

    pub fn overall_risk_score(&self) -> u8 {
        let weighted = 40 * u32::from(self.risk_score)
            + 25 * u32::from(self.velocity_score)
            + 20 * u32::from(self.pattern_score)
            + 15 * u32::from(self.compliance_score);
        (weighted / 100).min(100) as u8
    }

    pub fn is_high_risk(&self) -> bool {
        self.overall_risk_score() >= 70
    }

    pub fn is_critical_risk(&self) -> bool {
        self.overall_risk_score() >= 90
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.binary_search_by(|f| f.as_str().cmp(flag)).is_ok()
    }

    pub fn add_flag(&mut self, flag: &str) {
        if let Err(pos) = self.flags.binary_search_by(|f| f.as_str().cmp(flag)) {
            self.flags.insert(pos, flag.to_string());
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(SentinelError::Validation("risk profile address cannot be empty".into()));
        }
        for (name, score) in [
            ("risk_score", self.risk_score),
            ("velocity_score", self.velocity_score),
            ("pattern_score", self.pattern_score),
            ("compliance_score", self.compliance_score),
        ] {
            if score > 100 {
                return Err(SentinelError::Validation(format!(
                    "risk profile {} {} {} exceeds 100",
                    self.address, name, score
                )));
            }
        }
        if self.total_volume.is_sign_negative() {
            return Err(SentinelError::Validation(format!(
                "risk profile {} has negative volume",
                self.address
            )));
        }
        Ok(())
    }

    /// Average each component with its previous value; the first
    /// observation is taken as-is.
    pub fn fold(&mut self, obs: &RiskObservation<'_>) {
        let compliance = if obs.compliance_required.is_some() { 100 } else { 0 };
        let next = [
            to_score_u8(obs.threat_score),
            to_score_u8(obs.velocity_score),
            to_score_u8(obs.pattern_score),
            compliance,
        ];
        if self.total_transactions == 0 {
            self.risk_score = next[0];
            self.velocity_score = next[1];
            self.pattern_score = next[2];
            self.compliance_score = next[3];
        } else {
            self.risk_score = average(self.risk_score, next[0]);
            self.velocity_score = average(self.velocity_score, next[1]);
            self.pattern_score = average(self.pattern_score, next[2]);
            self.compliance_score = average(self.compliance_score, next[3]);
        }

        self.total_transactions += 1;
        self.total_volume = self.total_volume.saturating_add(obs.amount);
        self.last_activity = Some(obs.time);
        self.updated_at = Some(obs.time);

        if let Some(kind) = obs.compliance_required {
            self.add_flag(&format!("{}_required", kind));
        }
        for hit in obs.hits {
            self.add_flag(&format!("{}_rule", hit.rule_type));
        }
        if self.is_high_risk() {
            self.add_flag(FLAG_HIGH_RISK);
        }
        if self.is_critical_risk() {
            self.add_flag(FLAG_CRITICAL_RISK);
        }
    }
}

fn average(old: u8, new: u8) -> u8 {
    ((u16::from(old) + u16::from(new)) / 2) as u8
}

/// Stored profile, or a fresh one for an unseen address
pub fn load_risk_profile<S: KvStore + ?Sized>(store: &S, address: &str) -> Result<RiskProfile> {
    Ok(codec::load(store, &keys::risk_profile(address))?.unwrap_or_else(|| RiskProfile::new(address)))
}

pub fn get_risk_profile<S: KvStore + ?Sized>(store: &S, address: &str) -> Result<Option<RiskProfile>> {
    codec::load(store, &keys::risk_profile(address))
}

pub fn save_risk_profile<S: KvStore + ?Sized>(store: &mut S, profile: &RiskProfile) -> Result<()> {
    codec::save(store, &keys::risk_profile(&profile.address), profile)
}

pub fn all_risk_profiles<S: KvStore + ?Sized>(store: &S) -> Result<Vec<RiskProfile>> {
    codec::scan_values(store, keys::RISK_PROFILE.as_bytes())
}
