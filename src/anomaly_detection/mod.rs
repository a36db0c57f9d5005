//! Behavioral threat scoring
//!
//! Each sender address carries a [`UserBehaviorProfile`] and a short window
//! of its recent transactions. Five factor scores are computed against that
//! baseline and combined into one weighted threat score.
//!
//! ## Factors
//! - velocity: hourly count and daily volume against the profile
//! - pattern: round amounts, bursts, repeated amounts, regular timing
//! - amount: deviation from the typical amount
//! - geography: location against the profile's known set
//! - history: prior risk, account age, prior incidents

pub mod features;
pub mod history;
pub mod profile;
pub mod scorer;

pub use features::FactorScores;
pub use history::{TransactionHistory, TxRecord};
pub use profile::UserBehaviorProfile;
pub use scorer::AnomalyScorer;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::audit::SecurityAlert;

/// Threat level derived from the composite score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    /// Fixed bands: 90 critical, 70 high, 40 medium
    pub fn from_score(score: Decimal) -> Self {
        Self::classify(score, Decimal::from(70), Decimal::from(90))
    }

    /// Bands with configurable high and critical cut-offs
    pub fn classify(score: Decimal, alert_threshold: Decimal, block_threshold: Decimal) -> Self {
        if score >= block_threshold {
            Self::Critical
        } else if score >= alert_threshold {
            Self::High
        } else if score >= Decimal::from(40) {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// High and critical scores materialize as security alerts
    pub fn raises_alert(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }

    pub fn should_block(&self) -> bool {
        matches!(self, Self::Critical)
    }

    pub fn recommendations(&self) -> Vec<Recommendation> {
        match self {
            Self::Critical => vec![
                Recommendation::BlockTransaction,
                Recommendation::ImmediateReview,
                Recommendation::FreezeAccount,
            ],
            Self::High => vec![
                Recommendation::RequireAdditionalAuth,
                Recommendation::ManualReview,
            ],
            Self::Medium => vec![
                Recommendation::EnhancedMonitoring,
                Recommendation::ReviewWithin24h,
            ],
            Self::Low => Vec::new(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    BlockTransaction,
    ImmediateReview,
    FreezeAccount,
    RequireAdditionalAuth,
    ManualReview,
    EnhancedMonitoring,
    #[serde(rename = "REVIEW_WITHIN_24H")]
    ReviewWithin24h,
}

/// Result of scoring one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AISecurityAnalysis {
    pub transaction_id: String,
    pub address: String,
    pub height: i64,
    pub analyzed_at: DateTime<Utc>,
    pub factors: FactorScores,
    pub threat_score: Decimal,
    pub threat_level: ThreatLevel,
    pub confidence_score: Decimal,
    pub recommendations: Vec<Recommendation>,
    /// Alerts raised for this transaction, filled in by the engine
    #[serde(default)]
    pub alerts: Vec<SecurityAlert>,
}
