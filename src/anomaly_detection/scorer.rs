use tracing::debug;

use super::features::{
    amount_score, geography_score, history_score, pattern_score, velocity_score, FactorScores,
};
use super::history::TxRecord;
use super::profile::UserBehaviorProfile;
use super::{AISecurityAnalysis, ThreatLevel};
use crate::core::config::{ScoringConfig, SecurityConfig};
use crate::core::context::{BlockContext, TransactionData};
use crate::core::math::SCORE_DP;

/// Five-factor weighted threat scorer.
///
/// Pure: the result depends only on the profile, the address's prior
/// window, the transaction and the block context.
#[derive(Debug, Clone)]
pub struct AnomalyScorer {
    scoring: ScoringConfig,
    security: SecurityConfig,
}

impl AnomalyScorer {
    pub fn new(scoring: ScoringConfig, security: SecurityConfig) -> Self {
        Self { scoring, security }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.scoring
    }

    pub fn factors(
        &self,
        profile: &UserBehaviorProfile,
        prior: &[TxRecord],
        tx: &TransactionData,
        ctx: &BlockContext,
    ) -> FactorScores {
        FactorScores {
            velocity: velocity_score(prior, profile, tx.amount, ctx.time),
            pattern: pattern_score(prior, tx.amount, ctx.time, self.scoring.low_variance_threshold),
            amount: amount_score(tx.amount, profile.typical_amount),
            geography: geography_score(tx.location.as_deref(), profile, &self.scoring.known_regions),
            history: history_score(profile, ctx.time),
        }
    }

    pub fn analyze(
        &self,
        profile: &UserBehaviorProfile,
        prior: &[TxRecord],
        tx: &TransactionData,
        ctx: &BlockContext,
    ) -> AISecurityAnalysis {
        let factors = self.factors(profile, prior, tx, ctx);
        let threat_score = factors.composite(&self.scoring.weights).round_dp(SCORE_DP);
        let threat_level = ThreatLevel::classify(
            threat_score,
            self.security.alert_threshold,
            self.security.block_threshold,
        );
        let confidence_score = factors.confidence().round_dp(SCORE_DP);

        debug!(
            tx = %tx.hash,
            address = %tx.from_address,
            velocity = %factors.velocity,
            pattern = %factors.pattern,
            amount = %factors.amount,
            geography = %factors.geography,
            history = %factors.history,
            threat = %threat_score,
            level = %threat_level,
            "transaction scored"
        );

        AISecurityAnalysis {
            transaction_id: tx.hash.clone(),
            address: tx.from_address.clone(),
            height: ctx.height,
            analyzed_at: ctx.time,
            factors,
            threat_score,
            threat_level,
            confidence_score,
            recommendations: threat_level.recommendations(),
            alerts: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn scorer() -> AnomalyScorer {
        AnomalyScorer::new(ScoringConfig::default(), SecurityConfig::default())
    }

    #[test]
    fn test_first_transaction_of_new_address() {
        let ctx = BlockContext::at_unix(1, 1_700_000_000).unwrap();
        let tx = TransactionData::new("h1", "addr1", Decimal::from(1234));
        let analysis = scorer().analyze(&UserBehaviorProfile::new("addr1"), &[], &tx, &ctx);

        // geography 10 * 0.15 + history 50 * 0.15
        assert_eq!(analysis.threat_score, Decimal::from(9));
        assert_eq!(analysis.threat_level, ThreatLevel::Low);
        assert!(analysis.recommendations.is_empty());
        assert_eq!(analysis.analyzed_at, ctx.time);
    }

    #[test]
    fn test_analysis_is_deterministic() {
        let ctx = BlockContext::at_unix(5, 1_700_000_100).unwrap();
        let mut profile = UserBehaviorProfile::new("addr1");
        profile.typical_amount = Decimal::from(100);
        profile.typical_frequency = Decimal::ONE;
        let tx = TransactionData::new("h2", "addr1", Decimal::from(900)).with_location("SG");
        let a = scorer().analyze(&profile, &[], &tx, &ctx);
        let b = scorer().analyze(&profile.clone(), &[], &tx, &ctx);
        assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );
    }

    #[test]
    fn test_high_threat_recommendations() {
        let ctx = BlockContext::at_unix(9, 1_700_000_000).unwrap();
        let mut profile = UserBehaviorProfile::new("addr1");
        profile.typical_amount = Decimal::from(10);
        profile.typical_frequency = Decimal::ONE;
        profile.incident_count = 4;
        profile.risk_score = Decimal::from(80);
        let prior: Vec<TxRecord> = (0..6)
            .map(|i| TxRecord {
                hash: format!("p{}", i),
                amount: Decimal::from(500),
                height: 9,
                seq: i,
                time: ctx.time - chrono::Duration::seconds(60 - i as i64 * 10),
            })
            .collect();
        let tx = TransactionData::new("h3", "addr1", Decimal::from(500)).with_location("KP");
        let analysis = scorer().analyze(&profile, &prior, &tx, &ctx);
        assert!(analysis.threat_score >= Decimal::from(70));
        assert!(analysis.threat_level.raises_alert());
        assert!(!analysis.recommendations.is_empty());
    }
}
