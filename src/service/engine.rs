//! Block-driven risk engine.
//!
//! The ledger runtime drives the engine through `begin_block`, one
//! `on_transaction` per delivered transaction, `on_block_end`, and finally
//! `commit` or `rollback`. Every write goes to the block store and becomes
//! durable only on commit.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::genesis::GenesisState;
use crate::api::QueryService;
use crate::anomaly_detection::features::hourly_count;
use crate::anomaly_detection::profile::{load_profile, save_profile, Observation};
use crate::anomaly_detection::{AISecurityAnalysis, AnomalyScorer, ThreatLevel, TransactionHistory, TxRecord};
use crate::audit::{AlertLifecycle, AlertStatus, AlertType, NewAlert, SecurityAlert};
use crate::core::config::EngineConfig;
use crate::core::context::{BlockContext, TransactionData};
use crate::core::errors::{Result, SentinelError};
use crate::monitoring::metric_store::names;
use crate::monitoring::{Alert, AlertConfig, AlertEvaluator, Labels, MetricStore, SystemMetrics};
use crate::security::compliance::{self, check_compliance, ComplianceCheck, ComplianceRule, EnforcementLevel};
use crate::security::risk_profile::{load_risk_profile, save_risk_profile, RiskObservation};
use crate::security::{RuleEngine, RuleHit, RuleInput, RuleType, SecurityRule};
use crate::storage::BlockStore;

/// Result of processing one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionOutcome {
    /// Scorer output; `alerts` holds every alert raised for the transaction
    pub analysis: AISecurityAnalysis,
    pub compliance: Option<ComplianceCheck>,
    pub rule_hits: Vec<RuleHit>,
    /// Whether any check recommends rejecting the transaction
    pub blocked: bool,
}

impl TransactionOutcome {
    pub fn alert_ids(&self) -> Vec<&str> {
        self.analysis.alerts.iter().map(|a| a.id.as_str()).collect()
    }
}

#[derive(Debug, Clone)]
struct ActiveBlock {
    ctx: BlockContext,
    /// Enabled rules at block start, ascending id
    rules: Vec<SecurityRule>,
    next_tx: u64,
}

pub struct RiskEngine<S: BlockStore> {
    store: S,
    config: EngineConfig,
    metrics: MetricStore,
    scorer: AnomalyScorer,
    rules: RuleEngine,
    evaluator: AlertEvaluator,
    lifecycle: AlertLifecycle,
    history: TransactionHistory,
    block: Option<ActiveBlock>,
}

impl<S: BlockStore> RiskEngine<S> {
    pub fn new(store: S, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let history = TransactionHistory::new(
            config.scoring.history_retention_secs,
            config.scoring.max_history_per_address,
        );
        Ok(Self {
            store,
            metrics: MetricStore::new(config.metrics.clone()),
            scorer: AnomalyScorer::new(config.scoring.clone(), config.security.clone()),
            rules: RuleEngine::new(config.security.clone()).with_history_limits(
                config.scoring.history_retention_secs,
                config.scoring.max_history_per_address,
            ),
            evaluator: AlertEvaluator::new(),
            lifecycle: AlertLifecycle::new(),
            history,
            config,
            block: None,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn metric_store(&self) -> &MetricStore {
        &self.metrics
    }

    pub fn rule_engine(&self) -> &RuleEngine {
        &self.rules
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Context of the open block
    pub fn current_block(&self) -> Result<&BlockContext> {
        self.block.as_ref().map(|b| &b.ctx).ok_or(SentinelError::NoActiveBlock)
    }

    fn ctx(&self) -> Result<BlockContext> {
        self.current_block().copied()
    }

    // ---- block hooks ----

    /// Open a block: record block metrics and snapshot the active rules.
    ///
    /// Rules written during the block take effect from the next block.
    pub fn begin_block(&mut self, ctx: BlockContext) -> Result<()> {
        if let Some(open) = &self.block {
            return Err(SentinelError::InvalidArgument(format!(
                "block {} is still open",
                open.ctx.height
            )));
        }
        self.metrics.update_block_metrics(&mut self.store, &ctx)?;
        let rules = self.rules.active_rules(&self.store)?;
        debug!(height = ctx.height, rules = rules.len(), "block started");
        self.block = Some(ActiveBlock { ctx, rules, next_tx: 0 });
        Ok(())
    }

    pub fn on_transaction(&mut self, tx: &TransactionData) -> Result<TransactionOutcome> {
        let block = self.block.as_mut().ok_or(SentinelError::NoActiveBlock)?;
        tx.validate()?;
        let ctx = block.ctx;
        let seq = block.next_tx;
        block.next_tx += 1;

        let address = tx.from_address.as_str();
        self.metrics
            .record_transaction(&mut self.store, &tx.module, tx.success, tx.latency_ms)?;

        let profile = load_profile(&self.store, address)?;
        let prior = self.history.load(&self.store, address)?;
        let mut analysis = self.scorer.analyze(&profile, &prior, tx, &ctx);

        let compliance = if self.config.security.enable_compliance_check {
            check_compliance(&self.store, tx)?
        } else {
            None
        };

        let snapshot: &[SecurityRule] = self.block.as_ref().map(|b| b.rules.as_slice()).unwrap_or(&[]);
        let rule_hits = self.rules.evaluate_all(
            snapshot,
            &RuleInput {
                tx,
                prior: &prior,
                ctx: &ctx,
                pattern_score: analysis.factors.pattern,
                compliance: compliance.as_ref(),
            },
        );

        let mut alert_ids = Vec::new();
        if analysis.threat_level.raises_alert() {
            alert_ids.push(self.lifecycle.create_alert(&mut self.store, &ctx, threat_alert(&analysis, tx))?);
        }
        let mut compliance_alerted = false;
        if let Some(check) = compliance.as_ref().filter(|c| c.required) {
            if check.blocks() {
                self.metrics
                    .record_compliance_block(&mut self.store, check.rule.compliance_type.as_str())?;
            }
            if check.rule.enforcement_level != EnforcementLevel::Warning {
                alert_ids.push(self.lifecycle.create_alert(&mut self.store, &ctx, compliance_alert(check, tx))?);
                compliance_alerted = true;
            }
        }
        // one alert per compliance event
        let alerting = rule_hits
            .iter()
            .filter(|h| h.alert && !(compliance_alerted && h.rule_type == RuleType::Compliance));
        for hit in alerting {
            info!(rule = %hit.rule_id, tx = %tx.hash, reason = %hit.reason, "security rule triggered");
            alert_ids.push(self.lifecycle.create_alert(&mut self.store, &ctx, rule_alert(hit, tx))?);
        }
        for id in &alert_ids {
            analysis.alerts.push(self.lifecycle.get_alert(&self.store, id)?);
        }

        // Reloaded: alert creation bumps the incident count
        let mut profile = load_profile(&self.store, address)?;
        profile.fold(
            &Observation {
                amount: tx.amount,
                hourly_count: hourly_count(&prior, ctx.time),
                location: tx.location.as_deref(),
                threat_score: analysis.threat_score,
                time: ctx.time,
            },
            self.config.scoring.profile_alpha,
            self.config.scoring.max_known_locations,
        );
        save_profile(&mut self.store, &profile)?;

        self.history.append(
            &mut self.store,
            address,
            &TxRecord {
                hash: tx.hash.clone(),
                amount: tx.amount,
                height: ctx.height,
                seq,
                time: ctx.time,
            },
        )?;

        let required = compliance
            .as_ref()
            .filter(|c| c.required)
            .map(|c| c.rule.compliance_type.as_str());
        let mut risk = load_risk_profile(&self.store, address)?;
        risk.fold(&RiskObservation {
            threat_score: analysis.threat_score,
            velocity_score: analysis.factors.velocity,
            pattern_score: analysis.factors.pattern,
            compliance_required: required,
            amount: tx.amount,
            hits: &rule_hits,
            time: ctx.time,
        });
        save_risk_profile(&mut self.store, &risk)?;

        self.metrics.observe_histogram(
            &mut self.store,
            names::TRANSACTION_AMOUNT,
            &Labels::new().with("module", tx.module.as_str()),
            tx.amount,
        )?;

        let blocked = analysis.threat_level.should_block()
            || rule_hits.iter().any(|h| h.block)
            || compliance.as_ref().is_some_and(|c| c.blocks());
        if blocked {
            warn!(tx = %tx.hash, address, threat = %analysis.threat_score, "transaction flagged for blocking");
        }

        Ok(TransactionOutcome { analysis, compliance, rule_hits, blocked })
    }

    /// Evaluate alert configs against the block's metrics and persist the hits
    pub fn on_block_end(&mut self) -> Result<Vec<Alert>> {
        let ctx = self.ctx()?;
        let snapshot = self.metrics.system_metrics(&self.store)?;
        let alerts = self.evaluator.check_alerts(&self.store, &snapshot, &ctx)?;
        for alert in &alerts {
            self.evaluator.persist_alert(&mut self.store, alert)?;
        }
        debug!(height = ctx.height, alerts = alerts.len(), "block ended");
        Ok(alerts)
    }

    pub fn commit(&mut self) -> Result<()> {
        self.store.commit()?;
        if let Some(block) = self.block.take() {
            debug!(height = block.ctx.height, "block committed");
        }
        Ok(())
    }

    pub fn rollback(&mut self) {
        self.store.rollback();
        if let Some(block) = self.block.take() {
            warn!(height = block.ctx.height, "block rolled back");
        }
    }

    /// Hex SHA-256 over every stored entry in key order
    pub fn state_hash(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        for (key, value) in self.store.iter_prefix(b"")? {
            hasher.update((key.len() as u64).to_be_bytes());
            hasher.update(&key);
            hasher.update((value.len() as u64).to_be_bytes());
            hasher.update(&value);
        }
        Ok(hex::encode(hasher.finalize()))
    }

    // ---- writes made inside a block ----

    /// Run a metric recorder against the open block
    pub fn record<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&MetricStore, &mut S, &BlockContext) -> Result<T>,
    {
        let ctx = self.ctx()?;
        f(&self.metrics, &mut self.store, &ctx)
    }

    pub fn set_alert_config(&mut self, config: &AlertConfig) -> Result<()> {
        self.ctx()?;
        self.evaluator.set_alert_config(&mut self.store, config)
    }

    pub fn remove_alert_config(&mut self, name: &str) -> Result<()> {
        self.ctx()?;
        self.evaluator.remove_alert_config(&mut self.store, name)
    }

    pub fn add_security_rule(&mut self, rule: &SecurityRule) -> Result<()> {
        let ctx = self.ctx()?;
        self.rules.add_rule(&mut self.store, rule, &ctx)
    }

    pub fn update_security_rule(&mut self, rule: &SecurityRule) -> Result<()> {
        let ctx = self.ctx()?;
        self.rules.update_rule(&mut self.store, rule, &ctx)
    }

    pub fn remove_security_rule(&mut self, id: &str) -> Result<()> {
        self.ctx()?;
        self.rules.remove_rule(&mut self.store, id)
    }

    pub fn set_compliance_rule(&mut self, rule: &ComplianceRule) -> Result<()> {
        let ctx = self.ctx()?;
        compliance::set_compliance_rule(&mut self.store, rule, &ctx)
    }

    pub fn remove_compliance_rule(&mut self, id: &str) -> Result<()> {
        self.ctx()?;
        compliance::remove_compliance_rule(&mut self.store, id)
    }

    pub fn update_alert_status(&mut self, id: &str, status: AlertStatus) -> Result<SecurityAlert> {
        let ctx = self.ctx()?;
        self.lifecycle.update_alert_status(&mut self.store, &ctx, id, status)
    }

    // ---- reads ----

    pub fn system_metrics(&self) -> Result<SystemMetrics> {
        self.metrics.system_metrics(&self.store)
    }

    pub fn queries(&self) -> QueryService<'_, S> {
        QueryService::new(&self.store, &self.metrics)
    }

    pub fn security_alert(&self, id: &str) -> Result<SecurityAlert> {
        self.lifecycle.get_alert(&self.store, id)
    }

    pub fn security_alerts(&self) -> Result<Vec<SecurityAlert>> {
        self.lifecycle.all_alerts(&self.store)
    }

    // ---- genesis ----

    /// Load a snapshot into the pending state; the caller commits
    pub fn init_genesis(&mut self, genesis: &GenesisState) -> Result<()> {
        if self.block.is_some() {
            return Err(SentinelError::InvalidArgument("genesis import inside an open block".into()));
        }
        for rule in &genesis.security_rules {
            self.rules.validate_rule(rule)?;
        }
        genesis.import(&mut self.store, &self.metrics)
    }

    pub fn export_genesis(&self) -> Result<GenesisState> {
        GenesisState::export(&self.store, &self.metrics)
    }
}

fn threat_alert(analysis: &AISecurityAnalysis, tx: &TransactionData) -> NewAlert {
    let (alert_type, severity) = match analysis.threat_level {
        ThreatLevel::Critical => (AlertType::HighRisk, 4),
        _ => (AlertType::UnusualActivity, 3),
    };
    NewAlert::new(analysis.threat_level.as_str(), alert_type, severity)
        .titled(
            format!("{} threat score", analysis.threat_level),
            format!(
                "threat score {} (confidence {})",
                analysis.threat_score, analysis.confidence_score
            ),
        )
        .for_transaction(tx.hash.as_str(), tx.from_address.as_str(), tx.amount)
        .with_data("velocity", analysis.factors.velocity)
        .with_data("pattern", analysis.factors.pattern)
        .with_data("amount", analysis.factors.amount)
        .with_data("geography", analysis.factors.geography)
        .with_data("history", analysis.factors.history)
}

fn compliance_alert(check: &ComplianceCheck, tx: &TransactionData) -> NewAlert {
    let severity = match check.rule.enforcement_level {
        EnforcementLevel::Block => 3,
        _ => 2,
    };
    NewAlert::new(check.rule.id.as_str(), AlertType::Compliance, severity)
        .titled(
            format!("{} required", check.rule.compliance_type.as_str().to_uppercase()),
            format!("amount {} above {} in {}", tx.amount, check.rule.threshold, check.rule.jurisdiction),
        )
        .for_transaction(tx.hash.as_str(), tx.from_address.as_str(), tx.amount)
}

fn rule_alert(hit: &RuleHit, tx: &TransactionData) -> NewAlert {
    let alert_type = match hit.rule_type {
        RuleType::Velocity => AlertType::Velocity,
        RuleType::Pattern => AlertType::Pattern,
        RuleType::Fraud => AlertType::Fraud,
        RuleType::Compliance => AlertType::Compliance,
    };
    NewAlert::new(hit.rule_id.as_str(), alert_type, hit.severity)
        .titled(format!("{} rule {}", hit.rule_type, hit.rule_id), hit.reason.as_str())
        .for_transaction(tx.hash.as_str(), tx.from_address.as_str(), tx.amount)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{KvStore, MemoryStore};
    use rust_decimal::Decimal;

    fn engine() -> RiskEngine<MemoryStore> {
        RiskEngine::new(MemoryStore::new(), EngineConfig::default()).unwrap()
    }

    fn block(height: i64) -> BlockContext {
        BlockContext::at_unix(height, 1_700_000_000 + height * 6).unwrap()
    }

    #[test]
    fn test_hooks_need_open_block() {
        let mut engine = engine();
        let tx = TransactionData::new("h", "a", Decimal::from(10));
        assert!(matches!(engine.on_transaction(&tx), Err(SentinelError::NoActiveBlock)));
        assert!(matches!(engine.on_block_end(), Err(SentinelError::NoActiveBlock)));
    }

    #[test]
    fn test_double_begin_rejected() {
        let mut engine = engine();
        engine.begin_block(block(1)).unwrap();
        assert!(engine.begin_block(block(2)).is_err());
    }

    #[test]
    fn test_transaction_updates_state() {
        let mut engine = engine();
        engine.begin_block(block(1)).unwrap();
        let tx = TransactionData::new("h1", "addr1", Decimal::from(1234));
        let outcome = engine.on_transaction(&tx).unwrap();
        assert_eq!(outcome.analysis.threat_level, ThreatLevel::Low);
        assert!(!outcome.blocked);
        engine.commit().unwrap();

        let metrics = engine.system_metrics().unwrap();
        assert_eq!(metrics.transactions_total, 1);
        assert_eq!(metrics.last_block_height, 1);
        let profile = load_profile(engine.store(), "addr1").unwrap();
        assert_eq!(profile.transaction_count, 1);
        assert_eq!(profile.typical_amount, Decimal::from(1234));
    }

    #[test]
    fn test_rollback_discards_block() {
        let mut engine = engine();
        engine.begin_block(block(1)).unwrap();
        engine.on_transaction(&TransactionData::new("h1", "addr1", Decimal::from(5))).unwrap();
        engine.rollback();
        assert!(engine.store().iter_prefix(b"").unwrap().is_empty());
        assert!(engine.current_block().is_err());
    }

    #[test]
    fn test_invalid_transaction_rejected() {
        let mut engine = engine();
        engine.begin_block(block(1)).unwrap();
        let err = engine.on_transaction(&TransactionData::new("", "addr1", Decimal::ONE)).unwrap_err();
        assert!(err.is_recoverable());
    }
}
