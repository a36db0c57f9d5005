//! Security rules and their per-transaction evaluation.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

use super::compliance::ComplianceCheck;
use crate::anomaly_detection::history::{within, TxRecord};
use crate::core::config::{ScoringConfig, SecurityConfig};
use crate::core::context::{BlockContext, TransactionData};
use crate::core::errors::{Result, SentinelError};
use crate::storage::{codec, keys, KvStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    Velocity,
    Pattern,
    Fraud,
    Compliance,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Velocity => "velocity",
            Self::Pattern => "pattern",
            Self::Fraud => "fraud",
            Self::Compliance => "compliance",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed rule conditions. Which fields are required depends on the rule type.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RuleConditions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window_secs: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_transactions: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_amount: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_threshold: Option<Decimal>,
    /// Sender scope; empty means every address
    #[serde(default)]
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleActions {
    #[serde(default = "RuleActions::default_alert")]
    pub alert: bool,
    #[serde(default)]
    pub block: bool,
}

impl RuleActions {
    fn default_alert() -> bool {
        true
    }
}

impl Default for RuleActions {
    fn default() -> Self {
        Self { alert: true, block: false }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityRule {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub enabled: bool,
    #[serde(default)]
    pub conditions: RuleConditions,
    #[serde(default)]
    pub actions: RuleActions,
    /// 1 (low) to 4 (critical)
    pub severity: u8,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl SecurityRule {
    pub fn new(id: impl Into<String>, name: impl Into<String>, rule_type: RuleType, severity: u8) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            rule_type,
            enabled: true,
            conditions: RuleConditions::default(),
            actions: RuleActions::default(),
            severity,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_conditions(mut self, conditions: RuleConditions) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_actions(mut self, actions: RuleActions) -> Self {
        self.actions = actions;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(SentinelError::Validation("rule id cannot be empty".into()));
        }
        if !(1..=4).contains(&self.severity) {
            return Err(SentinelError::Validation(format!(
                "rule {} severity {} must be between 1 and 4",
                self.id, self.severity
            )));
        }
        let c = &self.conditions;
        match self.rule_type {
            RuleType::Velocity => {
                match c.time_window_secs {
                    Some(w) if w > 0 => {}
                    _ => {
                        return Err(SentinelError::Validation(format!(
                            "velocity rule {} needs a positive time_window_secs",
                            self.id
                        )))
                    }
                }
                if c.max_transactions.is_none() && c.max_amount.is_none() {
                    return Err(SentinelError::Validation(format!(
                        "velocity rule {} needs max_transactions or max_amount",
                        self.id
                    )));
                }
                if c.max_amount.is_some_and(|a| a.is_sign_negative()) {
                    return Err(SentinelError::Validation(format!(
                        "velocity rule {} max_amount cannot be negative",
                        self.id
                    )));
                }
            }
            RuleType::Pattern | RuleType::Fraud => match c.risk_threshold {
                Some(t) if t >= Decimal::ZERO && t <= Decimal::ONE_HUNDRED => {}
                _ => {
                    return Err(SentinelError::Validation(format!(
                        "{} rule {} needs risk_threshold within [0, 100]",
                        self.rule_type, self.id
                    )))
                }
            },
            RuleType::Compliance => {}
        }
        Ok(())
    }

    pub fn applies_to(&self, address: &str) -> bool {
        self.conditions.addresses.is_empty() || self.conditions.addresses.iter().any(|a| a == address)
    }

    /// Rules seeded by the default genesis
    pub fn defaults() -> Vec<SecurityRule> {
        vec![
            SecurityRule::new("fraud-001", "High risk transaction", RuleType::Fraud, 4)
                .with_conditions(RuleConditions {
                    risk_threshold: Some(Decimal::from(80)),
                    ..Default::default()
                })
                .with_actions(RuleActions { alert: true, block: true }),
            SecurityRule::new("velocity-001", "Transaction velocity", RuleType::Velocity, 3)
                .with_conditions(RuleConditions {
                    time_window_secs: Some(3600),
                    max_transactions: Some(100),
                    max_amount: Some(Decimal::from(1_000_000)),
                    ..Default::default()
                }),
        ]
    }
}

/// What a rule sees for one transaction
#[derive(Debug, Clone, Copy)]
pub struct RuleInput<'a> {
    pub tx: &'a TransactionData,
    /// The sender's earlier transactions, oldest first
    pub prior: &'a [TxRecord],
    pub ctx: &'a BlockContext,
    pub pattern_score: Decimal,
    pub compliance: Option<&'a ComplianceCheck>,
}

/// A triggered rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleHit {
    pub rule_id: String,
    pub rule_type: RuleType,
    pub severity: u8,
    pub reason: String,
    pub alert: bool,
    pub block: bool,
}

/// Stores security rules and dispatches them by type
#[derive(Debug, Clone)]
pub struct RuleEngine {
    switches: SecurityConfig,
    /// How far back per-address history reaches
    retention_secs: i64,
    max_history: usize,
}

impl RuleEngine {
    pub fn new(switches: SecurityConfig) -> Self {
        let scoring = ScoringConfig::default();
        Self {
            switches,
            retention_secs: scoring.history_retention_secs,
            max_history: scoring.max_history_per_address,
        }
    }

    /// Bound velocity rules by the history the engine keeps
    pub fn with_history_limits(mut self, retention_secs: i64, max_history: usize) -> Self {
        self.retention_secs = retention_secs;
        self.max_history = max_history;
        self
    }

    /// Field checks plus the history bounds: a velocity window must fit in
    /// the retention and its count limit must be reachable under the cap.
    pub fn validate_rule(&self, rule: &SecurityRule) -> Result<()> {
        rule.validate()?;
        if rule.rule_type != RuleType::Velocity {
            return Ok(());
        }
        if let Some(window) = rule.conditions.time_window_secs.filter(|w| *w > self.retention_secs) {
            return Err(SentinelError::Validation(format!(
                "velocity rule {} window {}s exceeds history retention {}s",
                rule.id, window, self.retention_secs
            )));
        }
        if let Some(max) = rule.conditions.max_transactions.filter(|m| *m > self.max_history as u64) {
            return Err(SentinelError::Validation(format!(
                "velocity rule {} max_transactions {} exceeds the {} transactions kept per address",
                rule.id, max, self.max_history
            )));
        }
        Ok(())
    }

    /// Whether the module switch for `rule_type` is on
    pub fn type_enabled(&self, rule_type: RuleType) -> bool {
        match rule_type {
            RuleType::Velocity => self.switches.enable_velocity_monitoring,
            RuleType::Pattern | RuleType::Fraud => self.switches.enable_fraud_detection,
            RuleType::Compliance => self.switches.enable_compliance_check,
        }
    }

    pub fn get_rule<S: KvStore + ?Sized>(&self, store: &S, id: &str) -> Result<Option<SecurityRule>> {
        codec::load(store, &keys::security_rule(id))
    }

    /// Rejects an id that already exists
    pub fn add_rule<S: KvStore + ?Sized>(&self, store: &mut S, rule: &SecurityRule, ctx: &BlockContext) -> Result<()> {
        self.validate_rule(rule)?;
        let key = keys::security_rule(&rule.id);
        if store.has(&key)? {
            return Err(SentinelError::Validation(format!("rule {} already exists", rule.id)));
        }
        let mut rule = rule.clone();
        rule.created_at = Some(ctx.time);
        rule.updated_at = Some(ctx.time);
        info!(rule = %rule.id, kind = %rule.rule_type, "security rule added");
        codec::save(store, &key, &rule)
    }

    pub fn update_rule<S: KvStore + ?Sized>(&self, store: &mut S, rule: &SecurityRule, ctx: &BlockContext) -> Result<()> {
        self.validate_rule(rule)?;
        let existing = self
            .get_rule(store, &rule.id)?
            .ok_or_else(|| SentinelError::NotFound(format!("rule {}", rule.id)))?;
        let mut rule = rule.clone();
        rule.created_at = existing.created_at;
        rule.updated_at = Some(ctx.time);
        codec::save(store, &keys::security_rule(&rule.id), &rule)
    }

    pub fn remove_rule<S: KvStore + ?Sized>(&self, store: &mut S, id: &str) -> Result<()> {
        let key = keys::security_rule(id);
        if !store.has(&key)? {
            return Err(SentinelError::NotFound(format!("rule {}", id)));
        }
        store.delete(&key)
    }

    /// Every stored rule in ascending id order
    pub fn all_rules<S: KvStore + ?Sized>(&self, store: &S) -> Result<Vec<SecurityRule>> {
        codec::scan_values(store, keys::SECURITY_RULE.as_bytes())
    }

    /// Enabled rules whose type switch is on, ascending id
    pub fn active_rules<S: KvStore + ?Sized>(&self, store: &S) -> Result<Vec<SecurityRule>> {
        Ok(self
            .all_rules(store)?
            .into_iter()
            .filter(|r| r.enabled && self.type_enabled(r.rule_type))
            .collect())
    }

    pub fn evaluate(&self, rule: &SecurityRule, input: &RuleInput<'_>) -> Option<RuleHit> {
        if !rule.enabled || !self.type_enabled(rule.rule_type) || !rule.applies_to(&input.tx.from_address) {
            return None;
        }
        let reason = match rule.rule_type {
            RuleType::Velocity => velocity_breach(rule, input),
            RuleType::Pattern | RuleType::Fraud => {
                let threshold = rule.conditions.risk_threshold?;
                (input.pattern_score > threshold)
                    .then(|| format!("pattern score {} above {}", input.pattern_score, threshold))
            }
            RuleType::Compliance => input
                .compliance
                .filter(|c| c.required)
                .map(|c| format!("compliance rule {} requires {}", c.rule.id, c.rule.compliance_type)),
        }?;
        debug!(rule = %rule.id, tx = %input.tx.hash, reason = %reason, "rule matched");
        Some(RuleHit {
            rule_id: rule.id.clone(),
            rule_type: rule.rule_type,
            severity: rule.severity,
            reason,
            alert: rule.actions.alert,
            block: rule.actions.block,
        })
    }

    /// Evaluate `rules` in the given order
    pub fn evaluate_all(&self, rules: &[SecurityRule], input: &RuleInput<'_>) -> Vec<RuleHit> {
        rules.iter().filter_map(|r| self.evaluate(r, input)).collect()
    }
}

fn velocity_breach(rule: &SecurityRule, input: &RuleInput<'_>) -> Option<String> {
    let window = match rule.conditions.time_window_secs {
        Some(w) if w > 0 => Duration::seconds(w),
        _ => {
            warn!(rule = %rule.id, "velocity rule without a window skipped");
            return None;
        }
    };
    let recent = within(input.prior, input.ctx.time, window);
    let count = recent.len() as u64 + 1;
    let volume = recent
        .iter()
        .fold(input.tx.amount, |acc, r| acc.saturating_add(r.amount));

    if let Some(max) = rule.conditions.max_transactions {
        if count > max {
            return Some(format!("{} transactions in {}s exceeds {}", count, window.num_seconds(), max));
        }
    }
    if let Some(max) = rule.conditions.max_amount {
        if volume > max {
            return Some(format!("volume {} in {}s exceeds {}", volume, window.num_seconds(), max));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn ctx() -> BlockContext {
        BlockContext::at_unix(7, 1_700_000_000).unwrap()
    }

    fn velocity_rule(max_tx: u64) -> SecurityRule {
        SecurityRule::new("vel", "velocity", RuleType::Velocity, 2).with_conditions(RuleConditions {
            time_window_secs: Some(60),
            max_transactions: Some(max_tx),
            ..Default::default()
        })
    }

    fn prior(n: u64, ctx: &BlockContext) -> Vec<TxRecord> {
        (0..n)
            .map(|i| TxRecord {
                hash: format!("p{}", i),
                amount: Decimal::from(1000),
                height: ctx.height,
                seq: i,
                time: ctx.time,
            })
            .collect()
    }

    #[test]
    fn test_severity_bounds() {
        let mut rule = velocity_rule(10);
        rule.severity = 0;
        assert!(matches!(rule.validate(), Err(SentinelError::Validation(_))));
        rule.severity = 5;
        assert!(rule.validate().is_err());
        rule.severity = 4;
        assert!(rule.validate().is_ok());
    }

    #[test]
    fn test_conditions_validated_per_type() {
        let rule = SecurityRule::new("p1", "pattern", RuleType::Pattern, 2);
        assert!(rule.validate().is_err());
        let rule = rule.with_conditions(RuleConditions {
            risk_threshold: Some(Decimal::from(101)),
            ..Default::default()
        });
        assert!(rule.validate().is_err());
        assert!(SecurityRule::new("v1", "velocity", RuleType::Velocity, 2).validate().is_err());
        assert!(SecurityRule::new("c1", "compliance", RuleType::Compliance, 2).validate().is_ok());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut store = MemoryStore::new();
        let engine = RuleEngine::new(SecurityConfig::default());
        engine.add_rule(&mut store, &velocity_rule(10), &ctx()).unwrap();
        let err = engine.add_rule(&mut store, &velocity_rule(5), &ctx()).unwrap_err();
        assert!(matches!(err, SentinelError::Validation(_)));
        assert_eq!(engine.all_rules(&store).unwrap().len(), 1);
    }

    #[test]
    fn test_update_missing_rule() {
        let mut store = MemoryStore::new();
        let engine = RuleEngine::new(SecurityConfig::default());
        let err = engine.update_rule(&mut store, &velocity_rule(10), &ctx()).unwrap_err();
        assert!(matches!(err, SentinelError::NotFound(_)));
    }

    #[test]
    fn test_velocity_rule_bounded_by_history() {
        let mut store = MemoryStore::new();
        let engine = RuleEngine::new(SecurityConfig::default()).with_history_limits(86_400, 50);

        let mut two_days = velocity_rule(3);
        two_days.id = "vel-2d".into();
        two_days.conditions.time_window_secs = Some(2 * 86_400);
        let err = engine.add_rule(&mut store, &two_days, &ctx()).unwrap_err();
        assert!(matches!(&err, SentinelError::Validation(msg) if msg.contains("retention")), "{:?}", err);

        let err = engine.add_rule(&mut store, &velocity_rule(51), &ctx()).unwrap_err();
        assert!(matches!(&err, SentinelError::Validation(msg) if msg.contains("max_transactions")), "{:?}", err);

        let mut one_day = two_days.clone();
        one_day.conditions.time_window_secs = Some(86_400);
        engine.add_rule(&mut store, &one_day, &ctx()).unwrap();
        engine.add_rule(&mut store, &velocity_rule(50), &ctx()).unwrap();

        one_day.conditions.time_window_secs = Some(86_401);
        assert!(engine.update_rule(&mut store, &one_day, &ctx()).is_err());
    }

    #[test]
    fn test_velocity_count_threshold() {
        let ctx = ctx();
        let engine = RuleEngine::new(SecurityConfig::default());
        let tx = TransactionData::new("h", "addr1", Decimal::from(1000));
        let rule = velocity_rule(10);

        let under = prior(9, &ctx);
        let input = RuleInput { tx: &tx, prior: &under, ctx: &ctx, pattern_score: Decimal::ZERO, compliance: None };
        assert!(engine.evaluate(&rule, &input).is_none());

        let over = prior(10, &ctx);
        let input = RuleInput { prior: &over, ..input };
        let hit = engine.evaluate(&rule, &input).unwrap();
        assert_eq!(hit.rule_id, "vel");
        assert!(hit.reason.contains("11 transactions"));
    }

    #[test]
    fn test_type_switch_disables_rule() {
        let ctx = ctx();
        let switches = SecurityConfig { enable_velocity_monitoring: false, ..Default::default() };
        let engine = RuleEngine::new(switches);
        let tx = TransactionData::new("h", "addr1", Decimal::from(1000));
        let history = prior(20, &ctx);
        let input = RuleInput { tx: &tx, prior: &history, ctx: &ctx, pattern_score: Decimal::ZERO, compliance: None };
        assert!(engine.evaluate(&velocity_rule(1), &input).is_none());
    }

    #[test]
    fn test_address_scope() {
        let ctx = ctx();
        let engine = RuleEngine::new(SecurityConfig::default());
        let mut rule = SecurityRule::new("pat", "pattern", RuleType::Pattern, 2).with_conditions(RuleConditions {
            risk_threshold: Some(Decimal::from(10)),
            addresses: vec!["addr2".into()],
            ..Default::default()
        });
        let tx = TransactionData::new("h", "addr1", Decimal::from(1000));
        let input = RuleInput { tx: &tx, prior: &[], ctx: &ctx, pattern_score: Decimal::from(20), compliance: None };
        assert!(engine.evaluate(&rule, &input).is_none());
        rule.conditions.addresses.clear();
        assert!(engine.evaluate(&rule, &input).is_some());
    }

    #[test]
    fn test_active_rules_sorted() {
        let mut store = MemoryStore::new();
        let engine = RuleEngine::new(SecurityConfig::default());
        for rule in SecurityRule::defaults() {
            engine.add_rule(&mut store, &rule, &ctx()).unwrap();
        }
        let ids: Vec<String> = engine.active_rules(&store).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["fraud-001", "velocity-001"]);
    }
}
