//! Jurisdiction-scoped compliance thresholds (KYC / AML / sanctions / tax).

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::core::context::{BlockContext, TransactionData};
use crate::core::errors::{Result, SentinelError};
use crate::storage::{codec, keys, KvStore};

/// Jurisdiction wildcard
pub const ANY_JURISDICTION: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplianceType {
    Kyc,
    Aml,
    Sanctions,
    Tax,
}

impl ComplianceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kyc => "kyc",
            Self::Aml => "aml",
            Self::Sanctions => "sanctions",
            Self::Tax => "tax",
        }
    }
}

impl fmt::Display for ComplianceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementLevel {
    Warning,
    Block,
    Report,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceRule {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub compliance_type: ComplianceType,
    /// Jurisdiction code, or `*` for every jurisdiction
    pub jurisdiction: String,
    /// Amounts strictly above this require the check
    pub threshold: Decimal,
    pub enabled: bool,
    pub enforcement_level: EnforcementLevel,
    #[serde(default)]
    pub requirements: BTreeMap<String, String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ComplianceRule {
    pub fn new(
        id: impl Into<String>,
        compliance_type: ComplianceType,
        jurisdiction: impl Into<String>,
        threshold: Decimal,
        enforcement_level: EnforcementLevel,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            compliance_type,
            jurisdiction: jurisdiction.into(),
            threshold,
            enabled: true,
            enforcement_level,
            requirements: BTreeMap::new(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(SentinelError::Validation("compliance rule id cannot be empty".into()));
        }
        if self.jurisdiction.trim().is_empty() {
            return Err(SentinelError::Validation(format!(
                "compliance rule {} needs a jurisdiction",
                self.id
            )));
        }
        if self.threshold.is_sign_negative() {
            return Err(SentinelError::Validation(format!(
                "compliance rule {} threshold cannot be negative",
                self.id
            )));
        }
        Ok(())
    }

    pub fn matches_jurisdiction(&self, jurisdiction: Option<&str>) -> bool {
        self.jurisdiction == ANY_JURISDICTION || jurisdiction == Some(self.jurisdiction.as_str())
    }
}

/// Outcome of `check_compliance`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceCheck {
    pub rule: ComplianceRule,
    pub required: bool,
}

impl ComplianceCheck {
    /// Whether a required check should stop the transaction
    pub fn blocks(&self) -> bool {
        self.required && self.rule.enforcement_level == EnforcementLevel::Block
    }
}

pub fn get_compliance_rule<S: KvStore + ?Sized>(store: &S, id: &str) -> Result<Option<ComplianceRule>> {
    codec::load(store, &keys::compliance_rule(id))
}

/// Insert or replace; `created_at` survives replacement
pub fn set_compliance_rule<S: KvStore + ?Sized>(store: &mut S, rule: &ComplianceRule, ctx: &BlockContext) -> Result<()> {
    rule.validate()?;
    let mut rule = rule.clone();
    rule.created_at = get_compliance_rule(store, &rule.id)?
        .and_then(|r| r.created_at)
        .or(Some(ctx.time));
    rule.updated_at = Some(ctx.time);
    codec::save(store, &keys::compliance_rule(&rule.id), &rule)
}

pub fn remove_compliance_rule<S: KvStore + ?Sized>(store: &mut S, id: &str) -> Result<()> {
    let key = keys::compliance_rule(id);
    if !store.has(&key)? {
        return Err(SentinelError::NotFound(format!("compliance rule {}", id)));
    }
    store.delete(&key)
}

/// Ascending id order
pub fn all_compliance_rules<S: KvStore + ?Sized>(store: &S) -> Result<Vec<ComplianceRule>> {
    codec::scan_values(store, keys::COMPLIANCE_RULE.as_bytes())
}

/// First enabled rule for the transaction's jurisdiction that the amount
/// exceeds; otherwise the first matching rule with `required = false`.
pub fn check_compliance<S: KvStore + ?Sized>(store: &S, tx: &TransactionData) -> Result<Option<ComplianceCheck>> {
    let jurisdiction = tx.jurisdiction.as_deref();
    let matching: Vec<ComplianceRule> = all_compliance_rules(store)?
        .into_iter()
        .filter(|r| r.enabled && r.matches_jurisdiction(jurisdiction))
        .collect();

    if let Some(rule) = matching.iter().find(|r| tx.amount > r.threshold) {
        debug!(
            tx = %tx.hash,
            rule = %rule.id,
            kind = %rule.compliance_type,
            threshold = %rule.threshold,
            "compliance check required"
        );
        return Ok(Some(ComplianceCheck { rule: rule.clone(), required: true }));
    }
    Ok(matching.into_iter().next().map(|rule| ComplianceCheck { rule, required: false }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn ctx() -> BlockContext {
        BlockContext::at_unix(3, 1_700_000_000).unwrap()
    }

    fn seeded() -> MemoryStore {
        let mut store = MemoryStore::new();
        let rules = [
            ComplianceRule::new("aml-us", ComplianceType::Aml, "US", Decimal::from(10_000), EnforcementLevel::Block),
            ComplianceRule::new("kyc-all", ComplianceType::Kyc, "*", Decimal::from(50_000), EnforcementLevel::Warning),
        ];
        for rule in &rules {
            set_compliance_rule(&mut store, rule, &ctx()).unwrap();
        }
        store
    }

    #[test]
    fn test_below_threshold_not_required() {
        let store = seeded();
        let tx = TransactionData::new("h", "a", Decimal::from(500)).with_jurisdiction("US");
        let check = check_compliance(&store, &tx).unwrap().unwrap();
        assert_eq!(check.rule.id, "aml-us");
        assert!(!check.required);
        assert!(!check.blocks());
    }

    #[test]
    fn test_above_threshold_required() {
        let store = seeded();
        let tx = TransactionData::new("h", "a", Decimal::from(20_000)).with_jurisdiction("US");
        let check = check_compliance(&store, &tx).unwrap().unwrap();
        assert!(check.required);
        assert!(check.blocks());
    }

    #[test]
    fn test_wildcard_jurisdiction() {
        let store = seeded();
        let tx = TransactionData::new("h", "a", Decimal::from(60_000)).with_jurisdiction("SG");
        let check = check_compliance(&store, &tx).unwrap().unwrap();
        assert_eq!(check.rule.id, "kyc-all");
        assert!(check.required);
        assert!(!check.blocks());
    }

    #[test]
    fn test_no_rules_no_check() {
        let store = MemoryStore::new();
        let tx = TransactionData::new("h", "a", Decimal::from(60_000));
        assert!(check_compliance(&store, &tx).unwrap().is_none());
    }

    #[test]
    fn test_disabled_rule_ignored() {
        let mut store = seeded();
        let mut rule = get_compliance_rule(&store, "kyc-all").unwrap().unwrap();
        rule.enabled = false;
        set_compliance_rule(&mut store, &rule, &ctx()).unwrap();
        let tx = TransactionData::new("h", "a", Decimal::from(60_000)).with_jurisdiction("SG");
        assert!(check_compliance(&store, &tx).unwrap().is_none());
    }
}
